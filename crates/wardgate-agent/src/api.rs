//! Control plane client

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use wardgate_proto::{ClientCodec, DeviceConfiguration, Enrollment, Request, Response, Session};

use crate::error::SyncError;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens connections to the control plane
#[async_trait]
pub trait ApiDialer: Send + Sync {
    async fn dial(&self) -> Result<Box<dyn ApiConnection>, SyncError>;
}

/// One established connection. Unary calls may be repeated; opening the
/// configuration stream consumes the connection.
#[async_trait]
pub trait ApiConnection: Send {
    async fn login(
        &mut self,
        token: &str,
        serial: &str,
        platform: &str,
        version: &str,
    ) -> Result<Session, SyncError>;

    async fn enroll(
        &mut self,
        token: &str,
        serial: &str,
        platform: &str,
        public_key: &str,
    ) -> Result<Enrollment, SyncError>;

    async fn device_configuration(
        self: Box<Self>,
        session_key: &str,
    ) -> Result<Box<dyn DeviceConfigStream>, SyncError>;
}

#[async_trait]
pub trait DeviceConfigStream: Send {
    /// Next push; `Ok(None)` once the control plane closed the stream
    async fn recv(&mut self) -> Result<Option<DeviceConfiguration>, SyncError>;
}

pub struct TcpApiDialer {
    address: String,
    connect_timeout: Duration,
}

impl TcpApiDialer {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl ApiDialer for TcpApiDialer {
    async fn dial(&self) -> Result<Box<dyn ApiConnection>, SyncError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| SyncError::Unavailable(format!("connect to {}: timed out", self.address)))?
            .map_err(|e| SyncError::Unavailable(format!("connect to {}: {}", self.address, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        tracing::debug!(address = %self.address, "Connected to control plane");
        Ok(Box::new(TcpApiConnection {
            framed: Framed::new(stream, ClientCodec::new()),
        }))
    }
}

pub struct TcpApiConnection {
    framed: Framed<TcpStream, ClientCodec>,
}

impl TcpApiConnection {
    async fn call(&mut self, request: Request) -> Result<Response, SyncError> {
        let kind = request.kind();
        self.framed
            .send(request)
            .await
            .map_err(|e| SyncError::Unavailable(format!("send {}: {}", kind, e)))?;

        match self.framed.next().await {
            Some(Ok(Response::Error(status))) => Err(status.into()),
            Some(Ok(response)) => Ok(response),
            Some(Err(e)) => Err(SyncError::Unavailable(format!("{}: {}", kind, e))),
            None => Err(SyncError::Unavailable(format!(
                "{}: connection closed",
                kind
            ))),
        }
    }
}

#[async_trait]
impl ApiConnection for TcpApiConnection {
    async fn login(
        &mut self,
        token: &str,
        serial: &str,
        platform: &str,
        version: &str,
    ) -> Result<Session, SyncError> {
        let request = Request::Login {
            token: token.to_string(),
            serial: serial.to_string(),
            platform: platform.to_string(),
            version: version.to_string(),
        };
        match self.call(request).await? {
            Response::Session(session) => Ok(session),
            other => Err(unexpected("login", &other)),
        }
    }

    async fn enroll(
        &mut self,
        token: &str,
        serial: &str,
        platform: &str,
        public_key: &str,
    ) -> Result<Enrollment, SyncError> {
        let request = Request::EnrollDevice {
            token: token.to_string(),
            serial: serial.to_string(),
            platform: platform.to_string(),
            public_key: public_key.to_string(),
        };
        match self.call(request).await? {
            Response::Enrollment(enrollment) => Ok(enrollment),
            other => Err(unexpected("enroll", &other)),
        }
    }

    async fn device_configuration(
        mut self: Box<Self>,
        session_key: &str,
    ) -> Result<Box<dyn DeviceConfigStream>, SyncError> {
        self.framed
            .send(Request::GetDeviceConfiguration {
                session_key: session_key.to_string(),
            })
            .await
            .map_err(|e| SyncError::Unavailable(format!("open stream: {}", e)))?;

        Ok(Box::new(TcpDeviceConfigStream {
            framed: self.framed,
        }))
    }
}

pub struct TcpDeviceConfigStream {
    framed: Framed<TcpStream, ClientCodec>,
}

#[async_trait]
impl DeviceConfigStream for TcpDeviceConfigStream {
    async fn recv(&mut self) -> Result<Option<DeviceConfiguration>, SyncError> {
        match self.framed.next().await {
            Some(Ok(Response::DeviceConfiguration(config))) => Ok(Some(config)),
            Some(Ok(Response::Error(status))) => Err(status.into()),
            Some(Ok(other)) => Err(unexpected("device configuration", &other)),
            Some(Err(e)) => Err(SyncError::LostConnection(e.to_string())),
            None => Ok(None),
        }
    }
}

fn unexpected(call: &str, response: &Response) -> SyncError {
    SyncError::Unexpected(format!("{}: unexpected response {:?}", call, response))
}
