//! TCP front end for the control plane
//!
//! Every connection speaks length-prefixed bincode frames. Unary requests are
//! answered in place; a configuration request hands the connection over to
//! the matching stream handler until it ends.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use futures::stream::SplitStream;
use futures::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use wardgate_proto::{
    CodecError, DeviceConfiguration, GatewayConfiguration, Request, Response, RpcStatus,
    ServerCodec,
};

use crate::api::{ApiServer, PushSink};
use crate::error::ControlError;

type ServerFrames = SplitStream<Framed<TcpStream, ServerCodec>>;

/// Writes configuration pushes as response frames
pub struct ResponseSink<S> {
    inner: S,
}

impl<S> ResponseSink<S>
where
    S: Sink<Response, Error = CodecError> + Unpin + Send,
{
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    async fn send(&mut self, response: Response) -> Result<(), ControlError> {
        self.inner.send(response).await.map_err(|e| {
            tracing::debug!(error = %e, "Failed to write response frame");
            ControlError::StreamClosed
        })
    }

    /// Report the stream outcome and close the write half
    async fn finish(mut self, result: Result<(), ControlError>) -> Result<(), ControlError> {
        if let Err(e) = result {
            let status = RpcStatus::from(e);
            tracing::info!(code = %status.code, message = %status.message, "Stream ended with error");
            self.send(Response::Error(status)).await?;
        }
        self.inner.close().await.map_err(|_| ControlError::StreamClosed)
    }
}

#[async_trait]
impl<S> PushSink<DeviceConfiguration> for ResponseSink<S>
where
    S: Sink<Response, Error = CodecError> + Unpin + Send,
{
    async fn push(&mut self, item: DeviceConfiguration) -> Result<(), ControlError> {
        self.send(Response::DeviceConfiguration(item)).await
    }
}

#[async_trait]
impl<S> PushSink<GatewayConfiguration> for ResponseSink<S>
where
    S: Sink<Response, Error = CodecError> + Unpin + Send,
{
    async fn push(&mut self, item: GatewayConfiguration) -> Result<(), ControlError> {
        self.send(Response::GatewayConfiguration(item)).await
    }
}

pub struct RpcServer {
    listener: TcpListener,
    api: ApiServer,
}

impl RpcServer {
    pub async fn bind(addr: SocketAddr, api: ApiServer) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, api })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `cancel` fires; open streams are cancelled with it.
    pub async fn run(self, cancel: CancellationToken) -> io::Result<()> {
        tracing::info!(address = %self.local_addr()?, "Control plane listening");

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Control plane shutting down");
                    self.api.devices.close();
                    self.api.gateways.close();
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }
                    let api = self.api.clone();
                    let conn_cancel = cancel.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(api, stream, peer, conn_cancel).await {
                            tracing::debug!(peer = %peer, error = %e, "Connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

async fn serve_connection(
    api: ApiServer,
    stream: TcpStream,
    peer: SocketAddr,
    cancel: CancellationToken,
) -> Result<(), ControlError> {
    let (sink, mut frames) = Framed::new(stream, ServerCodec::new()).split();
    let mut sink = ResponseSink::new(sink);

    loop {
        let request = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = frames.next() => match frame {
                Some(Ok(request)) => request,
                Some(Err(e)) => {
                    tracing::warn!(peer = %peer, error = %e, "Dropping connection after bad frame");
                    return Ok(());
                }
                None => return Ok(()),
            },
        };
        tracing::debug!(peer = %peer, request = request.kind(), "Request received");

        match request {
            Request::GetDeviceConfiguration { session_key } => {
                let stream_cancel = cancel.child_token();
                let watcher = watch_for_close(frames, peer, stream_cancel.clone());
                let result = api
                    .stream_device_configuration(&session_key, &mut sink, stream_cancel.clone())
                    .await;
                stream_cancel.cancel();
                watcher.abort();
                return sink.finish(result).await;
            }
            Request::GetGatewayConfiguration { gateway, password } => {
                let stream_cancel = cancel.child_token();
                let watcher = watch_for_close(frames, peer, stream_cancel.clone());
                let result = api
                    .stream_gateway_configuration(&gateway, &password, &mut sink, stream_cancel.clone())
                    .await;
                stream_cancel.cancel();
                watcher.abort();
                return sink.finish(result).await;
            }
            unary => {
                let response = api.handle_unary(unary).await;
                sink.send(response).await?;
            }
        }
    }
}

/// Cancel the stream once the client hangs up or breaks framing
fn watch_for_close(
    mut frames: ServerFrames,
    peer: SocketAddr,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match frames.next().await {
                Some(Ok(request)) => {
                    tracing::debug!(peer = %peer, request = request.kind(), "Ignoring request on open stream");
                }
                Some(Err(e)) => {
                    tracing::debug!(peer = %peer, error = %e, "Stream read failed");
                    break;
                }
                None => break,
            }
        }
        cancel.cancel();
    })
}

impl ApiServer {
    /// Answer a single non-streaming request
    pub async fn handle_unary(&self, request: Request) -> Response {
        let kind = request.kind();
        let result = match request {
            Request::Login {
                token,
                serial,
                platform,
                version,
            } => self
                .login(&token, &serial, &platform, &version)
                .await
                .map(Response::Session),
            Request::EnrollDevice {
                token,
                serial,
                platform,
                public_key,
            } => self
                .enroll_device(&token, &serial, &platform, &public_key)
                .await
                .map(Response::Enrollment),
            Request::EnrollGateway {
                credentials,
                gateway,
            } => self
                .enroll_gateway(&credentials, gateway)
                .await
                .map(Response::Gateway),
            Request::UpdateGateway {
                credentials,
                gateway,
            } => self
                .update_gateway(&credentials, gateway)
                .await
                .map(Response::Gateway),
            Request::ListGateways { credentials } => self
                .list_gateways(&credentials)
                .await
                .map(Response::Gateways),
            Request::GetSessions { credentials } => self
                .get_sessions(&credentials)
                .await
                .map(Response::Sessions),
            Request::GrantPrivilegedAccess {
                credentials,
                gateway,
                user_id,
                duration_secs,
            } => match grant_duration(duration_secs) {
                Ok(duration) => self
                    .grant_privileged_access(&credentials, &gateway, &user_id, duration)
                    .await
                    .map(|user| Response::PrivilegedGrant {
                        user_id: user.user_id,
                        expires: user.expires,
                    }),
                Err(e) => Err(e),
            },
            Request::RevokePrivilegedAccess {
                credentials,
                gateway,
                user_id,
            } => self
                .revoke_privileged_access(&credentials, &gateway, &user_id)
                .await
                .map(Response::Revoked),
            Request::UpdateDeviceHealth {
                credentials,
                device_id,
                healthy,
                issues,
            } => self
                .update_device_health(&credentials, device_id, healthy, &issues)
                .await
                .map(Response::Device),
            Request::GetDeviceConfiguration { .. } | Request::GetGatewayConfiguration { .. } => {
                Err(ControlError::InvalidArgument(format!(
                    "{} is a streaming request",
                    kind
                )))
            }
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                let status = RpcStatus::from(e);
                tracing::info!(request = kind, code = %status.code, message = %status.message, "Request failed");
                Response::Error(status)
            }
        }
    }
}

fn grant_duration(secs: u64) -> Result<chrono::Duration, ControlError> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .filter(|d| *d > chrono::Duration::zero())
        .ok_or_else(|| ControlError::InvalidArgument(format!("invalid grant duration: {}s", secs)))
}
