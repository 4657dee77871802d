//! Local control socket for the agent
//!
//! Unix domain socket speaking newline-delimited JSON. The status call
//! streams one `AgentStatus` line per update until the client hangs up.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use wardgate_proto::AgentStatus;

use crate::statemachine::AgentHandle;

/// Request from a local client to the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Stream status updates. Unless `keep_connection_on_complete` is set,
    /// the agent disconnects once this subscriber leaves.
    Status { keep_connection_on_complete: bool },

    Login,

    Logout,

    Ping,
}

/// Response from the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    Status(AgentStatus),

    Ok { message: Option<String> },

    Error { message: String },

    Pong,
}

pub struct IpcClient {
    stream: BufReader<UnixStream>,
}

impl IpcClient {
    pub async fn connect_to(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)
            .await
            .with_context(|| format!("Failed to connect to agent socket at {:?}", path))?;

        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    async fn write(&mut self, req: &IpcRequest) -> Result<()> {
        let mut json = serde_json::to_string(req)?;
        json.push('\n');

        let stream = self.stream.get_mut();
        stream
            .write_all(json.as_bytes())
            .await
            .context("Failed to send request")?;
        stream.flush().await.context("Failed to flush request")?;
        Ok(())
    }

    /// Next response line, `None` once the agent closed the socket
    async fn read(&mut self) -> Result<Option<IpcResponse>> {
        let mut line = String::new();
        let n = self
            .stream
            .read_line(&mut line)
            .await
            .context("Failed to read response")?;
        if n == 0 {
            return Ok(None);
        }

        let response = serde_json::from_str(&line).context("Failed to parse response")?;
        Ok(Some(response))
    }

    /// Send a request and receive a response
    pub async fn request(&mut self, req: &IpcRequest) -> Result<IpcResponse> {
        self.write(req).await?;
        self.read()
            .await?
            .context("Agent closed the connection without responding")
    }

    /// Start a status subscription on this connection
    pub async fn subscribe(mut self, keep_connection_on_complete: bool) -> Result<StatusStream> {
        self.write(&IpcRequest::Status {
            keep_connection_on_complete,
        })
        .await?;
        Ok(StatusStream { client: self })
    }
}

pub struct StatusStream {
    client: IpcClient,
}

impl StatusStream {
    pub async fn next(&mut self) -> Result<Option<AgentStatus>> {
        match self.client.read().await? {
            Some(IpcResponse::Status(status)) => Ok(Some(status)),
            Some(IpcResponse::Error { message }) => anyhow::bail!("Agent error: {}", message),
            Some(other) => anyhow::bail!("Unexpected response: {:?}", other),
            None => Ok(None),
        }
    }
}

pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    pub async fn bind_to(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        if path.exists() {
            match UnixStream::connect(path).await {
                Ok(_) => {
                    anyhow::bail!(
                        "Another agent is already running (socket at {:?} is active)",
                        path
                    );
                }
                Err(_) => {
                    tracing::debug!(path = ?path, "Removing stale agent socket");
                    std::fs::remove_file(path)?;
                }
            }
        }

        let listener = UnixListener::bind(path)
            .with_context(|| format!("Failed to bind to socket at {:?}", path))?;

        Ok(Self {
            listener,
            socket_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept clients until cancelled
    pub async fn serve(self, handle: AgentHandle, cancel: CancellationToken) -> Result<()> {
        tracing::info!(path = ?self.socket_path, "Agent socket listening");

        loop {
            let stream = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept local client");
                        continue;
                    }
                },
            };

            let handle = handle.clone();
            let cancel = cancel.child_token();
            tokio::spawn(async move {
                if let Err(e) = serve_client(stream, handle, cancel).await {
                    tracing::debug!(error = %e, "Local client error");
                }
            });
        }

        Ok(())
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

async fn send(writer: &mut OwnedWriteHalf, response: &IpcResponse) -> Result<()> {
    let mut json = serde_json::to_string(response)?;
    json.push('\n');
    writer
        .write_all(json.as_bytes())
        .await
        .context("Failed to send response")?;
    writer.flush().await.context("Failed to flush response")?;
    Ok(())
}

async fn serve_client(
    stream: UnixStream,
    handle: AgentHandle,
    cancel: CancellationToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = FramedRead::new(reader, LinesCodec::new());

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            line = lines.next() => match line {
                Some(line) => line.context("Failed to read request")?,
                None => return Ok(()),
            },
        };

        let request: IpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                send(
                    &mut writer,
                    &IpcResponse::Error {
                        message: format!("invalid request: {}", e),
                    },
                )
                .await?;
                continue;
            }
        };
        tracing::debug!(request = ?request, "Local request");

        let response = match request {
            IpcRequest::Status {
                keep_connection_on_complete,
            } => {
                return stream_status(
                    &mut lines,
                    &mut writer,
                    &handle,
                    keep_connection_on_complete,
                    &cancel,
                )
                .await;
            }
            IpcRequest::Ping => IpcResponse::Pong,
            IpcRequest::Login => match handle.login().await {
                Ok(()) => IpcResponse::Ok { message: None },
                Err(_) => stopped(),
            },
            IpcRequest::Logout => match handle.logout().await {
                Ok(()) => IpcResponse::Ok { message: None },
                Err(_) => stopped(),
            },
        };
        send(&mut writer, &response).await?;
    }
}

fn stopped() -> IpcResponse {
    IpcResponse::Error {
        message: "agent is shutting down".to_string(),
    }
}

type RequestLines = FramedRead<OwnedReadHalf, LinesCodec>;

async fn stream_status(
    lines: &mut RequestLines,
    writer: &mut OwnedWriteHalf,
    handle: &AgentHandle,
    keep_connection_on_complete: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let fanout = handle.status_fanout().clone();
    let (id, mut updates) = fanout.subscribe();

    let result = pump_status(lines, writer, &mut updates, cancel).await;

    fanout.unsubscribe(&id);
    tracing::debug!(subscriber = %id, keep_connection_on_complete, "Status subscriber left");
    if !keep_connection_on_complete
        && !cancel.is_cancelled()
        && handle.disconnect().await.is_err()
    {
        tracing::debug!("State machine stopped before status subscriber left");
    }

    result
}

async fn pump_status(
    lines: &mut RequestLines,
    writer: &mut OwnedWriteHalf,
    updates: &mut mpsc::Receiver<AgentStatus>,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            status = updates.recv() => match status {
                Some(status) => send(writer, &IpcResponse::Status(status)).await?,
                None => return Ok(()),
            },
            // Anything but a hangup from the client is ignored
            line = lines.next() => {
                if line.is_none() {
                    return Ok(());
                }
            }
        }
    }
}
