//! Local tunnel programming

use std::path::PathBuf;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use wardgate_proto::InterfaceConfig;

use crate::error::NetworkError;

/// Applies tunnel configuration to the host.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NetworkConfigurer: Send + Sync {
    /// Bring the interface in line with `config`
    async fn configure(&self, config: InterfaceConfig) -> Result<(), NetworkError>;

    /// Remove everything `configure` set up
    async fn teardown(&self) -> Result<(), NetworkError>;
}

/// Logs what it would do
pub struct NoopConfigurer;

#[async_trait]
impl NetworkConfigurer for NoopConfigurer {
    async fn configure(&self, config: InterfaceConfig) -> Result<(), NetworkError> {
        tracing::info!(peers = ?config.peer_names(), "Tunnel configuration (noop)");
        Ok(())
    }

    async fn teardown(&self) -> Result<(), NetworkError> {
        tracing::info!("Tunnel teardown (noop)");
        Ok(())
    }
}

/// Writes a wg-quick config file for an external helper to sync from
pub struct FileConfigurer {
    path: PathBuf,
}

impl FileConfigurer {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl NetworkConfigurer for FileConfigurer {
    async fn configure(&self, config: InterfaceConfig) -> Result<(), NetworkError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let rendered = config.to_string();
        let staging = self.path.with_extension("tmp");
        tokio::fs::write(&staging, rendered.as_bytes()).await?;
        tokio::fs::rename(&staging, &self.path).await?;

        tracing::debug!(path = ?self.path, peers = config.peers.len(), "Wrote tunnel configuration");
        Ok(())
    }

    async fn teardown(&self) -> Result<(), NetworkError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
