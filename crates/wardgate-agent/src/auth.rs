//! Identity token acquisition

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::TokenError;

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A fresh identity token for the current user
    async fn token(&self) -> Result<String, TokenError>;
}

/// Token fixed at startup (flag or environment)
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String, TokenError> {
        self.token.clone().ok_or(TokenError::Missing)
    }
}

/// Token read from a file on every request, so `wardgate login` can drop in
/// a new one without restarting the agent.
pub struct FileTokenProvider {
    path: PathBuf,
}

impl FileTokenProvider {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl TokenProvider for FileTokenProvider {
    async fn token(&self) -> Result<String, TokenError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let token = contents.trim();
                if token.is_empty() {
                    Err(TokenError::Missing)
                } else {
                    Ok(token.to_string())
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(TokenError::Missing),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider() {
        assert_eq!(
            StaticTokenProvider::new(Some("abc".into())).token().await.unwrap(),
            "abc"
        );
        assert!(matches!(
            StaticTokenProvider::new(Some(String::new())).token().await,
            Err(TokenError::Missing)
        ));
    }

    #[tokio::test]
    async fn test_file_provider_trims_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        let provider = FileTokenProvider::new(path.clone());

        assert!(matches!(provider.token().await, Err(TokenError::Missing)));

        std::fs::write(&path, "eyJ.token.sig\n").unwrap();
        assert_eq!(provider.token().await.unwrap(), "eyJ.token.sig");
    }
}
