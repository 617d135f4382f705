//! Bearer credential providers.
//!
//! The console never stores a session of its own; it asks a provider for a
//! fresh credential each time it opens a channel or calls the API.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use protocol::error::{ProtocolError, Result};

use crate::config::AuthConfig;

/// Source of short-lived bearer credentials.
pub trait CredentialProvider: Send + Sync {
    /// Returns a credential, or [`ProtocolError::CredentialUnavailable`].
    fn credential(&self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;
}

/// A fixed credential (flag, config file or environment).
#[derive(Clone)]
pub struct StaticCredential {
    token: String,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredential").finish_non_exhaustive()
    }
}

impl CredentialProvider for StaticCredential {
    fn credential(&self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(async move { Ok(self.token.clone()) })
    }
}

/// Reads the credential from a file on every request, so an external
/// refresher can rotate it while the console runs.
#[derive(Debug, Clone)]
pub struct TokenFileCredential {
    path: PathBuf,
}

impl TokenFileCredential {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialProvider for TokenFileCredential {
    fn credential(&self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(async move {
            let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
                ProtocolError::CredentialUnavailable(format!("{}: {}", self.path.display(), e))
            })?;
            let token = contents.trim();
            if token.is_empty() {
                return Err(ProtocolError::CredentialUnavailable(format!(
                    "{} is empty",
                    self.path.display()
                )));
            }
            Ok(token.to_string())
        })
    }
}

/// No credential configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredential;

impl CredentialProvider for NoCredential {
    fn credential(&self) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(async {
            Err(ProtocolError::CredentialUnavailable(
                "no token or token_file configured".to_string(),
            ))
        })
    }
}

/// Picks a provider for the auth settings. An inline token wins over a
/// token file.
pub fn provider_from_config(auth: &AuthConfig) -> Arc<dyn CredentialProvider> {
    if let Some(token) = auth.token.as_deref().filter(|t| !t.trim().is_empty()) {
        return Arc::new(StaticCredential::new(token.trim()));
    }
    if let Some(path) = &auth.token_file {
        return Arc::new(TokenFileCredential::new(path.clone()));
    }
    Arc::new(NoCredential)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_static_credential() {
        let provider = StaticCredential::new("abc");
        assert_eq!(provider.credential().await.unwrap(), "abc");
        assert!(!format!("{:?}", provider).contains("abc"));
    }

    #[tokio::test]
    async fn test_token_file_is_reread() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "first").unwrap();
        let provider = TokenFileCredential::new(file.path());
        assert_eq!(provider.credential().await.unwrap(), "first");

        std::fs::write(file.path(), "second\n").unwrap();
        assert_eq!(provider.credential().await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_token_file_missing_or_empty() {
        let provider = TokenFileCredential::new("/nonexistent/hostpanel/token");
        assert!(matches!(
            provider.credential().await,
            Err(ProtocolError::CredentialUnavailable(_))
        ));

        let file = NamedTempFile::new().unwrap();
        let provider = TokenFileCredential::new(file.path());
        assert!(matches!(
            provider.credential().await,
            Err(ProtocolError::CredentialUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_provider_from_config() {
        let auth = AuthConfig {
            token: Some(" inline ".to_string()),
            token_file: Some(PathBuf::from("/ignored")),
        };
        assert_eq!(provider_from_config(&auth).credential().await.unwrap(), "inline");

        let none = provider_from_config(&AuthConfig::default());
        assert!(none.credential().await.is_err());
    }
}
