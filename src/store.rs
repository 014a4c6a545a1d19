//! Persistent token store for the OAuth token pair

use std::cell::RefCell;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where the core keeps the token pair between boots. The storage format is
/// up to the implementation.
pub trait TokenStore {
    fn has_stored_tokens(&self) -> bool {
        !self.access_token().is_empty() || !self.refresh_token().is_empty()
    }
    fn access_token(&self) -> String;
    fn refresh_token(&self) -> String;
    fn save_tokens(&self, access_token: &str, refresh_token: &str) -> Result<()>;
    /// When the stored pair was written, if known.
    fn saved_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StoredTokens {
    access_token: String,
    refresh_token: String,
    saved_at: Option<DateTime<Utc>>,
}

/// JSON file on disk, rewritten atomically on every save.
pub struct FileTokenStore {
    path: PathBuf,
    tokens: RefCell<StoredTokens>,
}

impl FileTokenStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| Error::CredentialStore(e.to_string()))?;
            }
        }

        let tokens = if path.exists() {
            let content =
                fs::read_to_string(&path).map_err(|e| Error::CredentialStore(e.to_string()))?;
            match serde_json::from_str(&content) {
                Ok(tokens) => tokens,
                Err(e) => {
                    // A corrupt file only costs a fresh login
                    tracing::warn!(path = %path.display(), error = %e, "Token file unreadable, ignoring");
                    StoredTokens::default()
                }
            }
        } else {
            StoredTokens::default()
        };

        tracing::debug!(
            path = %path.display(),
            has_tokens = !tokens.refresh_token.is_empty() || !tokens.access_token.is_empty(),
            "Token store opened"
        );

        Ok(Self {
            path,
            tokens: RefCell::new(tokens),
        })
    }

    fn write(&self, tokens: &StoredTokens) -> Result<()> {
        let content =
            serde_json::to_string_pretty(tokens).map_err(|e| Error::CredentialStore(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        write_private(&tmp, content.as_bytes()).map_err(|e| Error::CredentialStore(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| Error::CredentialStore(e.to_string()))?;
        Ok(())
    }
}

/// Write `content` to `path`, readable by the owner only on unix.
fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(content)?;
    file.sync_all()
}

impl TokenStore for FileTokenStore {
    fn access_token(&self) -> String {
        self.tokens.borrow().access_token.clone()
    }

    fn refresh_token(&self) -> String {
        self.tokens.borrow().refresh_token.clone()
    }

    fn save_tokens(&self, access_token: &str, refresh_token: &str) -> Result<()> {
        let tokens = StoredTokens {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            saved_at: Some(Utc::now()),
        };
        self.write(&tokens)?;
        *self.tokens.borrow_mut() = tokens;
        tracing::debug!(path = %self.path.display(), "Saved tokens to disk");
        Ok(())
    }

    fn saved_at(&self) -> Option<DateTime<Utc>> {
        self.tokens.borrow().saved_at
    }
}

/// Keeps tokens in memory only; nothing survives a restart.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: RefCell<StoredTokens>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_tokens(access_token: &str, refresh_token: &str) -> Self {
        Self {
            tokens: RefCell::new(StoredTokens {
                access_token: access_token.to_string(),
                refresh_token: refresh_token.to_string(),
                saved_at: None,
            }),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn access_token(&self) -> String {
        self.tokens.borrow().access_token.clone()
    }

    fn refresh_token(&self) -> String {
        self.tokens.borrow().refresh_token.clone()
    }

    fn save_tokens(&self, access_token: &str, refresh_token: &str) -> Result<()> {
        *self.tokens.borrow_mut() = StoredTokens {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            saved_at: Some(Utc::now()),
        };
        Ok(())
    }

    fn saved_at(&self) -> Option<DateTime<Utc>> {
        self.tokens.borrow().saved_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_round_trips_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tokens.json");

        let store = FileTokenStore::open(&path).unwrap();
        assert!(!store.has_stored_tokens());
        store.save_tokens("access-1", "refresh-1").unwrap();

        let reopened = FileTokenStore::open(&path).unwrap();
        assert!(reopened.has_stored_tokens());
        assert_eq!(reopened.access_token(), "access-1");
        assert_eq!(reopened.refresh_token(), "refresh-1");
        assert!(reopened.saved_at().is_some());
    }

    #[cfg(unix)]
    #[test]
    fn token_file_is_private_to_the_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let store = FileTokenStore::open(&path).unwrap();
        store.save_tokens("access-1", "refresh-1").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn corrupt_file_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        fs::write(&path, "{not json").unwrap();

        let store = FileTokenStore::open(&path).unwrap();
        assert!(!store.has_stored_tokens());
    }

    #[test]
    fn refresh_token_alone_counts_as_stored() {
        let store = MemoryTokenStore::with_tokens("", "refresh");
        assert!(store.has_stored_tokens());
        assert!(store.saved_at().is_none());
    }
}
