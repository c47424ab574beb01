//! # Credential Store Module
//!
//! Holds the single provider credential document: the OAuth client id and
//! secret plus the current access/refresh token pair.
//!
//! ## Storage
//! `FileCredentialStore` keeps the document as TOML (`credentials.toml`) so it
//! can be seeded by hand with `client_id` and `client_secret`:
//! ```toml
//! client_id = "23ABCD"
//! client_secret = "..."
//! access_token = "..."
//! refresh_token = "..."
//! ```
//! The file is replaced atomically on every write and, on unix, is readable
//! by its owner only (mode 0600).
//!
//! Writes are merges: fields missing from an update keep their stored value.
//! Access and refresh tokens only ever change together as a `TokenPair`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use crate::error::StoreError;

/// Access and refresh token issued together by the token endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

// Tokens stay out of logs
impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair").finish_non_exhaustive()
    }
}

/// Snapshot of the credential document, passed by value into each cycle
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("client_id", &self.client_id)
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

impl CredentialRecord {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            access_token: String::new(),
            refresh_token: String::new(),
            updated_at: None,
        }
    }

    /// A new record carrying `tokens`, leaving `self` untouched
    pub fn with_tokens(&self, tokens: TokenPair, updated_at: DateTime<Utc>) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            updated_at: Some(updated_at),
            ..self.clone()
        }
    }
}

/// Partial write to the credential document
#[derive(Debug, Clone, Default)]
pub struct CredentialUpdate {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub tokens: Option<TokenPair>,
}

impl CredentialUpdate {
    pub fn tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: Some(tokens),
            ..Self::default()
        }
    }

    fn apply(self, base: Option<CredentialRecord>, now: DateTime<Utc>) -> CredentialRecord {
        let mut record = base.unwrap_or_else(|| CredentialRecord::new("", ""));
        if let Some(client_id) = self.client_id {
            record.client_id = client_id;
        }
        if let Some(client_secret) = self.client_secret {
            record.client_secret = client_secret;
        }
        if let Some(tokens) = self.tokens {
            record = record.with_tokens(tokens, now);
        }
        record
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Current credential document
    async fn read(&self) -> Result<CredentialRecord, StoreError>;

    /// Merge `update` into the document, creating it if needed
    async fn merge(&self, update: CredentialUpdate) -> Result<CredentialRecord, StoreError>;
}

/// Credential store kept in memory
#[cfg(test)]
#[derive(Default)]
pub struct MemoryCredentialStore {
    record: Mutex<Option<CredentialRecord>>,
}

#[cfg(test)]
impl MemoryCredentialStore {
    pub fn seeded(record: CredentialRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn read(&self) -> Result<CredentialRecord, StoreError> {
        let guard = self.record.lock().map_err(|_| poisoned())?;
        guard.clone().ok_or(StoreError::MissingCredentials)
    }

    async fn merge(&self, update: CredentialUpdate) -> Result<CredentialRecord, StoreError> {
        let mut guard = self.record.lock().map_err(|_| poisoned())?;
        let merged = update.apply(guard.take(), Utc::now());
        *guard = Some(merged.clone());
        Ok(merged)
    }
}

/// Credential store backed by a TOML file
pub struct FileCredentialStore {
    path: PathBuf,
    // Serializes read-modify-write merges within this process
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub const FILE_NAME: &'static str = "credentials.toml";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(Self::FILE_NAME))
    }

    fn load(&self) -> Result<Option<CredentialRecord>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => toml::from_str(&contents)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn write(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents =
            toml::to_string_pretty(record).map_err(|e| StoreError::Encode(e.to_string()))?;
        // The refresh token is single-use: never leave a truncated document behind
        let tmp = self.path.with_extension("toml.tmp");
        let mut file = owner_only().open(&tmp)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // mode() only applies on create; a leftover temp file keeps its old bits
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn read(&self) -> Result<CredentialRecord, StoreError> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        self.load()?.ok_or(StoreError::MissingCredentials)
    }

    async fn merge(&self, update: CredentialUpdate) -> Result<CredentialRecord, StoreError> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        let merged = update.apply(self.load()?, Utc::now());
        self.write(&merged)?;
        log::debug!("Credential document updated at {}", self.path.display());
        Ok(merged)
    }
}

/// Options for a file only the current user can read
fn owner_only() -> fs::OpenOptions {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

fn poisoned() -> StoreError {
    StoreError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "credential store lock poisoned",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pair(access: &str, refresh: &str) -> TokenPair {
        TokenPair {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
        }
    }

    #[test]
    fn test_with_tokens_returns_new_value() {
        let original = CredentialRecord::new("client", "secret");
        let rotated = original.with_tokens(pair("a1", "r1"), Utc::now());

        assert_eq!(original.access_token, "");
        assert_eq!(rotated.access_token, "a1");
        assert_eq!(rotated.refresh_token, "r1");
        assert_eq!(rotated.client_id, "client");
        assert!(rotated.updated_at.is_some());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let record = CredentialRecord::new("client", "very-secret")
            .with_tokens(pair("access-xyz", "refresh-xyz"), Utc::now());
        let printed = format!("{:?}", record);
        assert!(printed.contains("client"));
        assert!(!printed.contains("very-secret"));
        assert!(!printed.contains("access-xyz"));
        assert!(!format!("{:?}", pair("access-xyz", "r")).contains("access-xyz"));
    }

    #[tokio::test]
    async fn test_memory_store_requires_seed() {
        let store = MemoryCredentialStore::default();
        assert!(matches!(store.read().await, Err(StoreError::MissingCredentials)));
    }

    #[tokio::test]
    async fn test_merge_preserves_client_fields() {
        let store = MemoryCredentialStore::seeded(CredentialRecord::new("client", "secret"));
        store.merge(CredentialUpdate::tokens(pair("a1", "r1"))).await.unwrap();

        let record = store.read().await.unwrap();
        assert_eq!(record.client_id, "client");
        assert_eq!(record.client_secret, "secret");
        assert_eq!(record.access_token, "a1");
        assert_eq!(record.refresh_token, "r1");
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempdir().unwrap();
        let store = FileCredentialStore::in_dir(dir.path());
        assert!(matches!(store.read().await, Err(StoreError::MissingCredentials)));

        store
            .merge(CredentialUpdate {
                client_id: Some("client".to_string()),
                client_secret: Some("secret".to_string()),
                tokens: Some(pair("a1", "r1")),
            })
            .await
            .unwrap();
        store.merge(CredentialUpdate::tokens(pair("a2", "r2"))).await.unwrap();

        let reopened = FileCredentialStore::in_dir(dir.path());
        let record = reopened.read().await.unwrap();
        assert_eq!(record.client_id, "client");
        assert_eq!(record.access_token, "a2");
        assert_eq!(record.refresh_token, "r2");
        assert!(record.updated_at.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_is_owner_only_and_replaced_whole() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join(FileCredentialStore::FILE_NAME);
        // a hand-seeded document with loose permissions gets tightened on first merge
        fs::write(&path, "client_id = \"client\"\nclient_secret = \"secret\"\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let store = FileCredentialStore::new(&path);
        store.merge(CredentialUpdate::tokens(pair("a1", "r1"))).await.unwrap();
        store.merge(CredentialUpdate::tokens(pair("a2", "r2"))).await.unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert!(!path.with_extension("toml.tmp").exists());

        let record = FileCredentialStore::new(&path).read().await.unwrap();
        assert_eq!(record.client_secret, "secret");
        assert_eq!(record.access_token, "a2");
        assert_eq!(record.refresh_token, "r2");
    }

    #[tokio::test]
    async fn test_file_store_reads_hand_seeded_document() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(FileCredentialStore::FILE_NAME),
            "client_id = \"23ABCD\"\nclient_secret = \"s\"\nrefresh_token = \"r0\"\n",
        )
        .unwrap();

        let record = FileCredentialStore::in_dir(dir.path()).read().await.unwrap();
        assert_eq!(record.client_id, "23ABCD");
        assert_eq!(record.access_token, "");
        assert_eq!(record.refresh_token, "r0");
        assert_eq!(record.updated_at, None);
    }
}
