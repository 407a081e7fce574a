use std::future::Future;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::Ledger;

/// Failure to read or write the ledger document.
#[derive(Debug)]
pub enum LedgerError {
    Io(std::io::Error),
    Corrupt(serde_json::Error),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::Io(e) => write!(f, "ledger I/O error: {e}"),
            LedgerError::Corrupt(e) => write!(f, "ledger document is not valid JSON: {e}"),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LedgerError::Io(e) => Some(e),
            LedgerError::Corrupt(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        LedgerError::Io(e)
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Corrupt(e)
    }
}

/// Whole-document persistence for the ledger. Callers load everything,
/// mutate, and save everything back; there is no partial update.
pub trait LedgerStore: Send + Sync {
    fn load(&self) -> impl Future<Output = Result<Ledger, LedgerError>> + Send;
    fn save(&self, ledger: &Ledger) -> impl Future<Output = Result<(), LedgerError>> + Send;
}

/// Ledger kept as a pretty-printed JSON file.
///
/// Writes go to a sibling temp file that is then renamed over the target, so a
/// failed write never leaves a truncated document behind.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "ledger.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl LedgerStore for JsonFileStore {
    async fn load(&self) -> Result<Ledger, LedgerError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no ledger file yet, starting empty");
                return Ok(Ledger::default());
            }
            Err(e) => return Err(e.into()),
        };

        if contents.trim().is_empty() {
            return Ok(Ledger::default());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    async fn save(&self, ledger: &Ledger) -> Result<(), LedgerError> {
        let json = serde_json::to_string_pretty(ledger)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !tokio::fs::try_exists(parent).await?
        {
            tokio::fs::create_dir_all(parent).await?;
            info!(dir = %parent.display(), "created ledger directory");
        }

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// In-memory store for tests, with switchable write failures.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    ledger: std::sync::Mutex<Ledger>,
    fail_writes: std::sync::atomic::AtomicBool,
    writes: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MemoryStore {
    pub fn with_ledger(ledger: Ledger) -> Self {
        Self {
            ledger: std::sync::Mutex::new(ledger),
            ..Default::default()
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Ledger {
        self.ledger.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl LedgerStore for MemoryStore {
    async fn load(&self) -> Result<Ledger, LedgerError> {
        Ok(self.snapshot())
    }

    async fn save(&self, ledger: &Ledger) -> Result<(), LedgerError> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(LedgerError::Io(std::io::Error::other("disk full")));
        }
        *self.ledger.lock().unwrap() = ledger.clone();
        self.writes
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn scratch_path(name: &str) -> PathBuf {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        std::env::temp_dir()
            .join(format!("babel-bot-{}-{nanos}", std::process::id()))
            .join(name)
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let store = JsonFileStore::new(scratch_path("missing.json"));
        let ledger = store.load().await.unwrap();
        assert!(ledger.communities.is_empty());
    }

    #[tokio::test]
    async fn test_save_creates_directory_and_reloads() {
        let path = scratch_path("babel.json");
        let store = JsonFileStore::new(&path);

        let mut ledger = Ledger::default();
        let stamp = DateTime::from_timestamp_millis(1_760_000_000_123).unwrap();
        ledger.community_mut("net", 120, stamp).total = 42;
        store.save(&ledger).await.unwrap();

        assert!(path.exists());
        assert!(!store.temp_path().exists());
        let reloaded = store.load().await.unwrap();
        assert_eq!(reloaded, ledger);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_sub_millisecond_stamp_reloads_at_millisecond_precision() {
        let path = scratch_path("precision.json");
        let store = JsonFileStore::new(&path);

        let mut ledger = Ledger::default();
        let stamp = DateTime::from_timestamp(1_760_000_000, 123_456_789).unwrap();
        ledger.community_mut("net", 120, stamp).total = 7;
        store.save(&ledger).await.unwrap();

        let reloaded = store.load().await.unwrap();
        let community = reloaded.community("net").unwrap();
        assert_eq!(community.total, 7);
        assert_eq!(
            community.last_updated,
            DateTime::from_timestamp_millis(1_760_000_000_123).unwrap()
        );

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let path = scratch_path("corrupt.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(&path);
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt(_)));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_empty_file_loads_empty() {
        let path = scratch_path("empty.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "  \n").unwrap();

        let ledger = JsonFileStore::new(&path).load().await.unwrap();
        assert!(ledger.communities.is_empty());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_failure_keeps_previous_document() {
        let store = MemoryStore::default();
        let mut ledger = Ledger::default();
        ledger.community_mut("net", 120, Utc::now()).total = 5;
        store.save(&ledger).await.unwrap();

        store.set_fail_writes(true);
        ledger.community_mut("net", 120, Utc::now()).total = 99;
        assert!(store.save(&ledger).await.is_err());
        assert_eq!(store.snapshot().community("net").unwrap().total, 5);
        assert_eq!(store.writes(), 1);
    }
}
