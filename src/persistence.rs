//! Persistence & Config Adapter: the narrow interface the core needs from a
//! key-value store, plus a JSON-file-backed implementation and an in-memory
//! test double.
//!
//! This is interface surface the core depends on, not something it owns end
//! to end, so it is expressed as a trait: the core can be exercised without
//! a filesystem at all.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::{ConfigRecord, ConfigRecordDto, Counter, ModelError};

/// Errors the persistence boundary can raise.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("config record is malformed: {0}")]
    Serde(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    /// Injected or real commit failure during the counter path. The state
    /// machine must turn this into SW `6F00` without advancing the counter
    /// it already had in hand.
    #[error("counter commit failed")]
    CommitFailed,
}

/// The persistence/config boundary consumed by [`crate::tag::TagStateMachine`].
/// `increment_counter` must be atomic: the new value is durable before it
/// returns, since the state machine treats its success as authorization to
/// answer the reader with the corresponding PICCData.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn load(&self) -> Result<Option<ConfigRecord>, PersistenceError>;
    async fn save(&self, config: &ConfigRecord) -> Result<(), PersistenceError>;
    async fn increment_counter(&self) -> Result<Counter, PersistenceError>;
    async fn set_counter(&self, value: Counter) -> Result<(), PersistenceError>;
}

/// JSON-file-backed adapter: the whole [`ConfigRecord`] lives in one file,
/// round-tripped through [`ConfigRecordDto`]'s hex-string on-disk encoding.
pub struct FileConfigAdapter {
    path: PathBuf,
}

impl FileConfigAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileConfigAdapter { path: path.into() }
    }

    async fn read_dto(&self) -> Result<Option<ConfigRecordDto>, PersistenceError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let dto: ConfigRecordDto = serde_json::from_slice(&bytes)
                    .map_err(|e| PersistenceError::Serde(e.to_string()))?;
                Ok(Some(dto))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::Io(e.to_string())),
        }
    }

    async fn write_dto(&self, dto: &ConfigRecordDto) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec_pretty(dto)
            .map_err(|e| PersistenceError::Serde(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistenceError::Io(e.to_string()))?;
        }
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| PersistenceError::Io(e.to_string()))
    }
}

#[async_trait]
impl PersistenceAdapter for FileConfigAdapter {
    async fn load(&self) -> Result<Option<ConfigRecord>, PersistenceError> {
        match self.read_dto().await? {
            Some(dto) => Ok(Some(ConfigRecord::try_from(dto)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, config: &ConfigRecord) -> Result<(), PersistenceError> {
        self.write_dto(&ConfigRecordDto::from(config)).await
    }

    async fn increment_counter(&self) -> Result<Counter, PersistenceError> {
        let mut dto = self
            .read_dto()
            .await?
            .ok_or_else(|| PersistenceError::Io("no configuration on disk".to_string()))?;
        let next = Counter::new(dto.counter)?.increment_wrapping();
        dto.counter = next.value();
        self.write_dto(&dto).await?;
        Ok(next)
    }

    async fn set_counter(&self, value: Counter) -> Result<(), PersistenceError> {
        let mut dto = self
            .read_dto()
            .await?
            .ok_or_else(|| PersistenceError::Io("no configuration on disk".to_string()))?;
        dto.counter = value.value();
        self.write_dto(&dto).await
    }
}

/// In-memory adapter for tests and demos: holds one [`ConfigRecord`] behind
/// a mutex, with an optional fault-injection switch so callers can exercise
/// the `6F00`/counter-unchanged path without touching a filesystem.
pub struct InMemoryPersistenceAdapter {
    state: Mutex<Option<ConfigRecord>>,
    fail_next_commit: AtomicBool,
}

impl InMemoryPersistenceAdapter {
    pub fn new(initial: ConfigRecord) -> Self {
        InMemoryPersistenceAdapter {
            state: Mutex::new(Some(initial)),
            fail_next_commit: AtomicBool::new(false),
        }
    }

    pub fn empty() -> Self {
        InMemoryPersistenceAdapter {
            state: Mutex::new(None),
            fail_next_commit: AtomicBool::new(false),
        }
    }

    /// Make the next `increment_counter` call fail, simulating a storage
    /// outage during the counter commit.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PersistenceAdapter for InMemoryPersistenceAdapter {
    async fn load(&self) -> Result<Option<ConfigRecord>, PersistenceError> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, config: &ConfigRecord) -> Result<(), PersistenceError> {
        *self.state.lock().await = Some(config.clone());
        Ok(())
    }

    async fn increment_counter(&self) -> Result<Counter, PersistenceError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(PersistenceError::CommitFailed);
        }
        let mut guard = self.state.lock().await;
        let config = guard
            .as_mut()
            .ok_or_else(|| PersistenceError::Io("no configuration loaded".to_string()))?;
        config.counter = config.counter.increment_wrapping();
        Ok(config.counter)
    }

    async fn set_counter(&self, value: Counter) -> Result<(), PersistenceError> {
        let mut guard = self.state.lock().await;
        let config = guard
            .as_mut()
            .ok_or_else(|| PersistenceError::Io("no configuration loaded".to_string()))?;
        config.counter = value;
        Ok(())
    }
}

/// Test helper constructing a minimal valid record.
#[cfg(test)]
fn sample_config() -> ConfigRecord {
    use crate::models::{Keys, Uid};
    ConfigRecord {
        keys: Keys::new([0u8; 16], [1u8; 16], [2u8; 16]),
        uid: Uid::from_hex("04AABBCCDDEEFF").unwrap(),
        card_id: "card1".to_string(),
        lnurl_base: "https://example.com/boltcard".to_string(),
        counter: Counter::zero(),
        enabled: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_adapter_round_trips_and_increments() {
        let adapter = InMemoryPersistenceAdapter::new(sample_config());
        let loaded = adapter.load().await.unwrap().unwrap();
        assert_eq!(loaded.counter, Counter::zero());

        let next = adapter.increment_counter().await.unwrap();
        assert_eq!(next.value(), 1);
    }

    #[tokio::test]
    async fn in_memory_adapter_honors_fail_injection() {
        let adapter = InMemoryPersistenceAdapter::new(sample_config());
        adapter.fail_next_commit();
        let err = adapter.increment_counter().await.unwrap_err();
        assert!(matches!(err, PersistenceError::CommitFailed));

        // counter must be unchanged, and the next call succeeds normally
        let loaded = adapter.load().await.unwrap().unwrap();
        assert_eq!(loaded.counter, Counter::zero());
        let next = adapter.increment_counter().await.unwrap();
        assert_eq!(next.value(), 1);
    }

    #[tokio::test]
    async fn file_adapter_round_trips_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path: &Path = dir.path();
        let adapter = FileConfigAdapter::new(path.join("config.json"));

        assert!(adapter.load().await.unwrap().is_none());

        adapter.save(&sample_config()).await.unwrap();
        let loaded = adapter.load().await.unwrap().unwrap();
        assert_eq!(loaded.card_id, "card1");

        let next = adapter.increment_counter().await.unwrap();
        assert_eq!(next.value(), 1);
        let loaded = adapter.load().await.unwrap().unwrap();
        assert_eq!(loaded.counter.value(), 1);
    }
}
