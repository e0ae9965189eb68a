//! Tag State Machine: tracks the currently selected application/file, owns
//! the counter-increment-and-persist sequence, and dispatches SELECT / READ
//! BINARY. This is the composition point: the APDU codec parses, the SDM
//! builder builds the NDEF payload lazily, and the persistence adapter
//! commits the counter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::apdu::{
    CommandApdu, ResponseApdu, SW_CLA_NOT_SUPPORTED, SW_FILE_NOT_FOUND, SW_INS_NOT_SUPPORTED,
    SW_NO_PRECISE_DIAGNOSIS, SW_SECURITY_STATUS_NOT_SATISFIED, SW_SUCCESS,
};
use crate::models::{Keys, Uid};
use crate::persistence::PersistenceAdapter;
use crate::sdm;
use crate::transport::CommandHandler;

/// The application identifier a reader selects to reach this tag.
pub const AID: [u8; 7] = [0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01];

/// Capability Container content returned verbatim for reads of file `0x01`:
/// NDEF v4.0, max read size 64, free read, free write.
pub const CC_BYTES: [u8; 6] = [0xE1, 0x40, 0x00, 0x40, 0x00, 0x00];

/// How long a generated NDEF payload stays cached with no activity before
/// the next offset-0 read is treated as a fresh tap.
const NDEF_CACHE_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors raised constructing the state machine.
#[derive(Debug, Error)]
pub enum TagError {
    #[error("no configuration available; emulator cannot be enabled")]
    MissingConfiguration,
}

/// The small closed set of files this core knows about, modeled as a sum
/// type rather than a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileId {
    /// Capability Container, file `0x01`.
    Cc,
    /// NDEF message file, file `0x02`.
    Ndef,
    /// Proprietary file `0x03`: selectable but carries no content this core
    /// defines; reads return an empty body.
    Proprietary,
}

impl FileId {
    fn from_select_data(data: &[u8]) -> Option<Self> {
        let byte = match data {
            [b] => *b,
            [0x00, b] => *b,
            _ => return None,
        };
        match byte {
            0x01 => Some(FileId::Cc),
            0x02 => Some(FileId::Ndef),
            0x03 => Some(FileId::Proprietary),
            _ => None,
        }
    }
}

/// The selection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    AppSelected,
    FileSelected { file_id: FileId },
}

struct CachedNdef {
    bytes: Vec<u8>,
    generated_at: Instant,
}

/// Configuration fields the state machine needs on every read; the counter
/// itself is not cached here since [`PersistenceAdapter`] is its sole owner.
struct ConfigSnapshot {
    uid: Uid,
    keys: Keys,
    card_id: String,
    lnurl_base: String,
}

struct Inner {
    state: State,
    config: ConfigSnapshot,
    ndef_cache: Option<CachedNdef>,
}

/// The tag's protocol core. One instance per emulated card; all command
/// processing is serialized through the inner mutex. The critical section
/// spans read-counter, increment, persist, build-response.
pub struct TagStateMachine {
    persistence: Arc<dyn PersistenceAdapter>,
    inner: Mutex<Inner>,
}

impl TagStateMachine {
    /// Load configuration from `persistence` and start in [`State::Idle`],
    /// as on every emulation enable.
    pub async fn new(persistence: Arc<dyn PersistenceAdapter>) -> Result<Self, TagError> {
        let config = persistence
            .load()
            .await
            .ok()
            .flatten()
            .ok_or(TagError::MissingConfiguration)?;

        Ok(TagStateMachine {
            persistence,
            inner: Mutex::new(Inner {
                state: State::Idle,
                config: ConfigSnapshot {
                    uid: config.uid,
                    keys: config.keys,
                    card_id: config.card_id,
                    lnurl_base: config.lnurl_base,
                },
                ndef_cache: None,
            }),
        })
    }

    /// Current selection state, mainly for tests and diagnostics.
    pub async fn current_state(&self) -> State {
        self.inner.lock().await.state
    }

    /// Reset to [`State::Idle`] and drop any cached NDEF bytes, as on
    /// emulation disable.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = State::Idle;
        inner.ndef_cache = None;
    }

    async fn handle_select(&self, apdu: &CommandApdu) -> ResponseApdu {
        let mut inner = self.inner.lock().await;

        if apdu.p1 == 0x04 && apdu.p2 == 0x00 {
            if apdu.data == AID {
                inner.state = State::AppSelected;
                inner.ndef_cache = None;
                ResponseApdu::status_only(SW_SUCCESS)
            } else {
                debug!("SELECT by DF-name: unknown AID");
                ResponseApdu::status_only(SW_FILE_NOT_FOUND)
            }
        } else if apdu.p1 == 0x00 && apdu.p2 == 0x00 {
            match FileId::from_select_data(&apdu.data) {
                Some(file_id) => {
                    inner.state = State::FileSelected { file_id };
                    inner.ndef_cache = None;
                    ResponseApdu::status_only(SW_SUCCESS)
                }
                None => ResponseApdu::status_only(SW_FILE_NOT_FOUND),
            }
        } else {
            ResponseApdu::status_only(SW_FILE_NOT_FOUND)
        }
    }

    async fn handle_read_binary(&self, apdu: &CommandApdu) -> ResponseApdu {
        let mut inner = self.inner.lock().await;

        let file_id = match inner.state {
            State::FileSelected { file_id } => file_id,
            _ => return ResponseApdu::status_only(SW_SECURITY_STATUS_NOT_SATISFIED),
        };

        let offset = ((apdu.p1 as usize) << 8) | apdu.p2 as usize;
        let le = apdu.le.unwrap_or(256) as usize;

        let content = match file_id {
            FileId::Cc => CC_BYTES.to_vec(),
            FileId::Proprietary => Vec::new(),
            FileId::Ndef => match self.ndef_content(&mut inner, offset).await {
                Ok(bytes) => bytes,
                Err(resp) => return resp,
            },
        };

        if offset >= content.len() {
            return ResponseApdu::new(Vec::new(), SW_SUCCESS);
        }
        let end = (offset + le).min(content.len());
        ResponseApdu::new(content[offset..end].to_vec(), SW_SUCCESS)
    }

    /// Resolve the NDEF file's current content, regenerating and
    /// incrementing the counter exactly when a fresh tap is observed
    /// (the cache is empty or has aged past the idle timeout).
    async fn ndef_content(&self, inner: &mut Inner, offset: usize) -> Result<Vec<u8>, ResponseApdu> {
        let cache_valid = inner
            .ndef_cache
            .as_ref()
            .is_some_and(|c| c.generated_at.elapsed() < NDEF_CACHE_IDLE_TIMEOUT);

        if cache_valid {
            return Ok(inner.ndef_cache.as_ref().unwrap().bytes.clone());
        }

        if offset != 0 {
            // No valid cache and a non-zero-offset read: nothing has been
            // generated for this session yet. Treat the file as empty
            // rather than guess at a regeneration the reader didn't ask for.
            return Ok(Vec::new());
        }

        let counter = self.persistence.increment_counter().await.map_err(|e| {
            warn!(error = %e, "counter persistence commit failed");
            ResponseApdu::status_only(SW_NO_PRECISE_DIAGNOSIS)
        })?;

        let ndef = sdm::build_sdm_ndef(
            &inner.config.uid,
            counter,
            &inner.config.keys.k1,
            &inner.config.keys.k2,
            &inner.config.lnurl_base,
            &inner.config.card_id,
        )
        .map_err(|e| {
            warn!(error = %e, "SDM/NDEF build failed");
            ResponseApdu::status_only(SW_NO_PRECISE_DIAGNOSIS)
        })?;

        inner.ndef_cache = Some(CachedNdef {
            bytes: ndef.clone(),
            generated_at: Instant::now(),
        });
        Ok(ndef)
    }
}

#[async_trait]
impl CommandHandler for TagStateMachine {
    async fn handle(&self, command: &[u8]) -> Vec<u8> {
        let apdu = match CommandApdu::parse(command) {
            Ok(apdu) => apdu,
            Err(e) => {
                debug!(error = %e, "malformed command APDU");
                return ResponseApdu::status_only(SW_NO_PRECISE_DIAGNOSIS).to_bytes();
            }
        };

        if apdu.cla != 0x00 {
            return ResponseApdu::status_only(SW_CLA_NOT_SUPPORTED).to_bytes();
        }

        let response = match apdu.ins {
            0xA4 => self.handle_select(&apdu).await,
            0xB0 => self.handle_read_binary(&apdu).await,
            _ => ResponseApdu::status_only(SW_INS_NOT_SUPPORTED),
        };
        response.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfigRecord, Counter};
    use crate::persistence::InMemoryPersistenceAdapter;

    fn select_aid_bytes() -> Vec<u8> {
        vec![0x00, 0xA4, 0x04, 0x00, 0x07, 0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01]
    }

    fn select_ndef_bytes() -> Vec<u8> {
        vec![0x00, 0xA4, 0x00, 0x00, 0x02, 0x00, 0x02]
    }

    fn read_binary_bytes(offset: u16, le: u8) -> Vec<u8> {
        vec![0x00, 0xB0, (offset >> 8) as u8, offset as u8, le]
    }

    async fn machine_with_counter(counter: u32) -> (TagStateMachine, Arc<InMemoryPersistenceAdapter>) {
        let config = ConfigRecord {
            keys: Keys::new([0u8; 16], [0u8; 16], [0u8; 16]),
            uid: Uid::from_hex("04AABBCCDDEEFF").unwrap(),
            card_id: "cid".to_string(),
            lnurl_base: "https://example.com/boltcard".to_string(),
            counter: Counter::new(counter).unwrap(),
            enabled: true,
        };
        let persistence = Arc::new(InMemoryPersistenceAdapter::new(config));
        let machine = TagStateMachine::new(persistence.clone()).await.unwrap();
        (machine, persistence)
    }

    #[tokio::test]
    async fn scenario_select_aid_then_ndef_then_read_advances_counter() {
        let (machine, persistence) = machine_with_counter(0).await;

        let resp = machine.handle(&select_aid_bytes()).await;
        assert_eq!(resp, vec![0x90, 0x00]);

        let resp = machine.handle(&select_ndef_bytes()).await;
        assert_eq!(resp, vec![0x90, 0x00]);

        let resp = machine.handle(&read_binary_bytes(0, 0xFF)).await;
        assert_eq!(resp[0], 0x03); // NDEF-message TLV tag
        assert_eq!(&resp[resp.len() - 2..], &[0x90, 0x00]);
        assert_eq!(resp[resp.len() - 3], 0xFE); // terminator TLV before SW

        let counter = persistence.load().await.unwrap().unwrap().counter;
        assert_eq!(counter.value(), 1);
    }

    #[tokio::test]
    async fn counter_wraps_from_fffffe_through_ffffff_to_zero() {
        let (machine, persistence) = machine_with_counter(0xFFFFFE).await;
        machine.handle(&select_aid_bytes()).await;

        machine.handle(&select_ndef_bytes()).await;
        machine.handle(&read_binary_bytes(0, 0xFF)).await;
        assert_eq!(
            persistence.load().await.unwrap().unwrap().counter.value(),
            0xFFFFFF
        );

        machine.handle(&select_ndef_bytes()).await;
        machine.handle(&read_binary_bytes(0, 0xFF)).await;
        assert_eq!(
            persistence.load().await.unwrap().unwrap().counter.value(),
            0x000000
        );
    }

    #[tokio::test]
    async fn read_before_select_is_rejected() {
        let (machine, _persistence) = machine_with_counter(0).await;
        let resp = machine.handle(&read_binary_bytes(0, 0xFF)).await;
        assert_eq!(resp, vec![0x69, 0x82]);
    }

    #[tokio::test]
    async fn wrong_aid_is_rejected_and_state_stays_idle() {
        let (machine, _persistence) = machine_with_counter(0).await;
        let wrong_aid = vec![
            0x00, 0xA4, 0x04, 0x00, 0x07, 0xA0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let resp = machine.handle(&wrong_aid).await;
        assert_eq!(resp, vec![0x6A, 0x82]);
        assert_eq!(machine.current_state().await, State::Idle);

        let resp = machine.handle(&read_binary_bytes(0, 0xFF)).await;
        assert_eq!(resp, vec![0x69, 0x82]);
    }

    #[tokio::test]
    async fn persistence_failure_yields_6f00_and_counter_unchanged() {
        let (machine, persistence) = machine_with_counter(0).await;
        machine.handle(&select_aid_bytes()).await;
        machine.handle(&select_ndef_bytes()).await;

        persistence.fail_next_commit();
        let resp = machine.handle(&read_binary_bytes(0, 0xFF)).await;
        assert_eq!(resp, vec![0x6F, 0x00]);
        assert_eq!(persistence.load().await.unwrap().unwrap().counter.value(), 0);

        // re-select required since the failed attempt didn't populate a cache,
        // and the next attempt must succeed normally.
        machine.handle(&select_ndef_bytes()).await;
        let resp = machine.handle(&read_binary_bytes(0, 0xFF)).await;
        assert_eq!(&resp[resp.len() - 2..], &[0x90, 0x00]);
        assert_eq!(persistence.load().await.unwrap().unwrap().counter.value(), 1);
    }

    #[tokio::test]
    async fn two_consecutive_select_ndef_read_sequences_differ() {
        let (machine, _persistence) = machine_with_counter(0).await;
        machine.handle(&select_aid_bytes()).await;
        machine.handle(&select_ndef_bytes()).await;
        let first = machine.handle(&read_binary_bytes(0, 0xFF)).await;

        machine.handle(&select_ndef_bytes()).await;
        let second = machine.handle(&read_binary_bytes(0, 0xFF)).await;

        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn repeated_offset_zero_read_without_reselect_reuses_cache() {
        let (machine, persistence) = machine_with_counter(0).await;
        machine.handle(&select_aid_bytes()).await;
        machine.handle(&select_ndef_bytes()).await;

        let first = machine.handle(&read_binary_bytes(0, 0xFF)).await;
        let second = machine.handle(&read_binary_bytes(0, 0xFF)).await;
        assert_eq!(first, second);
        assert_eq!(persistence.load().await.unwrap().unwrap().counter.value(), 1);
    }

    #[tokio::test]
    async fn cc_file_reads_return_capability_container_bytes() {
        let (machine, _persistence) = machine_with_counter(0).await;
        machine.handle(&select_aid_bytes()).await;
        let resp = machine
            .handle(&[0x00, 0xA4, 0x00, 0x00, 0x02, 0x00, 0x01])
            .await;
        assert_eq!(resp, vec![0x90, 0x00]);

        let resp = machine.handle(&read_binary_bytes(0, 0xFF)).await;
        assert_eq!(&resp[0..6], &CC_BYTES);
        assert_eq!(&resp[6..], &[0x90, 0x00]);
    }

    #[tokio::test]
    async fn unknown_instruction_is_rejected() {
        let (machine, _persistence) = machine_with_counter(0).await;
        let resp = machine.handle(&[0x00, 0xEE, 0x00, 0x00]).await;
        assert_eq!(resp, vec![0x6D, 0x00]);
    }

    #[tokio::test]
    async fn unknown_class_is_rejected() {
        let (machine, _persistence) = machine_with_counter(0).await;
        let resp = machine.handle(&[0x80, 0xA4, 0x04, 0x00]).await;
        assert_eq!(resp, vec![0x6E, 0x00]);
    }

    #[tokio::test]
    async fn malformed_apdu_yields_no_precise_diagnosis() {
        let (machine, _persistence) = machine_with_counter(0).await;
        let resp = machine.handle(&[0x00, 0xB0]).await;
        assert_eq!(resp, vec![0x6F, 0x00]);
    }
}
