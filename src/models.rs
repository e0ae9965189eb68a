//! Core value types for the tag's identity and configuration.
//!
//! These are small validated wrappers rather than bare byte slices/ints, so
//! the data-model invariants ("UID size is invariant", "counter wraps mod
//! 2^24") are enforced once at construction instead of re-checked at every
//! call site.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::bytes::{self, BytesError};

/// The 24-bit counter's modulus.
const COUNTER_MODULUS: u32 = 1 << 24;

/// Errors raised constructing or decoding the value types in this module.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("UID must start with the NXP manufacturer code 0x04, got {0:#04X}")]
    WrongManufacturerCode(u8),

    #[error("counter value {0:#08X} exceeds 24 bits")]
    CounterOutOfRange(u32),

    #[error(transparent)]
    Bytes(#[from] BytesError),
}

/// The tag's 7-byte UID. Immutable after creation; the first byte must be
/// the NXP manufacturer code `0x04`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uid([u8; 7]);

impl Uid {
    pub fn new(bytes: [u8; 7]) -> Result<Self, ModelError> {
        if bytes[0] != 0x04 {
            return Err(ModelError::WrongManufacturerCode(bytes[0]));
        }
        Ok(Uid(bytes))
    }

    pub fn from_hex(s: &str) -> Result<Self, ModelError> {
        let bytes: [u8; 7] = bytes::hex_decode_exact(s)?;
        Self::new(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 7] {
        &self.0
    }

    pub fn to_hex_upper(&self) -> String {
        bytes::hex_encode_upper(&self.0)
    }
}

/// The 24-bit monotonic tap counter, wire-coded big-endian, wrapping from
/// `0xFFFFFF` to `0x000000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Counter(u32);

impl Counter {
    pub fn new(value: u32) -> Result<Self, ModelError> {
        if value >= COUNTER_MODULUS {
            return Err(ModelError::CounterOutOfRange(value));
        }
        Ok(Counter(value))
    }

    pub fn zero() -> Self {
        Counter(0)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// Increment by one, wrapping mod 2^24 (the hardware tag's behavior).
    pub fn increment_wrapping(self) -> Self {
        Counter((self.0 + 1) % COUNTER_MODULUS)
    }

    pub fn to_be_bytes(&self) -> [u8; 3] {
        bytes::u24_to_be_bytes(self.0)
    }

    pub fn from_be_bytes(bytes: [u8; 3]) -> Self {
        Counter(bytes::u24_from_be_bytes(bytes))
    }
}

/// The three 128-bit master keys stored per card. `k0` is the
/// authentication master key, unused by this read-only core but carried so
/// the on-disk configuration round-trips faithfully. Zeroized on drop since
/// key material should not linger in memory longer than necessary.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Keys {
    pub k0: [u8; 16],
    pub k1: [u8; 16],
    pub k2: [u8; 16],
}

impl Keys {
    pub fn new(k0: [u8; 16], k1: [u8; 16], k2: [u8; 16]) -> Self {
        Keys { k0, k1, k2 }
    }
}

impl std::fmt::Debug for Keys {
    /// Never print key material, even in debug builds.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys").finish_non_exhaustive()
    }
}

/// The on-disk configuration record: round-tripped by a
/// [`crate::persistence::PersistenceAdapter`] as 32-character uppercase hex
/// keys, a 14-character uppercase hex UID, a plain counter integer, and the
/// URL-safe `card_id`/`lnurl_base` strings.
#[derive(Clone)]
pub struct ConfigRecord {
    pub keys: Keys,
    pub uid: Uid,
    pub card_id: String,
    pub lnurl_base: String,
    pub counter: Counter,
    pub enabled: bool,
}

/// Serde-friendly mirror of [`ConfigRecord`] using the on-disk hex encoding
/// above; `ConfigRecord` converts to/from this at the adapter boundary.
#[derive(Serialize, Deserialize)]
pub struct ConfigRecordDto {
    pub k0: String,
    pub k1: String,
    pub k2: String,
    pub uid: String,
    pub card_id: String,
    pub lnurl_base: String,
    pub counter: u32,
    pub enabled: bool,
}

impl TryFrom<ConfigRecordDto> for ConfigRecord {
    type Error = ModelError;

    fn try_from(dto: ConfigRecordDto) -> Result<Self, Self::Error> {
        Ok(ConfigRecord {
            keys: Keys::new(
                bytes::hex_decode_exact(&dto.k0)?,
                bytes::hex_decode_exact(&dto.k1)?,
                bytes::hex_decode_exact(&dto.k2)?,
            ),
            uid: Uid::from_hex(&dto.uid)?,
            card_id: dto.card_id,
            lnurl_base: dto.lnurl_base,
            counter: Counter::new(dto.counter)?,
            enabled: dto.enabled,
        })
    }
}

impl From<&ConfigRecord> for ConfigRecordDto {
    fn from(cfg: &ConfigRecord) -> Self {
        ConfigRecordDto {
            k0: bytes::hex_encode_upper(&cfg.keys.k0),
            k1: bytes::hex_encode_upper(&cfg.keys.k1),
            k2: bytes::hex_encode_upper(&cfg.keys.k2),
            uid: cfg.uid.to_hex_upper(),
            card_id: cfg.card_id.clone(),
            lnurl_base: cfg.lnurl_base.clone(),
            counter: cfg.counter.value(),
            enabled: cfg.enabled,
        }
    }
}
