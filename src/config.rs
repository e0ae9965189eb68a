//! CLI/environment configuration for the demo binary. Key generation and
//! the configuration UI are out of scope for the core itself, but something
//! has to hand the core its first [`crate::models::ConfigRecord`].

use std::path::PathBuf;

use clap::Parser;

use crate::models::{ConfigRecord, Counter, Keys, ModelError, Uid};

/// Demo-binary configuration: where the on-disk card record lives, and the
/// values to bootstrap it with the first time it doesn't exist yet.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Path to the JSON-encoded configuration record.
    #[arg(long, env = "NTAG424_CONFIG_PATH", default_value = "./data/card.json")]
    pub config_path: PathBuf,

    /// Card identifier embedded in the LNURL path.
    #[arg(long, env = "NTAG424_CARD_ID", default_value = "demo")]
    pub card_id: String,

    /// Base URL the server expects SDM reads to be posted against.
    #[arg(long, env = "NTAG424_LNURL_BASE", default_value = "https://example.com/boltcard")]
    pub lnurl_base: String,

    /// 14-character uppercase hex UID, NXP manufacturer byte `04` first.
    #[arg(long, env = "NTAG424_UID", default_value = "04AABBCCDDEEFF")]
    pub uid: String,

    /// 32-character uppercase hex master authentication key (unused by reads).
    #[arg(long, env = "NTAG424_K0", default_value = "00000000000000000000000000000000")]
    pub k0: String,

    /// 32-character uppercase hex `SDMMetaReadKey`.
    #[arg(long, env = "NTAG424_K1", default_value = "00000000000000000000000000000000")]
    pub k1: String,

    /// 32-character uppercase hex `SDMFileReadKey`.
    #[arg(long, env = "NTAG424_K2", default_value = "00000000000000000000000000000000")]
    pub k2: String,

    /// Number of scripted reader taps the demo binary replays against the
    /// in-process loopback transport.
    #[arg(long, env = "NTAG424_DEMO_TAPS", default_value = "3")]
    pub demo_taps: u32,
}

impl Config {
    /// Build the initial configuration record this CLI describes, validating
    /// every hex field along the way. A bad key/UID here is a configuration
    /// error, caught before emulation is ever enabled.
    pub fn to_initial_record(&self) -> Result<ConfigRecord, ModelError> {
        use crate::bytes::hex_decode_exact;

        Ok(ConfigRecord {
            keys: Keys::new(
                hex_decode_exact(&self.k0)?,
                hex_decode_exact(&self.k1)?,
                hex_decode_exact(&self.k2)?,
            ),
            uid: Uid::from_hex(&self.uid)?,
            card_id: self.card_id.clone(),
            lnurl_base: self.lnurl_base.clone(),
            counter: Counter::zero(),
            enabled: true,
        })
    }
}
