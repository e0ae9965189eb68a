use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ntag424_sdm_emu::config::Config;
use ntag424_sdm_emu::persistence::{FileConfigAdapter, PersistenceAdapter};
use ntag424_sdm_emu::tag::TagStateMachine;
use ntag424_sdm_emu::transport::{LoopbackTransport, TransportAdapter};

/// Demo binary: bootstraps a configuration record if none exists on disk,
/// enables the tag core over an in-process loopback transport, and replays
/// a scripted SELECT AID / SELECT NDEF / READ BINARY sequence for each tap,
/// printing the resulting LNURL. There is no real HCE bridge or reader here;
/// both are out of scope for the core and left to whatever platform
/// integration hosts it.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ntag424_sdm_emu=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let cli = Config::parse();

    let persistence = Arc::new(FileConfigAdapter::new(&cli.config_path));
    if persistence.load().await?.is_none() {
        let initial = cli
            .to_initial_record()
            .context("CLI-supplied key/UID material failed validation")?;
        persistence.save(&initial).await?;
        tracing::info!(path = %cli.config_path.display(), "bootstrapped new configuration record");
    }

    let tag = Arc::new(
        TagStateMachine::new(persistence.clone())
            .await
            .context("failed to load tag configuration")?,
    );
    let transport = LoopbackTransport::new();
    transport.enable(tag.as_ref()).await?;
    tracing::info!("emulation enabled, AID {:02X?}", ntag424_sdm_emu::tag::AID);

    for tap in 1..=cli.demo_taps {
        let select_aid = [
            0x00, 0xA4, 0x04, 0x00, 0x07, 0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01,
        ];
        let select_ndef = [0x00u8, 0xA4, 0x00, 0x00, 0x02, 0x00, 0x02];
        let read_binary = [0x00u8, 0xB0, 0x00, 0x00, 0xFF];

        transport.deliver(tag.as_ref(), &select_aid).await?;
        transport.deliver(tag.as_ref(), &select_ndef).await?;
        let response = transport.deliver(tag.as_ref(), &read_binary).await?;

        tracing::info!(tap, response = %hex::encode_upper(&response), "tap replayed");
    }

    transport.disable().await?;
    Ok(())
}
