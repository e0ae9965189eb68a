//! Transport Adapter: the narrow interface the core needs from the host's
//! Host Card Emulation facility (enable/disable emulation and a
//! command-delivery callback), plus a loopback implementation for tests and
//! the demo binary.
//!
//! The real HCE bridge (platform NFC stack, AID registration) is out of
//! scope for this core; [`LoopbackTransport`] stands in for it.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors the transport boundary can raise. These never originate inside
/// the state machine itself; they describe the adapter's own failures (e.g.
/// the OS HCE registration), not APDU processing outcomes.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not enabled")]
    NotEnabled,

    #[error("transport already enabled")]
    AlreadyEnabled,
}

/// Implemented by the tag state machine: receives raw command-APDU
/// bytes and returns raw response-APDU bytes. The transport adapter invokes
/// this once per reader command; it performs no APDU parsing itself.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: &[u8]) -> Vec<u8>;
}

/// The HCE-facing interface this core depends on: register/unregister with
/// the platform and deliver command bytes to a [`CommandHandler`].
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Begin emulation: subsequent reader commands are delivered to `handler`.
    async fn enable(&self, handler: &(dyn CommandHandler)) -> Result<(), TransportError>;
    /// Stop emulation.
    async fn disable(&self) -> Result<(), TransportError>;
    /// True while emulation is active.
    async fn is_enabled(&self) -> bool;
}

/// An in-process transport that calls straight into a [`CommandHandler`]
/// without any OS HCE involvement, used by the demo binary's scripted
/// replay and by integration tests.
pub struct LoopbackTransport {
    enabled: Mutex<bool>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        LoopbackTransport {
            enabled: Mutex::new(false),
        }
    }

    /// Deliver one command to `handler` if emulation is enabled, mirroring
    /// what a real adapter does on each reader poll.
    pub async fn deliver(
        &self,
        handler: &(dyn CommandHandler),
        command: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        if !*self.enabled.lock().await {
            return Err(TransportError::NotEnabled);
        }
        Ok(handler.handle(command).await)
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportAdapter for LoopbackTransport {
    async fn enable(&self, _handler: &(dyn CommandHandler)) -> Result<(), TransportError> {
        let mut guard = self.enabled.lock().await;
        if *guard {
            return Err(TransportError::AlreadyEnabled);
        }
        *guard = true;
        Ok(())
    }

    async fn disable(&self) -> Result<(), TransportError> {
        *self.enabled.lock().await = false;
        Ok(())
    }

    async fn is_enabled(&self) -> bool {
        *self.enabled.lock().await
    }
}
