//! Host TCP port allocation for concurrent sandboxes.
//!
//! Ports are claimed atomically before a container binds them and
//! released at stop time, so no two simultaneously-live sandboxes ever
//! hold the same port. Conflicts on a caller-supplied port fail fast
//! rather than retrying: starvation should be visible, not silently
//! serialized.

use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::Mutex;

use super::error::SandboxError;

/// How many random probes to try before giving up on a free port.
const MAX_PROBES: usize = 64;

/// A batch-scoped registry of claimed host ports.
///
/// Built once per run and shared (`Arc`) across all sandboxes; there is
/// deliberately no process-global registry.
#[derive(Debug, Default)]
pub struct PortAllocator {
    claimed: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims a block of `1 + extra` sequential ports starting at
    /// `preferred` (or a probed free port when unset).
    ///
    /// Returns the base port. Every port in the block is both free on
    /// the host and unclaimed by this allocator; otherwise the claim
    /// fails without retries for a caller-supplied port.
    pub fn claim(&self, preferred: Option<u16>, extra: u16) -> Result<u16, SandboxError> {
        if let Some(base) = preferred {
            self.try_claim_block(base, extra)?;
            return Ok(base);
        }

        // Probe OS-assigned ports until a block fits.
        for _ in 0..MAX_PROBES {
            let candidate = probe_free_port()?;
            if self.try_claim_block(candidate, extra).is_ok() {
                return Ok(candidate);
            }
        }
        Err(SandboxError::PortExhausted {
            message: format!("no free block of {} ports after {MAX_PROBES} probes", 1 + extra),
        })
    }

    /// Releases a previously claimed block.
    pub fn release(&self, base: u16, extra: u16) {
        let mut claimed = self.claimed.lock().expect("port registry poisoned");
        for port in block(base, extra) {
            claimed.remove(&port);
        }
    }

    /// Number of currently claimed ports. For diagnostics and tests.
    pub fn claimed_count(&self) -> usize {
        self.claimed.lock().expect("port registry poisoned").len()
    }

    fn try_claim_block(&self, base: u16, extra: u16) -> Result<(), SandboxError> {
        // The whole block must fit within the port range; a truncated
        // block would hand out non-sequential ports.
        if base.checked_add(extra).is_none() {
            return Err(SandboxError::PortUnavailable { port: base });
        }
        let mut claimed = self.claimed.lock().expect("port registry poisoned");
        for port in block(base, extra) {
            if claimed.contains(&port) || !port_is_free(port) {
                return Err(SandboxError::PortUnavailable { port });
            }
        }
        claimed.extend(block(base, extra));
        Ok(())
    }
}

fn block(base: u16, extra: u16) -> impl Iterator<Item = u16> {
    (0..=u32::from(extra)).map_while(move |offset| u16::try_from(u32::from(base) + offset).ok())
}

/// Binds an ephemeral port to discover a free one, then releases it.
fn probe_free_port() -> Result<u16, SandboxError> {
    let listener =
        TcpListener::bind(("127.0.0.1", 0)).map_err(|e| SandboxError::PortExhausted {
            message: e.to_string(),
        })?;
    let port = listener
        .local_addr()
        .map_err(|e| SandboxError::PortExhausted {
            message: e.to_string(),
        })?
        .port();
    Ok(port)
}

/// Whether the port can currently be bound on the loopback interface.
fn port_is_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Globally-unique container name, safe under concurrent starts.
pub fn unique_container_name(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}
