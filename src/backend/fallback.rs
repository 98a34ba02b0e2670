//! Backend built on the crate's own ring transport.

use std::io;

use tracing::debug;

use crate::abi::Cqe;
use crate::config::RingConfig;
use crate::error::Result;
use crate::ring::{RingTransport, SlotHandle};

use super::{Backend, BackendKind};

/// Self-contained backend: raw system calls, no helper library.
///
/// Every preparation routine is the trait's built-in default.
#[derive(Debug)]
pub struct FallbackBackend {
    ring: RingTransport,
}

impl FallbackBackend {
    /// Create and map a ring of `config.entries` slots.
    pub fn new(config: &RingConfig) -> Result<Self> {
        let ring = RingTransport::map(config.entries, config)?;
        debug!(
            sq_entries = ring.sq_entries(),
            cq_entries = ring.cq_entries(),
            "using built-in ring transport"
        );
        Ok(Self { ring })
    }

    /// The underlying transport.
    pub fn transport(&self) -> &RingTransport {
        &self.ring
    }
}

impl Backend for FallbackBackend {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Fallback
    }

    fn sq_entries(&self) -> u32 {
        self.ring.sq_entries()
    }

    fn cq_entries(&self) -> u32 {
        self.ring.cq_entries()
    }

    fn space_left(&self) -> u32 {
        self.ring.space_left()
    }

    fn acquire_slot(&mut self) -> Result<SlotHandle> {
        self.ring.acquire_slot()
    }

    fn submit(&mut self, wait_nr: u32) -> io::Result<u32> {
        self.ring.publish(wait_nr)
    }

    fn ready(&self) -> u32 {
        self.ring.ready()
    }

    fn drain(&mut self, max: usize, out: &mut Vec<Cqe>) -> usize {
        if self.ring.ready() == 0 {
            if let Err(e) = self.ring.flush_overflow() {
                debug!(error = %e, "CQ overflow flush failed");
            }
        }
        let before = out.len();
        out.extend(self.ring.drain(max));
        out.len() - before
    }
}
