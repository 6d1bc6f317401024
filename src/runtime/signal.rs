//! SIGINT/SIGTERM delivery into the event loop.
//!
//! `signal-hook-mio` records the signals and exposes them as a readiness
//! source, so a termination request shows up as an ordinary poll event.

use mio::event::Source;
use mio::{Interest, Registry, Token};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_mio::v1_0::Signals;
use std::io;
use tracing::debug;

/// Termination signals watched by the event loop.
pub struct TerminationSignals {
    signals: Signals,
}

impl TerminationSignals {
    /// Start recording SIGINT and SIGTERM.
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            signals: Signals::new([SIGINT, SIGTERM])?,
        })
    }

    /// Consume pending signals. Returns whether any arrived.
    pub fn drain(&mut self) -> bool {
        let mut received = false;
        for signum in self.signals.pending() {
            debug!(signum, "Signal received");
            received = true;
        }
        received
    }
}

impl Source for TerminationSignals {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.signals.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.signals.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.signals.deregister(registry)
    }
}
