//! Readiness rendezvous between the transport and the engine.
//!
//! The connector may learn about the two in either order: the data
//! channel layer settles whenever the network does, and the engine
//! attaches whenever the host wires it up. [`ReadyGate`] collapses the
//! two-sided wait into a single question — "did this signal just make
//! both sides ready?" — answered `true` exactly once.

use std::sync::Mutex;

/// One side of the rendezvous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// The transport's connection future resolved.
    Transport,
    /// The replication engine attached.
    Engine,
}

#[derive(Debug, Default)]
struct Flags {
    transport: bool,
    engine: bool,
    fired: bool,
}

/// Two-signal gate that opens exactly once.
///
/// Signals are idempotent; repeating one never re-opens the gate.
#[derive(Debug, Default)]
pub struct ReadyGate {
    inner: Mutex<Flags>,
}

impl ReadyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `signal`. Returns `true` on the one call that completes
    /// the pair, regardless of arrival order.
    pub fn open(&self, signal: Signal) -> bool {
        let mut flags = self.inner.lock().unwrap();
        match signal {
            Signal::Transport => flags.transport = true,
            Signal::Engine => flags.engine = true,
        }
        if flags.transport && flags.engine && !flags.fired {
            flags.fired = true;
            true
        } else {
            false
        }
    }

    /// Whether both signals have arrived.
    pub fn is_open(&self) -> bool {
        self.inner.lock().unwrap().fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_on_second_signal_transport_first() {
        let gate = ReadyGate::new();
        assert!(!gate.open(Signal::Transport));
        assert!(!gate.is_open());
        assert!(gate.open(Signal::Engine));
        assert!(gate.is_open());
    }

    #[test]
    fn test_opens_on_second_signal_engine_first() {
        let gate = ReadyGate::new();
        assert!(!gate.open(Signal::Engine));
        assert!(gate.open(Signal::Transport));
    }

    #[test]
    fn test_opens_exactly_once() {
        let gate = ReadyGate::new();
        gate.open(Signal::Transport);
        assert!(gate.open(Signal::Engine));
        assert!(!gate.open(Signal::Engine));
        assert!(!gate.open(Signal::Transport));
        assert!(gate.is_open());
    }

    #[test]
    fn test_repeating_one_side_never_opens() {
        let gate = ReadyGate::new();
        assert!(!gate.open(Signal::Engine));
        assert!(!gate.open(Signal::Engine));
        assert!(!gate.is_open());
    }
}
