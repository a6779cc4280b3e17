//! Connectivity classification and the wifi-only policy.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::models::JournalAction;

/// Current network connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// No usable network
    None,
    /// Mobile or otherwise metered network
    Metered,
    /// Wifi or otherwise unmetered network
    Unmetered,
}

impl Connectivity {
    const fn to_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Metered => 1,
            Self::Unmetered => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Metered,
            2 => Self::Unmetered,
            _ => Self::None,
        }
    }
}

/// Source of the current connectivity, provided by the platform layer
pub trait ConnectivityProbe: Send + Sync {
    fn connectivity(&self) -> Connectivity;
}

impl<T: ConnectivityProbe + ?Sized> ConnectivityProbe for Arc<T> {
    fn connectivity(&self) -> Connectivity {
        (**self).connectivity()
    }
}

/// A probe whose value is pushed by platform connectivity callbacks
#[derive(Debug)]
pub struct ConnectivityState(AtomicU8);

impl ConnectivityState {
    pub const fn new(initial: Connectivity) -> Self {
        Self(AtomicU8::new(initial.to_u8()))
    }

    pub fn set(&self, connectivity: Connectivity) {
        self.0.store(connectivity.to_u8(), Ordering::SeqCst);
    }
}

impl ConnectivityProbe for ConnectivityState {
    fn connectivity(&self) -> Connectivity {
        Connectivity::from_u8(self.0.load(Ordering::SeqCst))
    }
}

/// Why a sync request was deferred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    NoInternet,
    NoWifi,
}

impl DeferReason {
    pub const fn journal_action(self) -> JournalAction {
        match self {
            Self::NoInternet => JournalAction::DeferredNoInternet,
            Self::NoWifi => JournalAction::DeferredNoWifi,
        }
    }
}

/// Outcome of consulting the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Run,
    Defer(DeferReason),
}

/// Applies the per-user wifi-only preference to the probed connectivity
pub struct NetworkGate<P> {
    probe: P,
}

impl<P: ConnectivityProbe> NetworkGate<P> {
    pub const fn new(probe: P) -> Self {
        Self { probe }
    }

    pub fn check(&self, wifi_only: bool) -> GateDecision {
        decide(self.probe.connectivity(), wifi_only)
    }

    pub const fn probe(&self) -> &P {
        &self.probe
    }
}

/// The decision table: no network always defers; metered defers only under wifi-only.
pub const fn decide(connectivity: Connectivity, wifi_only: bool) -> GateDecision {
    match connectivity {
        Connectivity::None => GateDecision::Defer(DeferReason::NoInternet),
        Connectivity::Metered if wifi_only => GateDecision::Defer(DeferReason::NoWifi),
        Connectivity::Metered | Connectivity::Unmetered => GateDecision::Run,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_table() {
        let cases = [
            (Connectivity::None, false, GateDecision::Defer(DeferReason::NoInternet)),
            (Connectivity::None, true, GateDecision::Defer(DeferReason::NoInternet)),
            (Connectivity::Metered, true, GateDecision::Defer(DeferReason::NoWifi)),
            (Connectivity::Metered, false, GateDecision::Run),
            (Connectivity::Unmetered, true, GateDecision::Run),
            (Connectivity::Unmetered, false, GateDecision::Run),
        ];

        for (connectivity, wifi_only, expected) in cases {
            assert_eq!(
                decide(connectivity, wifi_only),
                expected,
                "{connectivity:?} wifi_only={wifi_only}"
            );
        }
    }

    #[test]
    fn gate_follows_probe_updates() {
        let gate = NetworkGate::new(ConnectivityState::new(Connectivity::None));
        assert_eq!(gate.check(false), GateDecision::Defer(DeferReason::NoInternet));

        gate.probe().set(Connectivity::Metered);
        assert_eq!(gate.check(true), GateDecision::Defer(DeferReason::NoWifi));
        assert_eq!(gate.check(false), GateDecision::Run);
    }

    #[test]
    fn defer_reasons_map_to_journal_actions() {
        assert_eq!(
            DeferReason::NoInternet.journal_action(),
            JournalAction::DeferredNoInternet
        );
        assert_eq!(DeferReason::NoWifi.journal_action(), JournalAction::DeferredNoWifi);
    }
}
