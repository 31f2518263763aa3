//! Connectivity mode and its state machine.
//!
//! ```text
//!            associated                 peer discovered
//!   Init ───────────────► Scanning ───────────────────► Bridging
//!     │                    ▲   │ link lost                  │
//!     │ not associated     │   ▼                            │ session ended
//!     └──────────► Provisioning ◄───────────────────────────┘ (back to Scanning)
//!                   ▲     │ success ──► Scanning
//!                   └─────┘ timeout / failure
//! ```
//!
//! A re-provision request moves every mode to `Provisioning`.  The machine is
//! pure: it never performs I/O, the control loop feeds it events and acts on
//! the resulting mode.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

/// Operating mode of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Mode {
    Init = 0,
    Provisioning = 1,
    Scanning = 2,
    Bridging = 3,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid mode value: {0}")]
pub struct InvalidMode(pub u8);

impl TryFrom<u8> for Mode {
    type Error = InvalidMode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Mode::Init),
            1 => Ok(Mode::Provisioning),
            2 => Ok(Mode::Scanning),
            3 => Ok(Mode::Bridging),
            other => Err(InvalidMode(other)),
        }
    }
}

/// Blink frequency and intensity shown by the status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorPattern {
    pub blink_hz: u32,
    /// Fraction in `0.0..=1.0`.
    pub intensity: f32,
}

impl Mode {
    /// The indicator pattern that identifies this mode.
    pub fn indicator_pattern(self) -> IndicatorPattern {
        match self {
            Mode::Init | Mode::Provisioning => IndicatorPattern {
                blink_hz: 10,
                intensity: 0.5,
            },
            Mode::Scanning => IndicatorPattern {
                blink_hz: 4,
                intensity: 0.75,
            },
            Mode::Bridging => IndicatorPattern {
                blink_hz: 2,
                intensity: 0.25,
            },
        }
    }

    /// Whether the network session should be moving data.
    pub fn is_bridging(self) -> bool {
        self == Mode::Bridging
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// Startup; `associated` is whether the radio already holds a network.
    Boot { associated: bool },
    ProvisioningSucceeded,
    /// Timeout or failure; provisioning is retried.
    ProvisioningFailed,
    /// The manual re-provision signal fired.
    ReprovisionRequested,
    /// The radio lost its network association.
    LinkLost,
    /// Discovery resolved a peer address.
    PeerDiscovered,
    /// The session ended (peer close, keep-alive or I/O failure).
    SessionEnded,
}

/// Computes the next mode, or `None` if `event` does not apply in `mode`.
pub fn next_mode(mode: Mode, event: ConnectivityEvent) -> Option<Mode> {
    use ConnectivityEvent as E;

    match (mode, event) {
        (_, E::ReprovisionRequested) => Some(Mode::Provisioning),
        (Mode::Init, E::Boot { associated: true }) => Some(Mode::Scanning),
        (Mode::Init, E::Boot { associated: false }) => Some(Mode::Provisioning),
        (Mode::Provisioning, E::ProvisioningSucceeded) => Some(Mode::Scanning),
        (Mode::Provisioning, E::ProvisioningFailed) => Some(Mode::Provisioning),
        (Mode::Scanning, E::LinkLost) => Some(Mode::Provisioning),
        (Mode::Scanning, E::PeerDiscovered) => Some(Mode::Bridging),
        (Mode::Bridging, E::SessionEnded) => Some(Mode::Scanning),
        _ => None,
    }
}

/// Holds the current mode and applies events to it.
#[derive(Debug, Clone)]
pub struct ModeMachine {
    mode: Mode,
}

impl Default for ModeMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeMachine {
    pub fn new() -> Self {
        Self { mode: Mode::Init }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Applies `event` and returns the resulting mode.  Events that do not
    /// apply in the current mode leave it unchanged.
    pub fn handle(&mut self, event: ConnectivityEvent) -> Mode {
        match next_mode(self.mode, event) {
            Some(next) => {
                trace!(from = ?self.mode, to = ?next, ?event, "mode transition");
                self.mode = next;
            }
            None => trace!(mode = ?self.mode, ?event, "event ignored"),
        }
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectivityEvent as E;

    #[test]
    fn test_boot_without_network_goes_to_provisioning() {
        let mut m = ModeMachine::new();
        assert_eq!(m.handle(E::Boot { associated: false }), Mode::Provisioning);
    }

    #[test]
    fn test_boot_with_network_goes_to_scanning() {
        let mut m = ModeMachine::new();
        assert_eq!(m.handle(E::Boot { associated: true }), Mode::Scanning);
    }

    #[test]
    fn test_provisioning_success_and_failure() {
        assert_eq!(
            next_mode(Mode::Provisioning, E::ProvisioningSucceeded),
            Some(Mode::Scanning)
        );
        assert_eq!(
            next_mode(Mode::Provisioning, E::ProvisioningFailed),
            Some(Mode::Provisioning)
        );
    }

    #[test]
    fn test_reprovision_applies_from_every_mode() {
        for mode in [Mode::Init, Mode::Provisioning, Mode::Scanning, Mode::Bridging] {
            assert_eq!(
                next_mode(mode, E::ReprovisionRequested),
                Some(Mode::Provisioning),
                "from {mode:?}"
            );
        }
    }

    #[test]
    fn test_scanning_transitions() {
        assert_eq!(next_mode(Mode::Scanning, E::LinkLost), Some(Mode::Provisioning));
        assert_eq!(next_mode(Mode::Scanning, E::PeerDiscovered), Some(Mode::Bridging));
    }

    #[test]
    fn test_session_end_returns_to_scanning() {
        assert_eq!(next_mode(Mode::Bridging, E::SessionEnded), Some(Mode::Scanning));
    }

    #[test]
    fn test_reprovision_from_bridging_passes_through_provisioning() {
        // Arrange
        let mut m = ModeMachine::new();
        m.handle(E::Boot { associated: true });
        m.handle(E::PeerDiscovered);
        assert_eq!(m.mode(), Mode::Bridging);

        // Act
        let after_signal = m.handle(E::ReprovisionRequested);

        // Assert – a peer discovery cannot jump straight back to Bridging
        assert_eq!(after_signal, Mode::Provisioning);
        assert_eq!(m.handle(E::PeerDiscovered), Mode::Provisioning);
        assert_eq!(m.handle(E::ProvisioningSucceeded), Mode::Scanning);
        assert_eq!(m.handle(E::PeerDiscovered), Mode::Bridging);
    }

    #[test]
    fn test_inapplicable_events_are_ignored() {
        let mut m = ModeMachine::new();
        assert_eq!(m.handle(E::SessionEnded), Mode::Init);
        assert_eq!(m.handle(E::PeerDiscovered), Mode::Init);
        assert_eq!(next_mode(Mode::Bridging, E::Boot { associated: true }), None);
    }

    #[test]
    fn test_each_bridge_mode_has_distinct_pattern() {
        let p = Mode::Provisioning.indicator_pattern();
        let s = Mode::Scanning.indicator_pattern();
        let b = Mode::Bridging.indicator_pattern();
        assert_ne!(p, s);
        assert_ne!(s, b);
        assert_ne!(p, b);
        assert_eq!(Mode::Init.indicator_pattern(), p);
        assert_eq!(s.blink_hz, 4);
    }

    #[test]
    fn test_mode_u8_round_trip() {
        for mode in [Mode::Init, Mode::Provisioning, Mode::Scanning, Mode::Bridging] {
            assert_eq!(Mode::try_from(mode as u8), Ok(mode));
        }
        assert_eq!(Mode::try_from(9), Err(InvalidMode(9)));
    }
}
