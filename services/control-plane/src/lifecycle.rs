//! Machine status lifecycle.
//!
//! A machine moves through: `available → awaiting_dropoff → running`, with
//! `error` reachable from `awaiting_dropoff` when the physical start command
//! fails. `running` and `error` are terminal for this service; a machine is
//! returned to `available` only through the explicit release path.
//!
//! The coordinator is the sole mutating consumer of this table.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    /// Free for reservation. A machine in this state has no job bound.
    Available,

    /// Reserved by a job, waiting for the physical drop-off.
    AwaitingDropoff,

    /// The physical cycle is running.
    Running,

    /// The start command failed; the machine needs operator attention.
    Error,
}

impl MachineStatus {
    /// Canonical text form, also used as the store encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStatus::Available => "available",
            MachineStatus::AwaitingDropoff => "awaiting_dropoff",
            MachineStatus::Running => "running",
            MachineStatus::Error => "error",
        }
    }

    /// Whether the start-cycle command may be issued from this status.
    pub fn can_start(&self) -> bool {
        matches!(self, MachineStatus::AwaitingDropoff)
    }

    /// Whether a reservation hold on this machine may be released.
    pub fn can_release(&self) -> bool {
        matches!(self, MachineStatus::AwaitingDropoff)
    }

    /// Whether `self → to` is a defined lifecycle transition.
    pub fn may_transition(&self, to: MachineStatus) -> bool {
        use MachineStatus::*;
        matches!(
            (self, to),
            (Available, AwaitingDropoff)
                | (AwaitingDropoff, Running)
                | (AwaitingDropoff, Error)
                | (AwaitingDropoff, Available)
        )
    }

    /// Whether this status is terminal for the reservation subsystem.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MachineStatus::Running | MachineStatus::Error)
    }
}

impl std::fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when decoding an unknown status string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown machine status: {0}")]
pub struct ParseStatusError(pub String);

impl std::str::FromStr for MachineStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(MachineStatus::Available),
            "awaiting_dropoff" => Ok(MachineStatus::AwaitingDropoff),
            "running" => Ok(MachineStatus::Running),
            "error" => Ok(MachineStatus::Error),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(MachineStatus::Available, MachineStatus::AwaitingDropoff, true)]
    #[case(MachineStatus::AwaitingDropoff, MachineStatus::Running, true)]
    #[case(MachineStatus::AwaitingDropoff, MachineStatus::Error, true)]
    #[case(MachineStatus::AwaitingDropoff, MachineStatus::Available, true)]
    #[case(MachineStatus::Available, MachineStatus::Running, false)]
    #[case(MachineStatus::Running, MachineStatus::Available, false)]
    #[case(MachineStatus::Running, MachineStatus::Error, false)]
    #[case(MachineStatus::Error, MachineStatus::Available, false)]
    #[case(MachineStatus::Error, MachineStatus::Running, false)]
    fn transition_table(
        #[case] from: MachineStatus,
        #[case] to: MachineStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.may_transition(to), allowed);
    }

    #[test]
    fn only_awaiting_dropoff_can_start() {
        assert!(MachineStatus::AwaitingDropoff.can_start());
        assert!(!MachineStatus::Available.can_start());
        assert!(!MachineStatus::Running.can_start());
        assert!(!MachineStatus::Error.can_start());
    }

    #[test]
    fn terminal_states() {
        assert!(MachineStatus::Running.is_terminal());
        assert!(MachineStatus::Error.is_terminal());
        assert!(!MachineStatus::Available.is_terminal());
        assert!(!MachineStatus::AwaitingDropoff.is_terminal());
    }

    #[test]
    fn text_roundtrip() {
        for status in [
            MachineStatus::Available,
            MachineStatus::AwaitingDropoff,
            MachineStatus::Running,
            MachineStatus::Error,
        ] {
            let parsed: MachineStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn unknown_status_rejected() {
        let result: Result<MachineStatus, _> = "spinning".parse();
        assert!(result.is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&MachineStatus::AwaitingDropoff).unwrap();
        assert_eq!(json, "\"awaiting_dropoff\"");
    }
}
