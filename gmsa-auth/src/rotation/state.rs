use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationState {
    #[default]
    Idle,
    Checking,
    Rotating,
    Testing,
    RolledBack,
    Failed,
}

impl RotationState {
    /// Whether a cycle is between its first step and its outcome.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Checking | Self::Rotating | Self::Testing)
    }
}

impl fmt::Display for RotationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::Rotating => "rotating",
            Self::Testing => "testing",
            Self::RolledBack => "rolled_back",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a rotation status read returns; also persisted after every cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationStatus {
    pub enabled: bool,
    pub status: RotationState,
    pub last_check: Option<DateTime<Utc>>,
    pub last_rotation: Option<DateTime<Utc>>,
    /// Seconds since the account password was last set.
    pub password_age: Option<u64>,
    pub next_rotation_estimate: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(RotationState::RolledBack.to_string(), "rolled_back");
        assert_eq!(
            serde_json::to_string(&RotationState::RolledBack).unwrap(),
            "\"rolled_back\""
        );
        assert!(RotationState::Testing.is_active());
        assert!(!RotationState::Failed.is_active());
    }
}
