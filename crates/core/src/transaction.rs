//! Upload transaction lifecycle.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a batched upload transaction.
///
/// Transactions are created `pending`. They end either `completed`, after the
/// staged sizes have been settled into the folder tree, or `failed`, when the
/// batch was abandoned. Neither terminal state can be left again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Open and accepting uploads.
    Pending,
    /// Staged sizes were written to the folder tree.
    Completed,
    /// Abandoned without touching folder sizes.
    Failed,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 3] = [Self::Pending, Self::Completed, Self::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Check if the transaction reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a transaction in this status may move to `next`.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        matches!((self, next), (Self::Pending, _))
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_statuses() {
        for status in TransactionStatus::ALL {
            assert_eq!(status.as_str().parse::<TransactionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_parse_rejects_unknown_status() {
        let err = "done".parse::<TransactionStatus>().unwrap_err();
        assert!(matches!(err, Error::InvalidStatus(ref s) if s == "done"));
        assert!("PENDING".parse::<TransactionStatus>().is_err());
        assert!("".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn test_terminal_states_are_final() {
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(TransactionStatus::Completed.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());

        for next in TransactionStatus::ALL {
            assert!(TransactionStatus::Pending.can_transition_to(next));
            assert!(!TransactionStatus::Completed.can_transition_to(next));
            assert!(!TransactionStatus::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_serde_uses_lowercase() {
        let json = serde_json::to_string(&TransactionStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
    }
}
