use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::MenderError;

// ---------------------------------------------------------------------------
// PlanStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a remediation plan.
///
/// Transitions: `Pending → Approved → Completed | Failed`, `Pending → Rejected`.
/// `Rejected`, `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
    Failed,
}

impl PlanStatus {
    pub fn all() -> &'static [PlanStatus] {
        &[
            PlanStatus::Pending,
            PlanStatus::Approved,
            PlanStatus::Rejected,
            PlanStatus::Completed,
            PlanStatus::Failed,
        ]
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PlanStatus::Rejected | PlanStatus::Completed | PlanStatus::Failed
        )
    }

    pub fn can_transition_to(self, to: PlanStatus) -> bool {
        matches!(
            (self, to),
            (PlanStatus::Pending, PlanStatus::Approved)
                | (PlanStatus::Pending, PlanStatus::Rejected)
                | (PlanStatus::Approved, PlanStatus::Completed)
                | (PlanStatus::Approved, PlanStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Approved => "approved",
            PlanStatus::Rejected => "rejected",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlanStatus {
    type Err = MenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PlanStatus::Pending),
            "approved" => Ok(PlanStatus::Approved),
            "rejected" => Ok(PlanStatus::Rejected),
            "completed" => Ok(PlanStatus::Completed),
            "failed" => Ok(PlanStatus::Failed),
            _ => Err(MenderError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Severity> {
        match s {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn transition_matrix() {
        use PlanStatus::*;
        let allowed = [
            (Pending, Approved),
            (Pending, Rejected),
            (Approved, Completed),
            (Approved, Failed),
        ];
        for &from in PlanStatus::all() {
            for &to in PlanStatus::all() {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for &from in PlanStatus::all().iter().filter(|s| s.is_terminal()) {
            assert!(PlanStatus::all().iter().all(|&to| !from.can_transition_to(to)));
        }
    }

    #[test]
    fn status_parse_and_display_agree() {
        for &s in PlanStatus::all() {
            assert_eq!(PlanStatus::from_str(s.as_str()).unwrap(), s);
        }
        assert!(PlanStatus::from_str("done").is_err());
    }

    #[test]
    fn severity_orders_by_urgency() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert_eq!(Severity::parse("critical"), Some(Severity::Critical));
        assert_eq!(Severity::parse("urgent"), None);
    }
}
