//! Auto-purge policy: whether a task's record is deleted once it ends.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::tasks::Outcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutoPurge {
    Always,
    Never,
    #[default]
    OnSuccess,
}

impl fmt::Display for AutoPurge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Always => "ALWAYS",
            Self::Never => "NEVER",
            Self::OnSuccess => "ON_SUCCESS",
        })
    }
}

impl FromStr for AutoPurge {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ALWAYS" => Ok(Self::Always),
            "NEVER" => Ok(Self::Never),
            "ON_SUCCESS" => Ok(Self::OnSuccess),
            other => Err(format!("unknown auto-purge policy '{other}'")),
        }
    }
}

/// Decide on purge for a task that just reached a terminal state.
/// `None` stands for cancellation. A skipped final execution counts as success.
pub fn should_purge(policy: AutoPurge, outcome: Option<&Outcome>) -> bool {
    match policy {
        AutoPurge::Always => true,
        AutoPurge::Never => false,
        AutoPurge::OnSuccess => matches!(
            outcome,
            Some(Outcome::Success { .. }) | Some(Outcome::Skipped { .. })
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::FailureRecord;
    use crate::tasks::StoredResult;

    #[test]
    fn test_policy_matrix() {
        let success = Outcome::Success { result: StoredResult::Value { value: None } };
        let failure = Outcome::Failure { cause: FailureRecord::new("E", "x"), aborted: false, attempts: 2 };
        let skipped = Outcome::Skipped { cause: None };

        assert!(should_purge(AutoPurge::OnSuccess, Some(&success)));
        assert!(should_purge(AutoPurge::OnSuccess, Some(&skipped)));
        assert!(!should_purge(AutoPurge::OnSuccess, Some(&failure)));
        assert!(!should_purge(AutoPurge::OnSuccess, None));

        assert!(should_purge(AutoPurge::Always, Some(&failure)));
        assert!(should_purge(AutoPurge::Always, None));
        assert!(!should_purge(AutoPurge::Never, Some(&success)));
    }

    #[test]
    fn test_parse_is_exact() {
        assert_eq!("ON_SUCCESS".parse::<AutoPurge>().unwrap(), AutoPurge::OnSuccess);
        assert!("on_success".parse::<AutoPurge>().is_err());
        assert_eq!(AutoPurge::default(), AutoPurge::OnSuccess);
    }
}
