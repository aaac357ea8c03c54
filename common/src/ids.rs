use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Upstream identifier of a workflow definition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct WorkflowId(pub u64);

/// Upstream identifier of a single workflow run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RunId(pub u64);

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkflowId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(WorkflowId)
    }
}

impl FromStr for RunId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(RunId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_plain_decimal() {
        assert_eq!(RunId(9876543210).to_string(), "9876543210");
        assert_eq!(WorkflowId(42).to_string(), "42");
    }

    #[test]
    fn test_parse_rejects_non_numeric() {
        assert_eq!("123".parse::<RunId>().unwrap(), RunId(123));
        assert!("12a".parse::<RunId>().is_err());
        assert!("-1".parse::<WorkflowId>().is_err());
    }
}
