use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Lifecycle of a pull request. The only transition is `Open -> Merged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PrStatus {
    Open,
    Merged,
}

impl PrStatus {
    /// Code stored in `pull_requests.status`, see `pull_request_statuses`.
    pub fn code(&self) -> i16 {
        match self {
            PrStatus::Open => 1,
            PrStatus::Merged => 2,
        }
    }

    pub fn from_code(code: i16) -> Result<Self, Error> {
        match code {
            1 => Ok(PrStatus::Open),
            2 => Ok(PrStatus::Merged),
            v => Err(Error::Storage(anyhow::anyhow!(
                "Unknown pull request status code: {}",
                v
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrStatus::Open => "OPEN",
            PrStatus::Merged => "MERGED",
        }
    }
}

impl FromStr for PrStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(PrStatus::Open),
            "MERGED" => Ok(PrStatus::Merged),
            v => Err(Error::Storage(anyhow::anyhow!(
                "Unknown pull request status label: {}",
                v
            ))),
        }
    }
}

impl Display for PrStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated identity handed over by whoever validated the request's
/// credentials. The role is informational here; policy decisions happen
/// before a core operation is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub is_team_admin: bool,
}

impl Caller {
    pub fn new(user_id: impl Into<String>, is_team_admin: bool) -> Self {
        Self {
            user_id: user_id.into(),
            is_team_admin,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self::new(user_id, true)
    }
}

impl Display for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_team_admin {
            write!(f, "{} (admin)", self.user_id)
        } else {
            f.write_str(&self.user_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::db::{Caller, PrStatus};

    #[test]
    fn test_roundtrip_pr_status() {
        fn test_one(status: PrStatus) {
            assert_eq!(
                status,
                PrStatus::from_str(status.as_str()).expect("Failed to parse status label")
            );
            assert_eq!(
                status,
                PrStatus::from_code(status.code()).expect("Failed to parse status code")
            );
        }

        test_one(PrStatus::Open);
        test_one(PrStatus::Merged);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!(PrStatus::from_str("CLOSED").is_err());
        assert!(PrStatus::from_code(3).is_err());
    }

    #[test]
    fn test_status_serializes_as_label() {
        assert_eq!(
            serde_json::to_string(&PrStatus::Merged).unwrap(),
            "\"MERGED\""
        );
    }

    #[test]
    fn test_caller_display() {
        assert_eq!(Caller::admin("u1").to_string(), "u1 (admin)");
        assert_eq!(Caller::new("u2", false).to_string(), "u2");
    }
}
