use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// What happens to a grant once a redemption finds it expired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicy {
    /// Keep the record; enumeration filters it out
    Retain,
    /// Remove the record in the same critical section that observed the expiry
    EvictOnAccess,
}

/// What `create` does when the key is already present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReissuePolicy {
    /// Replace the existing grant, restarting its window
    Overwrite,
    /// Refuse while the existing grant is still valid; dead grants are replaced
    Reject,
}

impl FromStr for EvictionPolicy {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "retain" => Ok(Self::Retain),
            "evict-on-access" | "evict_on_access" | "evict" => Ok(Self::EvictOnAccess),
            other => Err(StoreError::InvalidPolicy(format!(
                "unknown eviction policy: {other}"
            ))),
        }
    }
}

impl FromStr for ReissuePolicy {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "reject" => Ok(Self::Reject),
            other => Err(StoreError::InvalidPolicy(format!(
                "unknown reissue policy: {other}"
            ))),
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retain => write!(f, "retain"),
            Self::EvictOnAccess => write!(f, "evict-on-access"),
        }
    }
}

impl fmt::Display for ReissuePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overwrite => write!(f, "overwrite"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub eviction: EvictionPolicy,
    pub reissue: ReissuePolicy,
}

impl StoreConfig {
    /// Random bearer tokens: one fresh key per payment, dead grants linger until purged
    pub fn session_tokens() -> Self {
        Self {
            eviction: EvictionPolicy::Retain,
            reissue: ReissuePolicy::Reject,
        }
    }

    /// Keyed by payer identity: repeat payment restarts the window, expiry evicts
    pub fn wallet_identity() -> Self {
        Self {
            eviction: EvictionPolicy::EvictOnAccess,
            reissue: ReissuePolicy::Overwrite,
        }
    }

    pub fn with_eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }

    pub fn with_reissue(mut self, reissue: ReissuePolicy) -> Self {
        self.reissue = reissue;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::session_tokens()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parsing() {
        assert_eq!("retain".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Retain);
        assert_eq!(
            " Evict-On-Access ".parse::<EvictionPolicy>().unwrap(),
            EvictionPolicy::EvictOnAccess
        );
        assert_eq!("overwrite".parse::<ReissuePolicy>().unwrap(), ReissuePolicy::Overwrite);
        assert_eq!("REJECT".parse::<ReissuePolicy>().unwrap(), ReissuePolicy::Reject);

        let err = "sometimes".parse::<ReissuePolicy>().unwrap_err();
        assert!(matches!(err, StoreError::InvalidPolicy(_)));
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for policy in [EvictionPolicy::Retain, EvictionPolicy::EvictOnAccess] {
            assert_eq!(policy.to_string().parse::<EvictionPolicy>().unwrap(), policy);
        }
    }

    #[test]
    fn test_presets() {
        let wallet = StoreConfig::wallet_identity();
        assert_eq!(wallet.eviction, EvictionPolicy::EvictOnAccess);
        assert_eq!(wallet.reissue, ReissuePolicy::Overwrite);

        let sessions = StoreConfig::default().with_eviction(EvictionPolicy::EvictOnAccess);
        assert_eq!(sessions.eviction, EvictionPolicy::EvictOnAccess);
        assert_eq!(sessions.reissue, ReissuePolicy::Reject);
    }
}
