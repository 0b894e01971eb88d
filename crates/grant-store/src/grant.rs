use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// How many successful redemptions a grant allows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    /// Redeemable any number of times until it expires
    #[default]
    Recurring,
    /// Redeemable exactly once
    SingleUse,
}

impl GrantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantKind::Recurring => "recurring",
            GrantKind::SingleUse => "single_use",
        }
    }
}

impl fmt::Display for GrantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "recurring" => Ok(GrantKind::Recurring),
            "single_use" | "single-use" | "once" => Ok(GrantKind::SingleUse),
            other => Err(StoreError::InvalidKind(other.to_string())),
        }
    }
}

/// One authorization to access a protected resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub key: String,
    pub kind: GrantKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Only meaningful for single-use grants
    pub used: bool,
}

impl Grant {
    /// `expires_at` must already be checked to lie after `created_at`
    pub(crate) fn issue(
        key: String,
        kind: GrantKind,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            kind,
            created_at,
            expires_at,
            used: false,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_consumed(&self) -> bool {
        self.kind == GrantKind::SingleUse && self.used
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now) && !self.is_consumed()
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self, now: DateTime<Utc>) -> TimeDelta {
        (self.expires_at - now).max(TimeDelta::zero())
    }

    pub fn ttl(&self) -> TimeDelta {
        self.expires_at - self.created_at
    }
}

/// Outcome of a redemption attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Access granted. Carries the grant as it stands after redemption.
    Valid(Grant),
    Expired,
    AlreadyUsed,
    NotFound,
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid(_))
    }

    pub fn grant(&self) -> Option<&Grant> {
        match self {
            Verdict::Valid(grant) => Some(grant),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Valid(_) => "VALID",
            Verdict::Expired => "EXPIRED",
            Verdict::AlreadyUsed => "ALREADY_USED",
            Verdict::NotFound => "NOT_FOUND",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
