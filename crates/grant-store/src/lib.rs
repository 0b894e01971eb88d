//! In-memory store of paid access grants.
//!
//! A grant authorizes access to a protected resource for a bounded window and
//! is either recurring (redeemable until it expires) or single-use (exactly
//! one successful redemption). The store evaluates expiry and use-state and
//! applies the resulting mutation under one exclusive lock, so concurrent
//! redemptions of a single-use grant can never both succeed.
//!
//! ```rust
//! use chrono::{TimeDelta, Utc};
//! use grant_store::{GrantKind, GrantStore, StoreConfig, Verdict};
//!
//! let store = GrantStore::new(StoreConfig::session_tokens());
//! let now = Utc::now();
//!
//! store
//!     .create("ticket", GrantKind::SingleUse, TimeDelta::minutes(5), now)
//!     .unwrap();
//!
//! assert!(store.redeem("ticket", now).is_valid());
//! assert_eq!(store.redeem("ticket", now), Verdict::AlreadyUsed);
//! ```
//!
//! Grants live only as long as the process; nothing is persisted.

pub mod error;
pub mod grant;
pub mod policy;
pub mod store;
pub mod token;

pub use error::{Result, StoreError};
pub use grant::{Grant, GrantKind, Verdict};
pub use policy::{EvictionPolicy, ReissuePolicy, StoreConfig};
pub use store::GrantStore;
pub use token::{
    generate_token, is_well_formed_token, redact_token, TOKEN_BYTES, TOKEN_PREFIX_CHARS,
};
