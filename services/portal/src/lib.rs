//! Compliance reporting portal core.
//!
//! Daily resource snapshots land in per-type collections; this crate
//! resolves the latest consistent snapshot day, composes aggregation
//! pipelines for detail views and rules, streams cursor aggregations for
//! the summary pages, and scopes everything to the requesting user's
//! accounts.

pub mod accounts;
pub mod aggregator;
pub mod config;
pub mod dates;
pub mod metrics;
pub mod pagination;
pub mod pipeline;
pub mod scope;
pub mod store;
pub mod tags;
pub mod views;

pub use accounts::AccountDirectory;
pub use config::Config;
pub use scope::{resolve_groups, resolve_scope, Scope, ScopedSource, UserClaims};
pub use store::{MemoryStore, SharedStore};
