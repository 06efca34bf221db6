//! The two caching layers the import pipeline runs against.
//!
//! [`ForeignTreeStore`] keeps materialized foreign checkouts between runs so
//! repeat imports only fetch new revisions; [`BranchStore`] holds the
//! converted hosted branches and guarantees idempotent, atomically-visible
//! appends. Both live under operator-configured roots and are safely
//! discardable: a reclaimed job resuming on another machine rebuilds what it
//! needs.

pub mod branch_store;
pub mod tree_store;

pub use branch_store::{BranchHandle, BranchStore};
pub use tree_store::{ForeignTreeStore, TreeCheckout};
