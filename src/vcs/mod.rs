//! Conversion capabilities for the supported foreign version-control
//! systems.
//!
//! Each [`RepositoryType`] maps to one [`VcsConverter`] through a closed
//! lookup table ([`ConverterRegistry`]). The conversion internals are
//! opaque to the rest of the crate: a converter materializes a foreign
//! checkout, keeps it current, and translates its history into
//! [`Revision`] records in commit order. The production converters shell
//! out to the native tools; tests substitute an in-memory fake through the
//! same trait.

mod converters;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::scheduler::job::{RepositoryType, Revision};

pub use converters::{BazaarConverter, CvsConverter, GitConverter, SubversionConverter};

/// Opaque position in a foreign repository's history, as reported by the
/// native tool. Only ever compared for equality or handed back to the same
/// converter that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionMarker(pub String);

impl RevisionMarker {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RevisionMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One foreign VCS's fetch/translate capability.
///
/// `checkout` and `update` errors are reported as source-unavailable;
/// `translate` errors as conversion failures. An `update` must either leave
/// the working tree current or fail without corrupting it (the tree store
/// falls back to a fresh checkout on update failure).
#[async_trait]
pub trait VcsConverter: Send + Sync {
    /// Fully materialize `url` into `workdir` and report the tip marker.
    async fn checkout(&self, url: &str, workdir: &Path) -> Result<RevisionMarker>;

    /// Incrementally fetch new history into an existing checkout. Fails
    /// (rather than guessing) when upstream history diverged from the
    /// cached tree.
    async fn update(&self, url: &str, workdir: &Path) -> Result<RevisionMarker>;

    /// Translate the checkout's history into target-format revisions in
    /// commit order, preserving authorship and timestamps. With a `since`
    /// marker only revisions after that point are produced.
    async fn translate(
        &self,
        workdir: &Path,
        since: Option<&RevisionMarker>,
    ) -> Result<Vec<Revision>>;
}

/// Closed dispatch table from repository type to conversion capability.
pub struct ConverterRegistry {
    table: HashMap<RepositoryType, Arc<dyn VcsConverter>>,
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        let mut table: HashMap<RepositoryType, Arc<dyn VcsConverter>> = HashMap::new();
        table.insert(RepositoryType::Git, Arc::new(GitConverter));
        table.insert(RepositoryType::Subversion, Arc::new(SubversionConverter));
        table.insert(RepositoryType::Bazaar, Arc::new(BazaarConverter));
        table.insert(RepositoryType::Cvs, Arc::new(CvsConverter));
        Self { table }
    }
}

impl ConverterRegistry {
    /// Replace the capability for one repository type (used by tests and by
    /// deployments carrying a custom conversion tool).
    pub fn register(&mut self, kind: RepositoryType, converter: Arc<dyn VcsConverter>) {
        self.table.insert(kind, converter);
    }

    pub fn converter_for(&self, kind: RepositoryType) -> Option<Arc<dyn VcsConverter>> {
        self.table.get(&kind).cloned()
    }
}
