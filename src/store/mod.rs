pub mod file;
pub mod sqlite;

use crate::model::{ClickStats, Link};

/// StoreError keeps missing links distinct from backend failures so callers
/// can offer "create this link" instead of an error page.
#[derive(Clone, Debug)]
pub enum StoreError {
    NotFound,
    Backend(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "link not found"),
            StoreError::Backend(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for StoreError {}

impl StoreError {
    pub fn backend(e: impl std::fmt::Display) -> Self {
        StoreError::Backend(format!("{}", e))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

/// LinkStore persists links and their click stats.
///
/// All lookups are keyed by the normalized identity of the short name.
/// `save` is an upsert; the caller sets `created` before saving a brand-new
/// link, the store never infers insert-vs-update from absence.
#[async_trait::async_trait]
pub trait LinkStore: Send + Sync {
    /// Returns every stored link, in no particular order.
    async fn load_all(&self) -> Result<Vec<Link>, StoreError>;

    /// Returns `StoreError::NotFound` if no link exists under the normalized
    /// identity of `short`.
    async fn load(&self, short: &str) -> Result<Link, StoreError>;

    async fn save(&self, link: &Link) -> Result<(), StoreError>;

    /// Removes a link; `StoreError::NotFound` if nothing was stored under it.
    async fn delete(&self, short: &str) -> Result<(), StoreError>;

    /// Aggregate click counts, keyed by the link's canonical short spelling
    /// where one still exists, by the raw normalized id otherwise.
    async fn load_stats(&self) -> Result<ClickStats, StoreError>;

    /// Records an incremental batch of clicks. Totals accumulate across
    /// calls; they are never replaced.
    async fn save_stats(&self, delta: &ClickStats) -> Result<(), StoreError>;

    async fn delete_stats(&self, short: &str) -> Result<(), StoreError>;
}
