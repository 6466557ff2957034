//! Tag registry: the deduplicated, insertion-ordered set of known tags.
//!
//! A tag appears in the registry once at least one document under it has
//! been written. Registration is the only mutation; there is no removal.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Tag;

/// Process-wide set of registered tags.
///
/// Implementations must make [`register_if_absent`](TagRegistry::register_if_absent)
/// a single atomic check-and-insert: for N concurrent calls with the same
/// tag exactly one observes `true`, and a failed call leaves the registry
/// unchanged.
#[async_trait]
pub trait TagRegistry: Send + Sync {
    /// All registered tags in registration order.
    async fn list(&self) -> Result<Vec<Tag>>;

    /// Register `tag` unless it is already present. Returns `true` when this
    /// call inserted it.
    async fn register_if_absent(&self, tag: &Tag) -> Result<bool>;
}
