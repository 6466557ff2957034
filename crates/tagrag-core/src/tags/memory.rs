//! Mutex-guarded in-memory [`TagRegistry`].

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::Tag;

use super::TagRegistry;

#[derive(Default)]
struct Inner {
    order: Vec<Tag>,
    seen: HashSet<Tag>,
}

/// Ordered set of tags behind a single mutex, so the membership check and
/// the insert happen in one critical section.
#[derive(Default)]
pub struct InMemoryTagRegistry {
    inner: Mutex<Inner>,
}

impl InMemoryTagRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TagRegistry for InMemoryTagRegistry {
    async fn list(&self) -> Result<Vec<Tag>> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| anyhow!("tag registry lock poisoned"))?;
        Ok(inner.order.clone())
    }

    async fn register_if_absent(&self, tag: &Tag) -> Result<bool> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow!("tag registry lock poisoned"))?;
        if !inner.seen.insert(tag.clone()) {
            return Ok(false);
        }
        inner.order.push(tag.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_registration_is_idempotent() {
        let registry = InMemoryTagRegistry::new();
        let tag = Tag::parse("docs").unwrap();
        assert!(registry.register_if_absent(&tag).await.unwrap());
        assert!(!registry.register_if_absent(&tag).await.unwrap());
        assert_eq!(registry.list().await.unwrap(), vec![tag]);
    }

    #[tokio::test]
    async fn test_list_preserves_registration_order() {
        let registry = InMemoryTagRegistry::new();
        for name in ["zeta", "alpha", "mid", "alpha"] {
            registry
                .register_if_absent(&Tag::parse(name).unwrap())
                .await
                .unwrap();
        }
        let names: Vec<String> = registry
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.to_string())
            .collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_has_one_winner() {
        let registry = Arc::new(InMemoryTagRegistry::new());
        let tag = Tag::parse("shared").unwrap();

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let registry = registry.clone();
                let tag = tag.clone();
                tokio::spawn(async move { registry.register_if_absent(&tag).await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(registry.list().await.unwrap().len(), 1);
    }
}
