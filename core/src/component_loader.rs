//! Seam to the component-loading collaborator.
//!
//! The pipeline never fetches or instantiates UI components itself; it asks
//! a [`ComponentResolver`] for an opaque handle and attaches that to the
//! response. Resolution is the one async suspension point inside event
//! processing, which is why the queue drains sequentially.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::Serializer;
use self::instance_ids::next_instance_id;

use crate::ChatStreamErr;
use crate::Result;

/// Opaque handle to a resolved, instantiated component.
///
/// Deliberately not deserializable and serialized as a placeholder marker:
/// debug exports carry the fact that a component was attached, never the
/// live instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentHandle {
    name: String,
    url: String,
    instance_id: u64,
}

pub const HANDLE_PLACEHOLDER: &str = "[component]";

impl ComponentHandle {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            instance_id: next_instance_id(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Serialize for ComponentHandle {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(HANDLE_PLACEHOLDER)
    }
}

/// Fetches and instantiates a named component given a URL. Fails if the
/// remote asset does not expose the expected export within a bounded wait.
#[async_trait]
pub trait ComponentResolver: Send + Sync {
    async fn resolve(&self, url: &str, name: &str) -> Result<ComponentHandle>;
}

/// Resolution wrapped in the configured budget. A timed-out resolution
/// rejects; the caller abandons that single event and the queue continues.
pub async fn resolve_with_timeout(
    resolver: &dyn ComponentResolver,
    url: &str,
    name: &str,
    budget: Duration,
) -> Result<ComponentHandle> {
    match tokio::time::timeout(budget, resolver.resolve(url, name)).await {
        Ok(result) => result,
        Err(_) => Err(ChatStreamErr::ComponentResolutionTimeout {
            name: name.to_string(),
            timeout_ms: budget.as_millis() as u64,
        }),
    }
}

mod instance_ids {
    use std::sync::atomic::AtomicU64;
    use std::sync::atomic::Ordering;

    static NEXT: AtomicU64 = AtomicU64::new(1);

    pub(super) fn next_instance_id() -> u64 {
        NEXT.fetch_add(1, Ordering::Relaxed)
    }
}
