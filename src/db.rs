//! Database capability
//!
//! All persistence flows through this trait; the engine never mutates a
//! collection in memory as a substitute for persistence. Implementations
//! must be safe for concurrent use across requests — the engine does no
//! locking of its own. `update_collection` is expected to apply its
//! additions idempotently and atomically.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::error::Result;
use crate::transport::Transport;
use crate::vocab::{AsValue, JsonMap};

/// Paging options for collection reads.
#[derive(Debug, Clone, Default)]
pub struct CollectionOpts {
    /// Return at most this many items
    pub max_items: Option<usize>,
    /// Only items strictly newer than this id
    pub min_id: Option<Url>,
    /// Only items strictly older than this id
    pub max_id: Option<Url>,
}

/// A batched collection edit; additions are prepended in order.
#[derive(Debug, Clone, Default)]
pub struct CollectionUpdate {
    /// Item ids to prepend
    pub add: Vec<Url>,
    /// Item ids to remove
    pub remove: Vec<Url>,
}

impl CollectionUpdate {
    /// An update that only prepends.
    pub fn add(ids: Vec<Url>) -> Self {
        Self {
            add: ids,
            remove: Vec::new(),
        }
    }

    /// An update that only removes.
    pub fn remove(ids: Vec<Url>) -> Self {
        Self {
            add: Vec::new(),
            remove: ids,
        }
    }
}

/// A known inbox for an actor, with its advertised shared inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxPair {
    /// The actor's own inbox
    pub inbox: Url,
    /// The instance-wide shared inbox, when advertised
    pub shared_inbox: Option<Url>,
}

/// The persistence capability an embedding application supplies.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    /// Whether the collection at `coll` contains the item `id`.
    async fn collection_contains(&self, coll: &Url, id: &Url) -> Result<bool>;

    /// Read a (page of a) collection.
    async fn get_collection(&self, id: &Url, opts: CollectionOpts) -> Result<AsValue>;

    /// Apply adds/removes to a collection and return the updated page.
    async fn update_collection(&self, id: &Url, update: CollectionUpdate) -> Result<AsValue>;

    /// Whether this server owns the IRI.
    async fn owns(&self, id: &Url) -> Result<bool>;

    /// The actor that owns a collection IRI.
    async fn actor_for_collection(&self, id: &Url) -> Result<Url>;

    /// The actor that owns an inbox IRI.
    async fn actor_for_inbox(&self, id: &Url) -> Result<Url>;

    /// The actor that owns an outbox IRI.
    async fn actor_for_outbox(&self, id: &Url) -> Result<Url>;

    /// The outbox paired with an inbox IRI.
    async fn outbox_for_inbox(&self, id: &Url) -> Result<Url>;

    /// A locally known inbox for an actor, if any.
    async fn inbox_for_actor(&self, actor: &Url) -> Result<Option<InboxPair>>;

    /// Whether a value with this id has been persisted.
    async fn exists(&self, id: &Url) -> Result<bool>;

    /// Fetch a persisted value.
    async fn get(&self, id: &Url) -> Result<AsValue>;

    /// Persist a value; returns the stored value and, when the store
    /// keeps one, its raw JSON form.
    async fn create(&self, value: &AsValue) -> Result<(AsValue, Option<JsonMap>)>;

    /// Replace a persisted value.
    async fn update(&self, value: &AsValue) -> Result<AsValue>;

    /// Physically remove a persisted value.
    async fn delete(&self, id: &Url) -> Result<()>;

    /// Mint a fresh IRI for a value about to be persisted.
    async fn new_id(&self, value: &AsValue) -> Result<Url>;

    /// A transport speaking as the actor that owns `box_iri`.
    async fn new_transport(&self, box_iri: &Url, app_agent: &str) -> Result<Arc<dyn Transport>>;
}
