//! Shared helpers for unit tests.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{Context, EngineConfig};
use crate::db::Database;
use crate::delegate::{
    ActivityHandlers, ApRequest, AuthResult, CommonDelegate, FederatedDelegate,
};
use crate::error::Result;
use crate::vocab::AsValue;

/// A common delegate that accepts everything and serves empty inboxes.
pub(crate) struct NullCommon;

#[async_trait]
impl CommonDelegate for NullCommon {
    async fn authenticate_get_inbox(&self, ctx: Context, _req: &ApRequest) -> Result<AuthResult> {
        Ok(AuthResult::ok(ctx))
    }

    async fn get_inbox(&self, _ctx: &Context, _req: &ApRequest) -> Result<AsValue> {
        Ok(empty_collection())
    }

    async fn authenticate_get_outbox(&self, ctx: Context, _req: &ApRequest) -> Result<AuthResult> {
        Ok(AuthResult::ok(ctx))
    }

    async fn get_outbox(&self, _ctx: &Context, _req: &ApRequest) -> Result<AsValue> {
        Ok(empty_collection())
    }
}

/// A federated delegate that accepts everything with default policy.
pub(crate) struct NullFederated;

#[async_trait]
impl ActivityHandlers for NullFederated {}

#[async_trait]
impl FederatedDelegate for NullFederated {
    async fn authenticate_post_inbox(&self, ctx: Context, _req: &ApRequest) -> Result<AuthResult> {
        Ok(AuthResult::ok(ctx))
    }
}

fn empty_collection() -> AsValue {
    AsValue::from_map_unchecked(
        serde_json::json!({"type": "OrderedCollection", "orderedItems": []})
            .as_object()
            .cloned()
            .unwrap_or_default(),
    )
}

/// A context over a mocked database with the federated half enabled.
pub(crate) fn context_with_db(db: impl Database + 'static) -> Context {
    let config = EngineConfig::new(Arc::new(NullCommon), Arc::new(db))
        .with_federated(Arc::new(NullFederated));
    Context::new(Arc::new(config), "fedcore-test")
}
