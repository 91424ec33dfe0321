//! Delegates and the activity dispatcher
//!
//! The application plugs behavior in through three delegate traits
//! (common / social / federated) plus per-type activity handler tables.
//! The dispatcher routes an activity through the configured tables with
//! a fixed resolution order; `Hook::Pass` lets each layer opt out.

use async_trait::async_trait;
use http::Response;
use url::Url;

use crate::context::{Context, OnFollow};
use crate::error::Result;
use crate::vocab::AsValue;

/// An ActivityPub request as the engine sees it.
pub type ApRequest = http::Request<Vec<u8>>;

/// An engine-produced HTTP response.
pub type ApResponse = Response<Vec<u8>>;

/// Outcome of a per-type handler invocation.
#[derive(Debug)]
pub enum Hook {
    /// The layer handled the activity; the (possibly rewritten) value is
    /// final for this dispatch.
    Handled(AsValue),
    /// The layer opts out; resolution continues with the next layer.
    Pass,
}

/// Result of an authenticate/authorize delegate call.
///
/// When `authenticated` is false the delegate has already written the
/// response it wants the client to see; the engine only stops the
/// pipeline. Delegates may thread context updates back via `ctx`.
pub struct AuthResult {
    /// Possibly updated request context
    pub ctx: Context,
    /// Whether the pipeline may continue
    pub authenticated: bool,
    /// Delegate-written response for the failure case
    pub response: Option<ApResponse>,
}

impl AuthResult {
    /// A passing result with an unchanged context.
    pub fn ok(ctx: Context) -> Self {
        Self {
            ctx,
            authenticated: true,
            response: None,
        }
    }

    /// A failing result carrying the delegate's response.
    pub fn denied(ctx: Context, response: ApResponse) -> Self {
        Self {
            ctx,
            authenticated: false,
            response: Some(response),
        }
    }
}

/// Per-activity-type callbacks.
///
/// Every method defaults to `Pass`, so implementers override only the
/// types they care about. `default_activity` catches types without a
/// dedicated callback.
#[async_trait]
pub trait ActivityHandlers: Send + Sync {
    async fn create(&self, _ctx: &mut Context, _activity: &AsValue) -> Result<Hook> {
        Ok(Hook::Pass)
    }
    async fn update(&self, _ctx: &mut Context, _activity: &AsValue) -> Result<Hook> {
        Ok(Hook::Pass)
    }
    async fn delete(&self, _ctx: &mut Context, _activity: &AsValue) -> Result<Hook> {
        Ok(Hook::Pass)
    }
    async fn follow(&self, _ctx: &mut Context, _activity: &AsValue) -> Result<Hook> {
        Ok(Hook::Pass)
    }
    async fn accept(&self, _ctx: &mut Context, _activity: &AsValue) -> Result<Hook> {
        Ok(Hook::Pass)
    }
    async fn reject(&self, _ctx: &mut Context, _activity: &AsValue) -> Result<Hook> {
        Ok(Hook::Pass)
    }
    async fn add(&self, _ctx: &mut Context, _activity: &AsValue) -> Result<Hook> {
        Ok(Hook::Pass)
    }
    async fn remove(&self, _ctx: &mut Context, _activity: &AsValue) -> Result<Hook> {
        Ok(Hook::Pass)
    }
    async fn like(&self, _ctx: &mut Context, _activity: &AsValue) -> Result<Hook> {
        Ok(Hook::Pass)
    }
    async fn announce(&self, _ctx: &mut Context, _activity: &AsValue) -> Result<Hook> {
        Ok(Hook::Pass)
    }
    async fn undo(&self, _ctx: &mut Context, _activity: &AsValue) -> Result<Hook> {
        Ok(Hook::Pass)
    }
    async fn block(&self, _ctx: &mut Context, _activity: &AsValue) -> Result<Hook> {
        Ok(Hook::Pass)
    }
    /// Fallback for activity types without a dedicated callback.
    async fn default_activity(&self, _ctx: &mut Context, _activity: &AsValue) -> Result<Hook> {
        Ok(Hook::Pass)
    }
}

/// Behavior shared by both protocol halves.
#[async_trait]
pub trait CommonDelegate: Send + Sync {
    /// Authenticate a GET against an inbox.
    async fn authenticate_get_inbox(&self, ctx: Context, req: &ApRequest) -> Result<AuthResult>;

    /// Produce the inbox OrderedCollection for an authenticated GET.
    async fn get_inbox(&self, ctx: &Context, req: &ApRequest) -> Result<AsValue>;

    /// Authenticate a GET against an outbox.
    async fn authenticate_get_outbox(&self, ctx: Context, req: &ApRequest) -> Result<AuthResult>;

    /// Produce the outbox OrderedCollection for an authenticated GET.
    async fn get_outbox(&self, ctx: &Context, req: &ApRequest) -> Result<AsValue>;
}

/// The Social API (client-to-server) delegate.
///
/// The supertrait carries this delegate's per-type callbacks; they are
/// consulted after the engine's own C2S side effects.
#[async_trait]
pub trait SocialDelegate: ActivityHandlers {
    /// Authenticate a POST to an outbox.
    async fn authenticate_post_outbox(&self, ctx: Context, req: &ApRequest) -> Result<AuthResult>;

    /// Inspect/augment the context after the body parsed but before side
    /// effects run.
    async fn post_outbox_request_body_hook(
        &self,
        ctx: Context,
        _req: &ApRequest,
        _activity: &AsValue,
    ) -> Result<Context> {
        Ok(ctx)
    }
}

/// The Federated Protocol (server-to-server) delegate.
#[async_trait]
pub trait FederatedDelegate: ActivityHandlers {
    /// Authenticate a POST to an inbox (HTTP Signatures live here).
    async fn authenticate_post_inbox(&self, ctx: Context, req: &ApRequest) -> Result<AuthResult>;

    /// Authorize an authenticated activity (e.g. peer relationship
    /// checks beyond `blocked`).
    async fn authorize_post_inbox(&self, ctx: Context, _activity: &AsValue) -> Result<AuthResult> {
        Ok(AuthResult::ok(ctx))
    }

    /// Inspect/augment the context after the body parsed but before side
    /// effects run.
    async fn post_inbox_request_body_hook(
        &self,
        ctx: Context,
        _req: &ApRequest,
        _activity: &AsValue,
    ) -> Result<Context> {
        Ok(ctx)
    }

    /// Whether any of the given actors is blocked by local policy.
    async fn blocked(&self, _ctx: &Context, _actors: &[Url]) -> Result<bool> {
        Ok(false)
    }

    /// Bound on the ownership traversal of inbox forwarding.
    fn max_inbox_forwarding_recursion_depth(&self, _ctx: &Context) -> u32 {
        4
    }

    /// Bound on collection expansion during recipient resolution.
    fn max_delivery_recursion_depth(&self, _ctx: &Context) -> u32 {
        4
    }

    /// Trim the candidate collections before inbox forwarding delivers.
    async fn filter_forwarding(
        &self,
        _ctx: &Context,
        candidates: Vec<AsValue>,
        _activity: &AsValue,
    ) -> Result<Vec<AsValue>> {
        Ok(candidates)
    }

    /// Reply policy for Follows addressed to our actors.
    fn on_follow(&self, _ctx: &Context) -> OnFollow {
        OnFollow::DoNothing
    }
}

/// Which handler direction a dispatch serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Social API (outbox) side effects
    Social,
    /// Federated Protocol (inbox) side effects
    Federated,
}

async fn invoke<H: ActivityHandlers + ?Sized>(
    handlers: &H,
    key: &str,
    ctx: &mut Context,
    activity: &AsValue,
) -> Result<Hook> {
    match key {
        "create" => handlers.create(ctx, activity).await,
        "update" => handlers.update(ctx, activity).await,
        "delete" => handlers.delete(ctx, activity).await,
        "follow" => handlers.follow(ctx, activity).await,
        "accept" => handlers.accept(ctx, activity).await,
        "reject" => handlers.reject(ctx, activity).await,
        "add" => handlers.add(ctx, activity).await,
        "remove" => handlers.remove(ctx, activity).await,
        "like" => handlers.like(ctx, activity).await,
        "announce" => handlers.announce(ctx, activity).await,
        "undo" => handlers.undo(ctx, activity).await,
        "block" => handlers.block(ctx, activity).await,
        _ => handlers.default_activity(ctx, activity).await,
    }
}

/// Route an activity through the handler tables.
///
/// Every dispatch in this engine is request-initiated (top level), so
/// the configured per-direction override table is always consulted
/// first (`Pass` falls through); then the protocol delegate's own
/// callbacks; then the fallback table. When every layer passes, the
/// activity flows through unchanged.
/// One resolution layer: an override/fallback table, or a protocol
/// delegate serving its own per-type callbacks.
enum Layer {
    Table(std::sync::Arc<dyn ActivityHandlers>),
    Social(std::sync::Arc<dyn SocialDelegate>),
    Federated(std::sync::Arc<dyn FederatedDelegate>),
}

impl Layer {
    async fn invoke(&self, key: &str, ctx: &mut Context, activity: &AsValue) -> Result<Hook> {
        match self {
            Layer::Table(h) => invoke(h.as_ref(), key, ctx, activity).await,
            Layer::Social(h) => invoke(h.as_ref(), key, ctx, activity).await,
            Layer::Federated(h) => invoke(h.as_ref(), key, ctx, activity).await,
        }
    }
}

pub(crate) async fn dispatch_activity(
    ctx: &mut Context,
    direction: Direction,
    activity: AsValue,
) -> Result<AsValue> {
    let key = activity
        .primary_type()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let config = ctx.config();
    let mut layers = Vec::new();
    match direction {
        Direction::Social => {
            if let Some(table) = config.social_handlers.clone() {
                layers.push(Layer::Table(table));
            }
            if let Some(delegate) = config.social.clone() {
                layers.push(Layer::Social(delegate));
            }
        }
        Direction::Federated => {
            if let Some(table) = config.federated_handlers.clone() {
                layers.push(Layer::Table(table));
            }
            if let Some(delegate) = config.federated.clone() {
                layers.push(Layer::Federated(delegate));
            }
        }
    }
    if let Some(table) = config.fallback.clone() {
        layers.push(Layer::Table(table));
    }

    for layer in layers {
        match layer.invoke(&key, ctx, &activity).await? {
            Hook::Handled(rewritten) => return Ok(rewritten),
            Hook::Pass => continue,
        }
    }
    Ok(activity)
}
