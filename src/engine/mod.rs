//! The side-effect engine
//!
//! `post_inbox`, `post_outbox`, `inbox_forwarding`, `deliver`,
//! `add_new_ids`, and `wrap_in_create`, plus the per-type side effects
//! under `social` (C2S) and `federated` (S2S). The request-level
//! orchestrators in `crate::actor` drive these in a fixed order; every
//! blocking call sits at a named step.

pub(crate) mod federated;
pub(crate) mod resolve;
pub(crate) mod social;

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use url::Url;

use crate::addressing::{self, recipients, strip_hidden_recipients};
use crate::context::Context;
use crate::delegate::{Direction, dispatch_activity};
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::vocab::{AsValue, JsonMap, is_public};

/// Accept a side-effect-authenticated activity into an inbox.
///
/// Returns false when the inbox already contained the activity's id; the
/// call is idempotent and the second delivery triggers no side effects.
///
/// Only invoked with the Federated Protocol enabled and the activity
/// authenticated and authorized.
pub async fn post_inbox(ctx: &mut Context, inbox: &Url, activity: &AsValue) -> Result<bool> {
    // 1. Identity
    let id = activity.require_id()?;

    // 2. Idempotence: a repeat delivery is not novel
    if ctx.db().collection_contains(inbox, &id).await? {
        tracing::debug!(activity = %id, inbox = %inbox, "activity already in inbox; skipping");
        return Ok(false);
    }

    // 3. Persist the activity
    ctx.db().create(activity).await?;

    // 4. Prepend the reference to the inbox
    ctx.db()
        .update_collection(inbox, crate::db::CollectionUpdate::add(vec![id.clone()]))
        .await?;

    // 5. Wrap the context for federated callbacks and run the per-type
    // side effects plus the application handler
    let on_follow = ctx.federated()?.on_follow(ctx);
    *ctx = ctx.with_federated(inbox.clone(), on_follow, Some(id.clone()));
    federated::run_side_effects(ctx, activity.clone()).await?;

    tracing::info!(activity = %id, inbox = %inbox, "accepted activity into inbox");
    Ok(true)
}

/// Apply Social API side effects and persist an activity to its outbox.
///
/// Returns the (possibly handler-rewritten) activity and whether it may
/// federate. Side effects run before persistence on purpose: they may
/// rewrite the activity.
pub async fn post_outbox(
    ctx: &mut Context,
    activity: AsValue,
    outbox: &Url,
    raw_activity: JsonMap,
) -> Result<(AsValue, bool)> {
    // 1. Social side effects, when that protocol half is enabled
    let activity = if ctx.social_enabled() {
        *ctx = ctx.with_social(outbox.clone(), raw_activity);
        social::run_side_effects(ctx, activity).await?
    } else {
        activity
    };
    let deliverable = ctx.deliverable();

    // 2. Persist and prepend to the outbox
    let id = activity.require_id()?;
    ctx.db().create(&activity).await?;
    ctx.db()
        .update_collection(outbox, crate::db::CollectionUpdate::add(vec![id.clone()]))
        .await?;

    tracing::info!(activity = %id, outbox = %outbox, deliverable, "added activity to outbox");
    Ok((activity, deliverable))
}

/// The three-part inbox-forwarding rule.
///
/// Forward to our local collections when the activity is new to us, one
/// of our collections is addressed, and we own a value reachable from
/// `object`/`target`/`inReplyTo`/`tag` within the configured depth.
pub async fn inbox_forwarding(ctx: &mut Context, inbox: &Url, activity: &AsValue) -> Result<()> {
    let id = activity.require_id()?;

    // 1. Seen? Our own outbox echo is never "seen".
    let is_echo = ctx
        .federated_data()
        .and_then(|d| d.new_activity_id.as_ref())
        .is_some_and(|new_id| *new_id == id);
    if !is_echo && ctx.db().exists(&id).await? {
        tracing::debug!(activity = %id, "already seen; not forwarding");
        return Ok(());
    }

    // 2. Persist
    ctx.db().create(activity).await?;

    // 3. Addressed recipients we own (hidden recipients excluded)
    let mut my_iris = Vec::new();
    for iri in addressing::direct_recipients(activity) {
        if is_public(iri.as_str()) {
            continue;
        }
        if ctx.db().owns(&iri).await? {
            my_iris.push(iri);
        }
    }
    if my_iris.is_empty() {
        return Ok(());
    }

    // 4. Partition the owned recipients into collections
    let mut ordered = Vec::new();
    let mut unordered = Vec::new();
    for iri in &my_iris {
        let value = ctx.db().get(iri).await?;
        if value.is_ordered_collection() {
            ordered.push(value);
        } else if value.is_collection() {
            unordered.push(value);
        }
    }
    if ordered.is_empty() && unordered.is_empty() {
        return Ok(());
    }

    // 5. Ownership traversal, bounded by the delegate's depth
    let delegate = ctx.federated()?.clone();
    let max_depth = delegate.max_inbox_forwarding_recursion_depth(ctx);
    let transport = ctx.db().new_transport(inbox, &ctx.app_agent).await?;
    if !owns_reachable_reference(ctx, &transport, activity, 1, max_depth).await? {
        tracing::debug!(activity = %id, "no owned reference within depth; not forwarding");
        return Ok(());
    }

    // 6. Let the delegate trim the candidates, then collect recipients
    let mut candidates = ordered;
    candidates.extend(unordered);
    let candidates = delegate
        .filter_forwarding(ctx, candidates, activity)
        .await?;
    let mut recipients = Vec::new();
    for collection in &candidates {
        for prop in ["orderedItems", "items"] {
            for member in collection.iris(prop) {
                if !recipients.contains(&member) {
                    recipients.push(member);
                }
            }
        }
    }
    if recipients.is_empty() {
        return Ok(());
    }

    // 7. Resolve to inboxes (excluding the receiving inbox) and deliver
    let delivery_depth = delegate.max_delivery_recursion_depth(ctx);
    let inboxes =
        resolve::resolve_inboxes(ctx, &transport, &recipients, Some(inbox), delivery_depth).await?;
    if inboxes.is_empty() {
        return Ok(());
    }
    let body = activity.to_bytes()?;
    tracing::info!(activity = %id, inboxes = inboxes.len(), "forwarding activity");
    transport.batch_deliver(&body, &inboxes).await
}

/// Depth-bounded search for an owned id reachable through
/// `object`/`target`/`inReplyTo`/`tag`. Dereference failures drop the
/// candidate instead of failing the traversal.
async fn owns_reachable_reference(
    ctx: &Context,
    transport: &Arc<dyn Transport>,
    value: &AsValue,
    depth: u32,
    max_depth: u32,
) -> Result<bool> {
    const REFERENCE_PROPS: &[&str] = &["object", "target", "inReplyTo", "tag"];

    if depth > max_depth {
        return Ok(false);
    }

    for prop in REFERENCE_PROPS {
        for entry in value.entries(prop) {
            if let Some(id) = entry.id() {
                if ctx.db().owns(&id).await? {
                    return Ok(true);
                }
            }

            if depth >= max_depth {
                continue;
            }
            let child = match entry {
                crate::vocab::PropEntry::Object(map) => Some(AsValue::from_map_unchecked(map)),
                crate::vocab::PropEntry::Iri(iri) => match transport.dereference(&iri).await {
                    Ok(raw) => Some(AsValue::from_map_unchecked(raw)),
                    Err(err) => {
                        tracing::debug!(iri = %iri, error = %err, "dereference failed; skipping");
                        None
                    }
                },
            };
            if let Some(child) = child {
                if Box::pin(owns_reachable_reference(
                    ctx,
                    transport,
                    &child,
                    depth + 1,
                    max_depth,
                ))
                .await?
                {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

/// Federate an outbox activity to its remote recipients.
///
/// Only invoked when federation is enabled and the Social side effects
/// left the activity deliverable.
pub async fn deliver(ctx: &Context, outbox: &Url, activity: &AsValue) -> Result<()> {
    let id = activity.require_id()?;

    // 1. Recipients, with the public pseudo-recipient partitioned out
    let (public, actors): (Vec<Url>, Vec<Url>) = recipients(activity)
        .into_iter()
        .partition(|iri| is_public(iri.as_str()));
    if !public.is_empty() {
        tracing::debug!(activity = %id, "public addressing present; delivering to explicit recipients only");
    }
    if actors.is_empty() {
        return Ok(());
    }

    // 2. Our own inbox is never a delivery target
    let own_actor = ctx.db().actor_for_outbox(outbox).await?;
    let own_inbox = ctx
        .db()
        .inbox_for_actor(&own_actor)
        .await?
        .map(|pair| pair.inbox);

    // 3. Resolve to inboxes
    let delegate = ctx.federated()?;
    let depth = delegate.max_delivery_recursion_depth(ctx);
    let transport = ctx.db().new_transport(outbox, &ctx.app_agent).await?;
    let inboxes =
        resolve::resolve_inboxes(ctx, &transport, &actors, own_inbox.as_ref(), depth).await?;
    if inboxes.is_empty() {
        return Ok(());
    }

    // 4. Strip hidden recipients from the outgoing copy
    let mut outgoing = activity.clone();
    strip_hidden_recipients(&mut outgoing);
    let body = outgoing.to_bytes()?;
    assert_no_hidden_recipients(&body)?;

    // 5. Fan out
    tracing::info!(activity = %id, inboxes = inboxes.len(), "delivering activity");
    transport.batch_deliver(&body, &inboxes).await
}

/// Invariant check on the serialized outgoing form: no `bto`/`bcc`
/// anywhere a recipient could read them.
fn assert_no_hidden_recipients(body: &[u8]) -> Result<()> {
    let raw: serde_json::Value = serde_json::from_slice(body)?;
    let top = raw
        .as_object()
        .ok_or_else(|| Error::Internal(anyhow::anyhow!("serialized activity is not an object")))?;

    let leaks_in = |map: &JsonMap| map.contains_key("bto") || map.contains_key("bcc");
    let mut leaked = leaks_in(top);
    match top.get("object") {
        Some(Value::Object(map)) => leaked |= leaks_in(map),
        Some(Value::Array(items)) => {
            for item in items {
                if let Value::Object(map) = item {
                    leaked |= leaks_in(map);
                }
            }
        }
        _ => {}
    }
    if leaked {
        return Err(Error::Internal(anyhow::anyhow!(
            "hidden recipients survived stripping"
        )));
    }
    Ok(())
}

/// Mint database ids for an activity about to enter an outbox, and for
/// every object a Create wraps.
pub async fn add_new_ids(ctx: &Context, activity: &mut AsValue) -> Result<()> {
    let id = ctx.db().new_id(activity).await?;
    activity.set("id", Value::String(id.to_string()));

    if !activity.is_or_extends("Create") {
        return Ok(());
    }
    let Some(object) = activity.get("object").cloned() else {
        return Ok(());
    };
    let rewritten = match object {
        Value::Object(map) => Value::Object(mint_object_id(ctx, map).await?),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(match item {
                    Value::Object(map) => Value::Object(mint_object_id(ctx, map).await?),
                    other => other,
                });
            }
            Value::Array(out)
        }
        other => other,
    };
    activity.set("object", rewritten);
    Ok(())
}

async fn mint_object_id(ctx: &Context, mut map: JsonMap) -> Result<JsonMap> {
    let id = ctx
        .db()
        .new_id(&AsValue::from_map_unchecked(map.clone()))
        .await?;
    map.insert("id".to_string(), Value::String(id.to_string()));
    Ok(map)
}

/// Wrap a bare object posted to an outbox in a synthesized Create.
///
/// The Create takes its actor from the outbox's owner and copies the
/// object's addressing.
pub async fn wrap_in_create(ctx: &Context, object: &AsValue, outbox: &Url) -> Result<AsValue> {
    let actor = ctx.db().actor_for_outbox(outbox).await?;

    let mut map = JsonMap::new();
    map.insert("type".to_string(), Value::String("Create".to_string()));
    map.insert("actor".to_string(), Value::String(actor.to_string()));
    map.insert("object".to_string(), Value::Object(object.as_map().clone()));
    for prop in addressing::ADDRESS_PROPS {
        if let Some(v) = object.get(prop) {
            map.insert((*prop).to_string(), v.clone());
        }
    }
    map.insert(
        "published".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    Ok(AsValue::from_map_unchecked(map))
}

/// Add/Remove semantics shared by both protocol directions: edit owned
/// collection targets, ignore everything else.
pub(crate) async fn edit_collection_target(
    ctx: &Context,
    activity: &AsValue,
    add: bool,
) -> Result<()> {
    let object_ids = activity.iris("object");
    if activity.entries("object").is_empty() {
        return Err(Error::ObjectRequired);
    }
    let targets = activity.iris("target");
    if targets.is_empty() {
        return Err(Error::TargetRequired);
    }

    for target in targets {
        if !ctx.db().owns(&target).await? {
            continue;
        }
        let value = ctx.db().get(&target).await?;
        if !value.is_collection() {
            continue;
        }
        let update = if add {
            crate::db::CollectionUpdate::add(object_ids.clone())
        } else {
            crate::db::CollectionUpdate::remove(object_ids.clone())
        };
        ctx.db().update_collection(&target, update).await?;
    }
    Ok(())
}

/// Undo precondition shared by both directions: the Undo's actors must
/// cover the actors of every referenced activity.
pub(crate) async fn require_undo_actors_match(
    ctx: &Context,
    transport: &Arc<dyn Transport>,
    activity: &AsValue,
) -> Result<()> {
    let entries = activity.entries("object");
    if entries.is_empty() {
        return Err(Error::ObjectRequired);
    }
    let undo_actors = activity.iris("actor");

    for entry in entries {
        let undone = match entry {
            crate::vocab::PropEntry::Object(map) => AsValue::from_map_unchecked(map),
            crate::vocab::PropEntry::Iri(iri) => {
                if ctx.db().owns(&iri).await? {
                    ctx.db().get(&iri).await?
                } else {
                    AsValue::from_map_unchecked(transport.dereference(&iri).await?)
                }
            }
        };
        for actor in undone.iris("actor") {
            if !undo_actors.contains(&actor) {
                return Err(Error::Validation(
                    "undo actors do not cover the undone activity's actors".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Whether two ids share an origin (scheme, host, port).
pub(crate) fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme() && a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

/// S2S Update/Delete precondition: every object id must come from the
/// activity id's host.
pub(crate) fn require_activity_origin(activity: &AsValue) -> Result<()> {
    let id = activity.require_id()?;
    let object_ids = activity.iris("object");
    if object_ids.is_empty() {
        return Err(Error::ObjectRequired);
    }
    if object_ids.iter().all(|oid| same_origin(&id, oid)) {
        Ok(())
    } else {
        Err(Error::WrongOrigin)
    }
}

/// Dispatch the application handler tables for an activity after its
/// default side effects ran.
pub(crate) async fn run_handlers(
    ctx: &mut Context,
    direction: Direction,
    activity: AsValue,
) -> Result<AsValue> {
    dispatch_activity(ctx, direction, activity).await
}
