//! Federated Protocol (server-to-server) per-type side effects
//!
//! Applied after an activity is accepted into an inbox. Each default
//! side effect runs first, then the application handler table.

use serde_json::Value;
use std::sync::Arc;
use url::Url;

use crate::context::{Context, OnFollow};
use crate::db::CollectionUpdate;
use crate::delegate::Direction;
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::vocab::{AsValue, JsonMap, PropEntry};

use super::{resolve, run_handlers};

/// Apply the S2S default side effects for an activity, then dispatch the
/// application handlers.
pub(crate) async fn run_side_effects(ctx: &mut Context, activity: AsValue) -> Result<AsValue> {
    match activity.primary_type() {
        Some("Create") => create(ctx, &activity).await?,
        Some("Update") => update(ctx, &activity).await?,
        Some("Delete") => delete(ctx, &activity).await?,
        Some("Follow") => follow(ctx, &activity).await?,
        Some("Accept") => accept(ctx, &activity).await?,
        Some("Like") => record_reaction(ctx, &activity, "likes").await?,
        Some("Announce") => record_reaction(ctx, &activity, "shares").await?,
        Some("Add") => super::edit_collection_target(ctx, &activity, true).await?,
        Some("Remove") => super::edit_collection_target(ctx, &activity, false).await?,
        Some("Undo") => undo(ctx, &activity).await?,
        // Reject and Block carry no default inbox-side state change
        _ => {}
    }
    run_handlers(ctx, Direction::Federated, activity).await
}

fn inbox_iri(ctx: &Context) -> Result<Url> {
    ctx.federated_data()
        .map(|d| d.inbox.clone())
        .or_else(|| ctx.box_iri.clone())
        .ok_or_else(|| Error::Validation("side effect outside the Federated pipeline".to_string()))
}

async fn transport_for(ctx: &Context) -> Result<Arc<dyn Transport>> {
    let inbox = inbox_iri(ctx)?;
    ctx.db().new_transport(&inbox, &ctx.app_agent).await
}

/// Create: persist every wrapped object, dereferencing IRI-only entries.
async fn create(ctx: &mut Context, activity: &AsValue) -> Result<()> {
    let entries = activity.entries("object");
    if entries.is_empty() {
        return Err(Error::ObjectRequired);
    }

    let transport = if entries.iter().any(|e| matches!(e, PropEntry::Iri(_))) {
        Some(transport_for(ctx).await?)
    } else {
        None
    };

    for entry in entries {
        let object = match (entry, &transport) {
            (PropEntry::Object(map), _) => AsValue::from_map_unchecked(map),
            (PropEntry::Iri(iri), Some(transport)) => {
                AsValue::resolve(transport.dereference(&iri).await?)?
            }
            (PropEntry::Iri(_), None) => continue,
        };
        ctx.db().create(&object).await?;
    }
    Ok(())
}

/// Update: origin must match, then replace the stored objects.
async fn update(ctx: &mut Context, activity: &AsValue) -> Result<()> {
    super::require_activity_origin(activity)?;
    for entry in activity.entries("object") {
        let PropEntry::Object(map) = entry else {
            return Err(Error::Validation(
                "Update requires embedded objects".to_string(),
            ));
        };
        let value = AsValue::resolve(map)?;
        ctx.db().update(&value).await?;
    }
    Ok(())
}

/// Delete: origin must match, then physically delete.
async fn delete(ctx: &mut Context, activity: &AsValue) -> Result<()> {
    super::require_activity_origin(activity)?;
    for id in activity.iris("object") {
        ctx.db().delete(&id).await?;
    }
    Ok(())
}

/// Follow: honor the configured auto-accept/auto-reject policy when one
/// of our actors is the Follow's object.
async fn follow(ctx: &mut Context, activity: &AsValue) -> Result<()> {
    let objects = activity.iris("object");
    if objects.is_empty() {
        return Err(Error::ObjectRequired);
    }

    let policy = ctx
        .federated_data()
        .map(|d| d.on_follow)
        .unwrap_or_default();
    if policy == OnFollow::DoNothing {
        return Ok(());
    }

    let inbox = inbox_iri(ctx)?;
    let our_actor = ctx.db().actor_for_inbox(&inbox).await?;
    if !objects.contains(&our_actor) {
        return Ok(());
    }

    let follower_ids = activity.iris("actor");
    if follower_ids.is_empty() {
        return Err(Error::ActorRequired);
    }

    // Synthesize the reply and deliver it to the Follow's actors
    let reply_type = match policy {
        OnFollow::AutoAccept => "Accept",
        OnFollow::AutoReject => "Reject",
        OnFollow::DoNothing => unreachable!("handled above"),
    };
    let mut reply = JsonMap::new();
    reply.insert("type".to_string(), Value::String(reply_type.to_string()));
    reply.insert(
        "actor".to_string(),
        Value::String(our_actor.to_string()),
    );
    reply.insert(
        "object".to_string(),
        Value::Object(activity.as_map().clone()),
    );
    reply.insert(
        "to".to_string(),
        Value::Array(
            follower_ids
                .iter()
                .map(|u| Value::String(u.to_string()))
                .collect(),
        ),
    );
    let mut reply = AsValue::from_map_unchecked(reply);
    let reply_id = ctx.db().new_id(&reply).await?;
    reply.set("id", Value::String(reply_id.to_string()));

    let transport = transport_for(ctx).await?;
    let delegate = ctx.federated()?;
    let depth = delegate.max_delivery_recursion_depth(ctx);
    let inboxes =
        resolve::resolve_inboxes(ctx, &transport, &follower_ids, Some(&inbox), depth).await?;
    if !inboxes.is_empty() {
        let body = reply.to_bytes()?;
        tracing::info!(follow = ?activity.id().map(|u| u.to_string()), reply = reply_type, "replying to follow");
        transport.batch_deliver(&body, &inboxes).await?;
    }

    // Auto-accept also records the new followers
    if policy == OnFollow::AutoAccept {
        let actor_value = ctx.db().get(&our_actor).await?;
        if let Some(followers) = actor_value.iris("followers").into_iter().next() {
            ctx.db()
                .update_collection(&followers, CollectionUpdate::add(follower_ids))
                .await?;
        } else {
            tracing::warn!(actor = %our_actor, "actor advertises no followers collection");
        }
    }
    Ok(())
}

/// Accept: when the object is our outstanding Follow, record the new
/// followees — provided every accepting actor was an object of it.
async fn accept(ctx: &mut Context, activity: &AsValue) -> Result<()> {
    let entries = activity.entries("object");
    if entries.is_empty() {
        return Err(Error::ObjectRequired);
    }

    let inbox = inbox_iri(ctx)?;
    let our_actor = ctx.db().actor_for_inbox(&inbox).await?;
    let accept_actors = activity.iris("actor");

    for entry in entries {
        let follow = match entry {
            PropEntry::Object(map) => AsValue::from_map_unchecked(map),
            PropEntry::Iri(iri) => {
                if !ctx.db().owns(&iri).await? {
                    continue;
                }
                ctx.db().get(&iri).await?
            }
        };
        if !follow.is_or_extends("Follow") {
            continue;
        }
        let Some(follow_id) = follow.id() else {
            continue;
        };
        if !ctx.db().owns(&follow_id).await? {
            continue;
        }

        let followed = follow.iris("object");
        for actor in &accept_actors {
            if !followed.contains(actor) {
                return Err(Error::Validation(
                    "accept actor was not an object of our follow".to_string(),
                ));
            }
        }

        let actor_value = ctx.db().get(&our_actor).await?;
        if let Some(following) = actor_value.iris("following").into_iter().next() {
            ctx.db()
                .update_collection(&following, CollectionUpdate::add(accept_actors.clone()))
                .await?;
        } else {
            tracing::warn!(actor = %our_actor, "actor advertises no following collection");
        }
    }
    Ok(())
}

/// Like/Announce: record the activity id in the owned object's
/// `likes`/`shares` collection, minting one when absent.
async fn record_reaction(ctx: &mut Context, activity: &AsValue, prop: &str) -> Result<()> {
    let object_ids = activity.iris("object");
    if object_ids.is_empty() {
        return Err(Error::ObjectRequired);
    }
    let activity_id = activity.require_id()?;

    for object_id in object_ids {
        if !ctx.db().owns(&object_id).await? {
            continue;
        }
        let mut object = ctx.db().get(&object_id).await?;
        match object.iris(prop).into_iter().next() {
            Some(collection) => {
                ctx.db()
                    .update_collection(
                        &collection,
                        CollectionUpdate::add(vec![activity_id.clone()]),
                    )
                    .await?;
            }
            None => {
                object.set(
                    prop,
                    serde_json::json!({
                        "type": "OrderedCollection",
                        "totalItems": 1,
                        "orderedItems": [activity_id.to_string()],
                    }),
                );
                ctx.db().update(&object).await?;
            }
        }
    }
    Ok(())
}

/// Undo: actor coverage check; the actual reversal is the application's.
async fn undo(ctx: &mut Context, activity: &AsValue) -> Result<()> {
    let transport = transport_for(ctx).await?;
    super::require_undo_actors_match(ctx, &transport, activity).await
}
