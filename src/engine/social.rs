//! Social API (client-to-server) per-type side effects
//!
//! Each default side effect runs first, then the application's handler
//! table gets the activity (and may rewrite it). The ordering is part of
//! the contract: handlers see the normalized, persisted state.

use serde_json::Value;
use url::Url;

use crate::addressing::{map_wrapped_objects, normalize_recipients};
use crate::context::Context;
use crate::delegate::Direction;
use crate::error::{Error, Result};
use crate::vocab::{AsValue, JsonMap, PropEntry};

use super::run_handlers;

/// Apply the C2S default side effects for an activity, then dispatch the
/// application handlers. Returns the possibly rewritten activity.
pub(crate) async fn run_side_effects(ctx: &mut Context, activity: AsValue) -> Result<AsValue> {
    let ty = activity.primary_type().map(str::to_string);
    let activity = match ty.as_deref() {
        Some("Create") => create(ctx, activity).await?,
        Some("Update") => {
            update(ctx, &activity).await?;
            activity
        }
        Some("Delete") => {
            delete(ctx, &activity).await?;
            activity
        }
        Some("Like") => {
            like(ctx, &activity).await?;
            activity
        }
        Some("Add") => {
            super::edit_collection_target(ctx, &activity, true).await?;
            activity
        }
        Some("Remove") => {
            super::edit_collection_target(ctx, &activity, false).await?;
            activity
        }
        Some("Undo") => {
            undo(ctx, &activity).await?;
            activity
        }
        Some("Block") => {
            block(ctx);
            activity
        }
        _ => activity,
    };
    run_handlers(ctx, Direction::Social, activity).await
}

/// Create: bind actors and objects to each other, normalize addressing,
/// persist every wrapped object.
async fn create(ctx: &mut Context, mut activity: AsValue) -> Result<AsValue> {
    if activity.entries("object").is_empty() {
        return Err(Error::ObjectRequired);
    }
    let actor_ids = activity.iris("actor");
    if actor_ids.is_empty() {
        return Err(Error::ActorRequired);
    }

    // Every actor id into every object's attributedTo, and every
    // attributedTo back into the activity's actors.
    let mut attributed: Vec<Url> = Vec::new();
    map_wrapped_objects(&mut activity, |map| {
        let mut object = AsValue::from_map_unchecked(std::mem::take(map));
        for id in object.iris("attributedTo") {
            if !attributed.contains(&id) {
                attributed.push(id);
            }
        }
        object.append_iris("attributedTo", &actor_ids);
        *map = object.into_map();
    });
    activity.append_iris("actor", &attributed);

    // Addressing flows both ways between the Create and its objects
    normalize_recipients(&mut activity);

    // Persist the wrapped objects; the activity itself persists later in
    // post_outbox
    for object in activity.embedded("object") {
        ctx.db()
            .create(&AsValue::from_map_unchecked(object))
            .await?;
    }
    Ok(activity)
}

/// Update: merge the new partial state over the stored value, honoring
/// literal nulls in the raw body as deletions.
async fn update(ctx: &mut Context, activity: &AsValue) -> Result<()> {
    let entries = activity.entries("object");
    if entries.is_empty() {
        return Err(Error::ObjectRequired);
    }

    let raw_objects = raw_object_entries(ctx)?;

    for (idx, entry) in entries.into_iter().enumerate() {
        let PropEntry::Object(patch) = entry else {
            return Err(Error::Validation(
                "Update requires embedded objects".to_string(),
            ));
        };
        let id = AsValue::from_map_unchecked(patch.clone())
            .id()
            .ok_or(Error::MissingId)?;

        // Fetch and merge, new over old
        let stored = ctx.db().get(&id).await?;
        let mut merged = stored.into_map();
        for (key, value) in &patch {
            merged.insert(key.clone(), value.clone());
        }

        // Keys that were literally null in the raw body are deletions
        if let Some(raw) = raw_objects.get(idx) {
            for (key, value) in raw {
                if value.is_null() {
                    merged.remove(key);
                }
            }
        }

        let value = AsValue::resolve(merged)?;
        ctx.db().update(&value).await?;
    }
    Ok(())
}

/// The raw body's object maps, aligned with the typed entries.
fn raw_object_entries(ctx: &Context) -> Result<Vec<JsonMap>> {
    let data = ctx
        .social_data()
        .ok_or_else(|| Error::Validation("Update outside the Social pipeline".to_string()))?;
    let out = match data.raw_activity.get("object") {
        Some(Value::Object(map)) => vec![map.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_object().cloned())
            .collect(),
        _ => Vec::new(),
    };
    Ok(out)
}

/// Delete: replace each object with its tombstone.
async fn delete(ctx: &mut Context, activity: &AsValue) -> Result<()> {
    let ids = activity.iris("object");
    if ids.is_empty() {
        return Err(Error::ObjectRequired);
    }
    for id in ids {
        let stored = ctx.db().get(&id).await?;
        let tombstone = crate::addressing::tombstone_for(&stored);
        ctx.db().update(&tombstone).await?;
    }
    Ok(())
}

/// Like: append the object ids to the actor's liked collection.
async fn like(ctx: &mut Context, activity: &AsValue) -> Result<()> {
    let object_ids = activity.iris("object");
    if object_ids.is_empty() {
        return Err(Error::ObjectRequired);
    }
    let outbox = ctx
        .social_data()
        .map(|d| d.outbox.clone())
        .or_else(|| ctx.box_iri.clone())
        .ok_or_else(|| Error::Validation("Like outside the Social pipeline".to_string()))?;

    let actor = ctx.db().actor_for_outbox(&outbox).await?;
    let actor_value = ctx.db().get(&actor).await?;
    let Some(liked) = actor_value.iris("liked").into_iter().next() else {
        tracing::debug!(actor = %actor, "actor advertises no liked collection");
        return Ok(());
    };
    ctx.db()
        .update_collection(&liked, crate::db::CollectionUpdate::add(object_ids))
        .await?;
    Ok(())
}

/// Undo: the Undo's actors must cover the undone activities' actors.
async fn undo(ctx: &mut Context, activity: &AsValue) -> Result<()> {
    let outbox = ctx
        .box_iri
        .clone()
        .ok_or_else(|| Error::Validation("Undo outside a request pipeline".to_string()))?;
    let transport = ctx.db().new_transport(&outbox, &ctx.app_agent).await?;
    super::require_undo_actors_match(ctx, &transport, activity).await
}

/// Block: never federated through the Social API.
fn block(ctx: &mut Context) {
    if let Some(data) = ctx.social_data_mut() {
        data.deliverable = false;
    }
}

