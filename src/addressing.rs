//! Addressing and recipient utilities
//!
//! Deduplication of ordered collections, recipient extraction,
//! recipient normalization between a Create and its wrapped objects,
//! hidden-recipient stripping, tombstone construction, and inbox
//! extraction from actor values.

use chrono::Utc;
use serde_json::Value;
use url::Url;

use crate::vocab::{AsValue, JsonMap};

/// The five addressing properties, in protocol order.
pub const ADDRESS_PROPS: &[&str] = &["to", "bto", "cc", "bcc", "audience"];

/// The addressing properties inbox-forwarding may consider.
/// `bto`/`bcc` are excluded: hidden recipients are never re-derived.
pub const DIRECT_PROPS: &[&str] = &["to", "cc", "audience"];

fn push_unique(list: &mut Vec<Url>, iri: Url) {
    if !list.contains(&iri) {
        list.push(iri);
    }
}

fn iris_of_map(map: &JsonMap, prop: &str) -> Vec<Url> {
    AsValue::from_map_unchecked(map.clone()).iris(prop)
}

/// Every recipient addressed by a value, deduplicated, order preserved.
pub fn recipients(value: &AsValue) -> Vec<Url> {
    let mut out = Vec::new();
    for prop in ADDRESS_PROPS {
        for iri in value.iris(prop) {
            push_unique(&mut out, iri);
        }
    }
    out
}

/// Recipients from `to`/`cc`/`audience` only.
pub fn direct_recipients(value: &AsValue) -> Vec<Url> {
    let mut out = Vec::new();
    for prop in DIRECT_PROPS {
        for iri in value.iris(prop) {
            push_unique(&mut out, iri);
        }
    }
    out
}

fn dedupe_item_array(items: &mut Vec<Value>) {
    let mut seen: Vec<Url> = Vec::new();
    items.retain(|item| {
        let id = match item {
            Value::String(s) => Url::parse(s).ok(),
            Value::Object(map) => map
                .get("id")
                .and_then(Value::as_str)
                .and_then(|s| Url::parse(s).ok()),
            _ => None,
        };
        match id {
            Some(id) if seen.contains(&id) => false,
            Some(id) => {
                seen.push(id);
                true
            }
            // Items without ids cannot collide; keep them.
            None => true,
        }
    });
}

/// Deduplicate a collection's `orderedItems`/`items` by id.
///
/// First occurrence wins; relative order is preserved; idempotent.
pub fn dedupe_ordered_items(collection: &mut AsValue) {
    for prop in ["orderedItems", "items"] {
        if let Some(Value::Array(items)) = collection.get(prop) {
            let mut items = items.clone();
            dedupe_item_array(&mut items);
            collection.set(prop, Value::Array(items));
        }
    }
}

pub(crate) fn map_wrapped_objects(activity: &mut AsValue, mut f: impl FnMut(&mut JsonMap)) {
    let Some(object) = activity.get("object").cloned() else {
        return;
    };
    let rewritten = match object {
        Value::Object(mut map) => {
            f(&mut map);
            Value::Object(map)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| match item {
                    Value::Object(mut map) => {
                        f(&mut map);
                        Value::Object(map)
                    }
                    other => other,
                })
                .collect(),
        ),
        other => other,
    };
    activity.set("object", rewritten);
}

/// Normalize addressing between a Create and its wrapped objects.
///
/// Per address kind, the activity ends up with the union of its own and
/// every object's recipients; each object gains the activity's original
/// recipients. Sibling objects are never merged with each other.
pub fn normalize_recipients(activity: &mut AsValue) {
    let objects = activity.embedded("object");

    for prop in ADDRESS_PROPS {
        let activity_orig = activity.iris(prop);

        // Activity := activity ∪ all objects
        let mut union = activity_orig.clone();
        for object in &objects {
            for iri in iris_of_map(object, prop) {
                push_unique(&mut union, iri);
            }
        }
        activity.set_iris(prop, &union);

        // Each object := object ∪ original activity
        map_wrapped_objects(activity, |map| {
            let mut merged = iris_of_map(map, prop);
            for iri in &activity_orig {
                push_unique(&mut merged, iri.clone());
            }
            if merged.is_empty() {
                map.remove(*prop);
            } else {
                map.insert(
                    (*prop).to_string(),
                    Value::Array(merged.iter().map(|u| Value::String(u.to_string())).collect()),
                );
            }
        });
    }
}

/// Remove `bto` and `bcc` from an activity and all wrapped objects.
pub fn strip_hidden_recipients(activity: &mut AsValue) {
    activity.remove("bto");
    activity.remove("bcc");
    map_wrapped_objects(activity, |map| {
        map.remove("bto");
        map.remove("bcc");
    });
}

/// Build a Tombstone replacing a deleted value.
///
/// Keeps the former id, records the former types, preserves
/// `published`/`updated`, stamps `deleted` with the current time.
pub fn tombstone_for(value: &AsValue) -> AsValue {
    let mut map = JsonMap::new();
    if let Some(id) = value.get("id") {
        map.insert("id".to_string(), id.clone());
    }
    map.insert("type".to_string(), Value::String("Tombstone".to_string()));

    let former: Vec<Value> = value
        .types()
        .into_iter()
        .map(|t| Value::String(t.to_string()))
        .collect();
    match former.len() {
        0 => {}
        1 => {
            map.insert("formerType".to_string(), former.into_iter().next().unwrap_or_default());
        }
        _ => {
            map.insert("formerType".to_string(), Value::Array(former));
        }
    }

    for prop in ["published", "updated"] {
        if let Some(v) = value.get(prop) {
            map.insert(prop.to_string(), v.clone());
        }
    }
    map.insert(
        "deleted".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    AsValue::from_map_unchecked(map)
}

/// The `inbox` IRI of an actor value.
pub fn actor_inbox(actor: &AsValue) -> Option<Url> {
    match actor.get("inbox") {
        Some(Value::String(s)) => Url::parse(s).ok(),
        Some(Value::Object(map)) => map
            .get("id")
            .and_then(Value::as_str)
            .and_then(|s| Url::parse(s).ok()),
        _ => None,
    }
}

/// The shared inbox advertised under `endpoints.sharedInbox`, if any.
pub fn actor_shared_inbox(actor: &AsValue) -> Option<Url> {
    actor
        .get("endpoints")
        .and_then(Value::as_object)
        .and_then(|e| e.get("sharedInbox"))
        .and_then(Value::as_str)
        .and_then(|s| Url::parse(s).ok())
}
