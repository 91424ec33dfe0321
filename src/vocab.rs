//! Ontology facade
//!
//! Resolves raw JSON maps into typed ActivityStreams values, serializes
//! them back, and answers meta questions about the type hierarchy
//! ("is this value, or a type it extends from, an Activity?").
//!
//! Values stay JSON-map-backed throughout the engine: a `serde_json::Map`
//! can express "key present with null" distinctly from "key absent",
//! which Update semantics depend on.

use chrono::{DateTime, Utc};
use serde_json::Value;
use url::Url;

use crate::error::{Error, Result};

/// Shorthand for a JSON object map.
pub type JsonMap = serde_json::Map<String, Value>;

/// The ActivityStreams JSON-LD context IRI.
pub const AS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

/// The public pseudo-collection IRI.
pub const PUBLIC_IRI: &str = "https://www.w3.org/ns/activitystreams#Public";

/// Core AS2 vocabulary: each type and the types it directly extends.
///
/// Extension types from other vocabularies are unknown to the engine and
/// fail resolution; hosts handle them ahead of the engine if they care.
const TYPE_PARENTS: &[(&str, &[&str])] = &[
    ("Object", &[]),
    ("Link", &[]),
    ("Activity", &["Object"]),
    ("IntransitiveActivity", &["Activity"]),
    ("Collection", &["Object"]),
    ("OrderedCollection", &["Collection"]),
    ("CollectionPage", &["Collection"]),
    ("OrderedCollectionPage", &["OrderedCollection", "CollectionPage"]),
    ("Accept", &["Activity"]),
    ("TentativeAccept", &["Accept"]),
    ("Add", &["Activity"]),
    ("Announce", &["Activity"]),
    ("Arrive", &["IntransitiveActivity"]),
    ("Ignore", &["Activity"]),
    ("Block", &["Ignore"]),
    ("Create", &["Activity"]),
    ("Delete", &["Activity"]),
    ("Dislike", &["Activity"]),
    ("Flag", &["Activity"]),
    ("Follow", &["Activity"]),
    ("Offer", &["Activity"]),
    ("Invite", &["Offer"]),
    ("Join", &["Activity"]),
    ("Leave", &["Activity"]),
    ("Like", &["Activity"]),
    ("Listen", &["Activity"]),
    ("Move", &["Activity"]),
    ("Question", &["IntransitiveActivity"]),
    ("Read", &["Activity"]),
    ("Reject", &["Activity"]),
    ("TentativeReject", &["Reject"]),
    ("Remove", &["Activity"]),
    ("Travel", &["IntransitiveActivity"]),
    ("Undo", &["Activity"]),
    ("Update", &["Activity"]),
    ("View", &["Activity"]),
    ("Application", &["Object"]),
    ("Group", &["Object"]),
    ("Organization", &["Object"]),
    ("Person", &["Object"]),
    ("Service", &["Object"]),
    ("Article", &["Object"]),
    ("Document", &["Object"]),
    ("Audio", &["Document"]),
    ("Image", &["Document"]),
    ("Page", &["Document"]),
    ("Video", &["Document"]),
    ("Event", &["Object"]),
    ("Note", &["Object"]),
    ("Place", &["Object"]),
    ("Profile", &["Object"]),
    ("Relationship", &["Object"]),
    ("Tombstone", &["Object"]),
    ("Mention", &["Link"]),
];

fn parents_of(ty: &str) -> Option<&'static [&'static str]> {
    TYPE_PARENTS
        .iter()
        .find(|(name, _)| *name == ty)
        .map(|(_, parents)| *parents)
}

/// Whether `ty` names a type in the core vocabulary.
pub fn known_type(ty: &str) -> bool {
    parents_of(ty).is_some()
}

/// Whether `ty` is `ancestor` or transitively extends it.
pub fn type_extends(ty: &str, ancestor: &str) -> bool {
    if ty == ancestor {
        return true;
    }
    let Some(parents) = parents_of(ty) else {
        return false;
    };
    parents.iter().any(|p| type_extends(p, ancestor))
}

/// Whether an addressing entry names the public pseudo-collection.
///
/// Accepts the full IRI and the JSON-LD shorthands remote software emits.
pub fn is_public(iri: &str) -> bool {
    iri == PUBLIC_IRI || iri == "as:Public" || iri == "Public"
}

/// One entry of an object-or-IRI valued property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropEntry {
    /// Reference by IRI
    Iri(Url),
    /// Embedded literal value
    Object(JsonMap),
}

impl PropEntry {
    /// The entry's id: the IRI itself, or the embedded value's `id`.
    pub fn id(&self) -> Option<Url> {
        match self {
            PropEntry::Iri(iri) => Some(iri.clone()),
            PropEntry::Object(map) => map
                .get("id")
                .and_then(Value::as_str)
                .and_then(|s| Url::parse(s).ok()),
        }
    }
}

/// A typed ActivityStreams value over its JSON map.
#[derive(Debug, Clone, PartialEq)]
pub struct AsValue {
    map: JsonMap,
}

impl AsValue {
    /// Resolve a raw JSON map into a typed value.
    ///
    /// # Errors
    /// `Error::UnmatchedType` when none of the map's types belong to the
    /// core vocabulary.
    pub fn resolve(map: JsonMap) -> Result<Self> {
        let value = Self { map };
        if value.primary_type().is_none() {
            return Err(Error::UnmatchedType);
        }
        Ok(value)
    }

    /// Wrap a map the engine built itself, skipping type resolution.
    pub fn from_map_unchecked(map: JsonMap) -> Self {
        Self { map }
    }

    /// All declared type names, in document order.
    pub fn types(&self) -> Vec<&str> {
        match self.map.get("type") {
            Some(Value::String(s)) => vec![s.as_str()],
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// The first declared type the engine knows; `None` for foreign values.
    pub fn primary_type(&self) -> Option<&str> {
        self.types().into_iter().find(|ty| known_type(ty))
    }

    /// Whether any declared type is `ancestor` or extends it.
    pub fn is_or_extends(&self, ancestor: &str) -> bool {
        self.types().iter().any(|ty| type_extends(ty, ancestor))
    }

    /// Whether this value is an Activity (or a subtype).
    pub fn is_activity(&self) -> bool {
        self.is_or_extends("Activity")
    }

    /// Whether this value is a Collection of any flavor.
    pub fn is_collection(&self) -> bool {
        self.is_or_extends("Collection")
    }

    /// Whether this value is an OrderedCollection (or page thereof).
    pub fn is_ordered_collection(&self) -> bool {
        self.is_or_extends("OrderedCollection")
    }

    /// The value's `id`, when present and a valid IRI.
    pub fn id(&self) -> Option<Url> {
        self.map
            .get("id")
            .and_then(Value::as_str)
            .and_then(|s| Url::parse(s).ok())
    }

    /// The value's `id`, or `Error::MissingId`.
    pub fn require_id(&self) -> Result<Url> {
        self.id().ok_or(Error::MissingId)
    }

    /// Raw property access.
    pub fn get(&self, prop: &str) -> Option<&Value> {
        self.map.get(prop)
    }

    /// Property entries as IRI-or-embedded-object items.
    ///
    /// Single values and arrays are treated alike; entries that are
    /// neither strings nor objects are skipped.
    pub fn entries(&self, prop: &str) -> Vec<PropEntry> {
        fn one(v: &Value) -> Option<PropEntry> {
            match v {
                Value::String(s) => Url::parse(s).ok().map(PropEntry::Iri),
                Value::Object(map) => Some(PropEntry::Object(map.clone())),
                _ => None,
            }
        }
        match self.map.get(prop) {
            Some(Value::Array(items)) => items.iter().filter_map(one).collect(),
            Some(v) => one(v).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Ids referenced by a property: IRI entries plus embedded ids.
    pub fn iris(&self, prop: &str) -> Vec<Url> {
        self.entries(prop).iter().filter_map(PropEntry::id).collect()
    }

    /// Embedded literal values of a property (IRI entries skipped).
    pub fn embedded(&self, prop: &str) -> Vec<JsonMap> {
        self.entries(prop)
            .into_iter()
            .filter_map(|e| match e {
                PropEntry::Object(map) => Some(map),
                PropEntry::Iri(_) => None,
            })
            .collect()
    }

    /// The `published` timestamp, when present and RFC 3339.
    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.map
            .get("published")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Set a property to a raw JSON value.
    pub fn set(&mut self, prop: &str, value: Value) {
        self.map.insert(prop.to_string(), value);
    }

    /// Remove a property, returning its old value.
    pub fn remove(&mut self, prop: &str) -> Option<Value> {
        self.map.remove(prop)
    }

    /// Replace a property with a list of IRIs; an empty list removes it.
    pub fn set_iris(&mut self, prop: &str, iris: &[Url]) {
        if iris.is_empty() {
            self.map.remove(prop);
            return;
        }
        let items: Vec<Value> = iris.iter().map(|u| Value::String(u.to_string())).collect();
        self.map.insert(prop.to_string(), Value::Array(items));
    }

    /// Append IRIs to a property, skipping ids already present.
    pub fn append_iris(&mut self, prop: &str, iris: &[Url]) {
        let mut merged = self.iris(prop);
        for iri in iris {
            if !merged.contains(iri) {
                merged.push(iri.clone());
            }
        }
        // Preserve embedded entries by only rewriting when all entries are IRIs
        let had_embedded = self
            .entries(prop)
            .iter()
            .any(|e| matches!(e, PropEntry::Object(_)));
        if had_embedded {
            let existing = self.iris(prop);
            let mut items: Vec<Value> = match self.map.get(prop) {
                Some(Value::Array(vs)) => vs.clone(),
                Some(v) => vec![v.clone()],
                None => Vec::new(),
            };
            for iri in iris {
                if !existing.contains(iri) {
                    items.push(Value::String(iri.to_string()));
                }
            }
            self.map.insert(prop.to_string(), Value::Array(items));
        } else {
            self.set_iris(prop, &merged);
        }
    }

    /// Borrow the backing map.
    pub fn as_map(&self) -> &JsonMap {
        &self.map
    }

    /// Take the backing map.
    pub fn into_map(self) -> JsonMap {
        self.map
    }

    /// Serialize for the wire, ensuring an `@context` is present.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut map = self.map.clone();
        map.entry("@context".to_string())
            .or_insert_with(|| Value::String(AS_CONTEXT.to_string()));
        Ok(serde_json::to_vec(&Value::Object(map))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(json: serde_json::Value) -> JsonMap {
        json.as_object().unwrap().clone()
    }

    #[test]
    fn resolve_rejects_unknown_types() {
        let err = AsValue::resolve(map(serde_json::json!({"type": "FancyWidget"}))).unwrap_err();
        assert!(matches!(err, Error::UnmatchedType));

        let err = AsValue::resolve(map(serde_json::json!({"content": "no type"}))).unwrap_err();
        assert!(matches!(err, Error::UnmatchedType));
    }

    #[test]
    fn resolve_accepts_any_known_type_in_an_array() {
        let v = AsValue::resolve(map(serde_json::json!({
            "type": ["ExtWidget", "Note"],
            "id": "https://srv.example/notes/1"
        })))
        .unwrap();
        assert_eq!(v.primary_type(), Some("Note"));
        assert!(!v.is_activity());
    }

    #[test]
    fn type_extension_is_reflexive_and_transitive() {
        assert!(type_extends("Activity", "Activity"));
        assert!(type_extends("Create", "Activity"));
        assert!(type_extends("Block", "Activity")); // Block -> Ignore -> Activity
        assert!(type_extends("TentativeAccept", "Accept"));
        assert!(type_extends("OrderedCollectionPage", "Collection"));
        assert!(!type_extends("Note", "Activity"));
        assert!(!type_extends("Nonexistent", "Activity"));
    }

    #[test]
    fn public_iri_shorthands_are_recognized() {
        assert!(is_public(PUBLIC_IRI));
        assert!(is_public("as:Public"));
        assert!(is_public("Public"));
        assert!(!is_public("https://srv.example/users/alice"));
    }

    #[test]
    fn entries_mix_iris_and_embedded_objects() {
        let v = AsValue::resolve(map(serde_json::json!({
            "type": "Create",
            "id": "https://srv.example/a/1",
            "object": [
                "https://srv.example/notes/1",
                {"type": "Note", "id": "https://srv.example/notes/2"}
            ]
        })))
        .unwrap();

        let ids: Vec<String> = v.iris("object").iter().map(Url::to_string).collect();
        assert_eq!(
            ids,
            vec![
                "https://srv.example/notes/1".to_string(),
                "https://srv.example/notes/2".to_string()
            ]
        );
        assert_eq!(v.embedded("object").len(), 1);
    }

    #[test]
    fn to_bytes_always_carries_a_context() {
        let v = AsValue::resolve(map(serde_json::json!({
            "type": "Note",
            "id": "https://srv.example/notes/1"
        })))
        .unwrap();
        let bytes = v.to_bytes().unwrap();
        let round: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(round["@context"], AS_CONTEXT);
    }

    #[test]
    fn append_iris_skips_duplicates() {
        let mut v = AsValue::resolve(map(serde_json::json!({
            "type": "Note",
            "id": "https://srv.example/notes/1",
            "to": ["https://srv.example/users/alice"]
        })))
        .unwrap();
        v.append_iris(
            "to",
            &[
                Url::parse("https://srv.example/users/alice").unwrap(),
                Url::parse("https://srv.example/users/bob").unwrap(),
            ],
        );
        assert_eq!(v.iris("to").len(), 2);
    }
}
