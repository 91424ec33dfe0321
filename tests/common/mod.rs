//! Common test utilities: an in-memory database, a recording transport,
//! and permissive delegates wired into an `ApActor`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use fedcore::{
    ActivityHandlers, ApActor, ApRequest, AsValue, AuthResult, CollectionOpts, CollectionUpdate,
    CommonDelegate, Context, Database, EngineConfig, Error, FederatedDelegate, Hook, InboxPair,
    JsonMap, OnFollow, Result, SocialDelegate, Transport,
};

pub const BASE: &str = "https://srv.example";

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

pub fn map(json: Value) -> JsonMap {
    json.as_object().unwrap().clone()
}

/// In-memory database: objects by id, collections as ordered id lists,
/// box ownership tables. Everything under `BASE` is "owned".
pub struct MemoryDb {
    pub objects: Mutex<HashMap<Url, JsonMap>>,
    pub collections: Mutex<HashMap<Url, Vec<Url>>>,
    /// inbox/outbox/collection IRI -> owning actor IRI
    pub box_actors: Mutex<HashMap<Url, Url>>,
    /// inbox IRI -> outbox IRI
    pub box_pairs: Mutex<HashMap<Url, Url>>,
    /// actor IRI -> locally known inbox
    pub known_inboxes: Mutex<HashMap<Url, InboxPair>>,
    counter: AtomicU64,
    transport: Arc<RecordingTransport>,
}

impl MemoryDb {
    pub fn new(transport: Arc<RecordingTransport>) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            collections: Mutex::new(HashMap::new()),
            box_actors: Mutex::new(HashMap::new()),
            box_pairs: Mutex::new(HashMap::new()),
            known_inboxes: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(1),
            transport,
        }
    }

    pub fn put_object(&self, json: Value) {
        let obj = map(json);
        let id = url(obj.get("id").and_then(Value::as_str).expect("object id"));
        self.objects.lock().unwrap().insert(id, obj);
    }

    pub fn put_collection(&self, id: &Url, kind: &str, items: Vec<Url>) {
        self.objects.lock().unwrap().insert(
            id.clone(),
            map(serde_json::json!({"type": kind, "id": id.to_string()})),
        );
        self.collections.lock().unwrap().insert(id.clone(), items);
    }

    pub fn collection_items(&self, id: &Url) -> Vec<Url> {
        self.collections
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn object(&self, id: &Url) -> Option<JsonMap> {
        self.objects.lock().unwrap().get(id).cloned()
    }

    pub fn has_object(&self, id: &Url) -> bool {
        self.objects.lock().unwrap().contains_key(id)
    }
}

#[async_trait]
impl Database for MemoryDb {
    async fn collection_contains(&self, coll: &Url, id: &Url) -> Result<bool> {
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(coll)
            .is_some_and(|items| items.contains(id)))
    }

    async fn get_collection(&self, id: &Url, _opts: CollectionOpts) -> Result<AsValue> {
        let items = self.collection_items(id);
        let kind = self
            .object(id)
            .and_then(|m| m.get("type").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| "OrderedCollection".to_string());
        Ok(AsValue::from_map_unchecked(map(serde_json::json!({
            "type": kind,
            "id": id.to_string(),
            "totalItems": items.len(),
            "orderedItems": items.iter().map(Url::to_string).collect::<Vec<_>>(),
        }))))
    }

    async fn update_collection(&self, id: &Url, update: CollectionUpdate) -> Result<AsValue> {
        {
            let mut collections = self.collections.lock().unwrap();
            let items = collections.entry(id.clone()).or_default();
            for add in update.add.into_iter().rev() {
                if !items.contains(&add) {
                    items.insert(0, add);
                }
            }
            items.retain(|item| !update.remove.contains(item));
        }
        self.get_collection(id, CollectionOpts::default()).await
    }

    async fn owns(&self, id: &Url) -> Result<bool> {
        Ok(id.as_str().starts_with(BASE))
    }

    async fn actor_for_collection(&self, id: &Url) -> Result<Url> {
        self.box_actors
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Database(anyhow::anyhow!("no actor for collection {}", id)))
    }

    async fn actor_for_inbox(&self, id: &Url) -> Result<Url> {
        self.actor_for_collection(id).await
    }

    async fn actor_for_outbox(&self, id: &Url) -> Result<Url> {
        self.actor_for_collection(id).await
    }

    async fn outbox_for_inbox(&self, id: &Url) -> Result<Url> {
        self.box_pairs
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Database(anyhow::anyhow!("no outbox for inbox {}", id)))
    }

    async fn inbox_for_actor(&self, actor: &Url) -> Result<Option<InboxPair>> {
        Ok(self.known_inboxes.lock().unwrap().get(actor).cloned())
    }

    async fn exists(&self, id: &Url) -> Result<bool> {
        Ok(self.has_object(id))
    }

    async fn get(&self, id: &Url) -> Result<AsValue> {
        let stored = self
            .object(id)
            .ok_or_else(|| Error::Database(anyhow::anyhow!("not found: {}", id)))?;

        // Collections serve their live items
        if self.collections.lock().unwrap().contains_key(id) {
            return self.get_collection(id, CollectionOpts::default()).await;
        }
        Ok(AsValue::from_map_unchecked(stored))
    }

    async fn create(&self, value: &AsValue) -> Result<(AsValue, Option<JsonMap>)> {
        let id = value.require_id()?;
        self.objects
            .lock()
            .unwrap()
            .insert(id, value.as_map().clone());
        Ok((value.clone(), Some(value.as_map().clone())))
    }

    async fn update(&self, value: &AsValue) -> Result<AsValue> {
        let id = value.require_id()?;
        self.objects
            .lock()
            .unwrap()
            .insert(id, value.as_map().clone());
        Ok(value.clone())
    }

    async fn delete(&self, id: &Url) -> Result<()> {
        self.objects.lock().unwrap().remove(id);
        Ok(())
    }

    async fn new_id(&self, _value: &AsValue) -> Result<Url> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(url(&format!("{}/ids/{}", BASE, n)))
    }

    async fn new_transport(&self, _box_iri: &Url, _app_agent: &str) -> Result<Arc<dyn Transport>> {
        Ok(self.transport.clone())
    }
}

/// Transport double: records deliveries, serves canned remote documents.
#[derive(Default)]
pub struct RecordingTransport {
    pub remote: Mutex<HashMap<Url, JsonMap>>,
    pub delivered: Mutex<Vec<(Url, Value)>>,
}

impl RecordingTransport {
    pub fn put_remote(&self, json: Value) {
        let obj = map(json);
        let id = url(obj.get("id").and_then(Value::as_str).expect("remote id"));
        self.remote.lock().unwrap().insert(id, obj);
    }

    pub fn deliveries(&self) -> Vec<(Url, Value)> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn deliveries_to(&self, inbox: &Url) -> Vec<Value> {
        self.deliveries()
            .into_iter()
            .filter(|(target, _)| target == inbox)
            .map(|(_, body)| body)
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn dereference(&self, iri: &Url) -> Result<JsonMap> {
        self.remote
            .lock()
            .unwrap()
            .get(iri)
            .cloned()
            .ok_or_else(|| Error::Transport(anyhow::anyhow!("no remote document for {}", iri)))
    }

    async fn deliver(&self, body: &[u8], to: &Url) -> Result<()> {
        let value: Value = serde_json::from_slice(body)?;
        self.delivered.lock().unwrap().push((to.clone(), value));
        Ok(())
    }
}

/// Common delegate serving a configurable collection.
pub struct TestCommon {
    pub authenticated: bool,
    pub collection: Mutex<JsonMap>,
}

impl TestCommon {
    pub fn serving(collection: Value) -> Self {
        Self {
            authenticated: true,
            collection: Mutex::new(map(collection)),
        }
    }

    pub fn denying() -> Self {
        Self {
            authenticated: false,
            collection: Mutex::new(JsonMap::new()),
        }
    }

    fn auth(&self, ctx: Context) -> AuthResult {
        if self.authenticated {
            AuthResult::ok(ctx)
        } else {
            let mut response = http::Response::new(b"who are you".to_vec());
            *response.status_mut() = http::StatusCode::UNAUTHORIZED;
            AuthResult::denied(ctx, response)
        }
    }

    fn serve(&self) -> AsValue {
        AsValue::from_map_unchecked(self.collection.lock().unwrap().clone())
    }
}

#[async_trait]
impl CommonDelegate for TestCommon {
    async fn authenticate_get_inbox(&self, ctx: Context, _req: &ApRequest) -> Result<AuthResult> {
        Ok(self.auth(ctx))
    }

    async fn get_inbox(&self, _ctx: &Context, _req: &ApRequest) -> Result<AsValue> {
        Ok(self.serve())
    }

    async fn authenticate_get_outbox(&self, ctx: Context, _req: &ApRequest) -> Result<AuthResult> {
        Ok(self.auth(ctx))
    }

    async fn get_outbox(&self, _ctx: &Context, _req: &ApRequest) -> Result<AsValue> {
        Ok(self.serve())
    }
}

/// Social delegate recording which handler callbacks fired.
#[derive(Default)]
pub struct TestSocial {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ActivityHandlers for TestSocial {
    async fn create(&self, _ctx: &mut Context, _activity: &AsValue) -> Result<Hook> {
        self.calls.lock().unwrap().push("create".to_string());
        Ok(Hook::Pass)
    }

    async fn block(&self, _ctx: &mut Context, _activity: &AsValue) -> Result<Hook> {
        self.calls.lock().unwrap().push("block".to_string());
        Ok(Hook::Pass)
    }
}

#[async_trait]
impl SocialDelegate for TestSocial {
    async fn authenticate_post_outbox(&self, ctx: Context, _req: &ApRequest) -> Result<AuthResult> {
        Ok(AuthResult::ok(ctx))
    }
}

/// Federated delegate with a configurable follow policy and block list.
pub struct TestFederated {
    pub on_follow: OnFollow,
    pub blocked_actors: Vec<Url>,
    pub max_forwarding_depth: u32,
    pub calls: Mutex<Vec<String>>,
}

impl Default for TestFederated {
    fn default() -> Self {
        Self {
            on_follow: OnFollow::DoNothing,
            blocked_actors: Vec::new(),
            max_forwarding_depth: 4,
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ActivityHandlers for TestFederated {
    async fn create(&self, _ctx: &mut Context, _activity: &AsValue) -> Result<Hook> {
        self.calls.lock().unwrap().push("create".to_string());
        Ok(Hook::Pass)
    }

    async fn follow(&self, _ctx: &mut Context, _activity: &AsValue) -> Result<Hook> {
        self.calls.lock().unwrap().push("follow".to_string());
        Ok(Hook::Pass)
    }
}

#[async_trait]
impl FederatedDelegate for TestFederated {
    async fn authenticate_post_inbox(&self, ctx: Context, _req: &ApRequest) -> Result<AuthResult> {
        Ok(AuthResult::ok(ctx))
    }

    async fn blocked(&self, _ctx: &Context, actors: &[Url]) -> Result<bool> {
        Ok(actors.iter().any(|a| self.blocked_actors.contains(a)))
    }

    fn max_inbox_forwarding_recursion_depth(&self, _ctx: &Context) -> u32 {
        self.max_forwarding_depth
    }

    fn on_follow(&self, _ctx: &Context) -> OnFollow {
        self.on_follow
    }
}

/// A fully wired engine around one local actor, alice.
pub struct TestServer {
    pub actor: ApActor,
    pub db: Arc<MemoryDb>,
    pub transport: Arc<RecordingTransport>,
    pub common: Arc<TestCommon>,
    pub social: Arc<TestSocial>,
    pub federated: Arc<TestFederated>,
    pub alice: Url,
    pub inbox: Url,
    pub outbox: Url,
    pub followers: Url,
    pub following: Url,
    pub liked: Url,
}

impl TestServer {
    pub fn new() -> Self {
        Self::with_federated(TestFederated::default())
    }

    pub fn with_follow_policy(on_follow: OnFollow) -> Self {
        Self::with_federated(TestFederated {
            on_follow,
            ..TestFederated::default()
        })
    }

    pub fn with_federated(federated: TestFederated) -> Self {
        Self::build(
            TestCommon::serving(serde_json::json!({
                "type": "OrderedCollection",
                "orderedItems": [],
            })),
            federated,
        )
    }

    pub fn with_common(common: TestCommon) -> Self {
        Self::build(common, TestFederated::default())
    }

    pub fn with_social_handlers(handlers: Arc<dyn ActivityHandlers>) -> Self {
        let mut server = Self::new();
        server.install_social_handlers(handlers);
        server
    }

    fn install_social_handlers(&mut self, handlers: Arc<dyn ActivityHandlers>) {
        let config = EngineConfig::new(self.common.clone(), self.db.clone())
            .with_social(self.social.clone())
            .with_federated(self.federated.clone())
            .with_social_handlers(handlers);
        self.actor = ApActor::new(config, "fedcore-tests/0.1");
    }

    pub fn build(common: TestCommon, federated: TestFederated) -> Self {
        let transport = Arc::new(RecordingTransport::default());
        let db = Arc::new(MemoryDb::new(transport.clone()));
        let common = Arc::new(common);
        let social = Arc::new(TestSocial::default());
        let federated = Arc::new(federated);

        let alice = url(&format!("{}/u/alice", BASE));
        let inbox = url(&format!("{}/u/alice/inbox", BASE));
        let outbox = url(&format!("{}/u/alice/outbox", BASE));
        let followers = url(&format!("{}/u/alice/followers", BASE));
        let following = url(&format!("{}/u/alice/following", BASE));
        let liked = url(&format!("{}/u/alice/liked", BASE));

        db.put_object(serde_json::json!({
            "type": "Person",
            "id": alice.to_string(),
            "preferredUsername": "alice",
            "inbox": inbox.to_string(),
            "outbox": outbox.to_string(),
            "followers": followers.to_string(),
            "following": following.to_string(),
            "liked": liked.to_string(),
        }));
        for coll in [&inbox, &outbox, &followers, &following, &liked] {
            db.put_collection(coll, "OrderedCollection", Vec::new());
            db.box_actors
                .lock()
                .unwrap()
                .insert((*coll).clone(), alice.clone());
        }
        db.box_pairs
            .lock()
            .unwrap()
            .insert(inbox.clone(), outbox.clone());
        db.known_inboxes.lock().unwrap().insert(
            alice.clone(),
            InboxPair {
                inbox: inbox.clone(),
                shared_inbox: None,
            },
        );

        let config = EngineConfig::new(common.clone(), db.clone())
            .with_social(social.clone())
            .with_federated(federated.clone());

        let actor = ApActor::new(config, "fedcore-tests/0.1");

        Self {
            actor,
            db,
            transport,
            common,
            social,
            federated,
            alice,
            inbox,
            outbox,
            followers,
            following,
            liked,
        }
    }

    /// Register a remote actor reachable only through the transport.
    pub fn add_remote_actor(&self, actor: &str) -> (Url, Url) {
        let actor = url(actor);
        let inbox = url(&format!("{}/inbox", actor.as_str().trim_end_matches('/')));
        self.transport.put_remote(serde_json::json!({
            "type": "Person",
            "id": actor.to_string(),
            "inbox": inbox.to_string(),
        }));
        (actor, inbox)
    }

    pub fn post_inbox_request(&self, body: Value) -> ApRequest {
        ap_post(self.inbox.as_str(), body)
    }

    pub fn post_outbox_request(&self, body: Value) -> ApRequest {
        ap_post(self.outbox.as_str(), body)
    }
}

/// Build an ActivityPub POST request.
pub fn ap_post(uri: &str, body: Value) -> ApRequest {
    http::Request::builder()
        .method(http::Method::POST)
        .uri(uri)
        .header("Content-Type", "application/activity+json")
        .body(serde_json::to_vec(&body).unwrap())
        .unwrap()
}

/// Build an ActivityPub GET request.
pub fn ap_get(uri: &str) -> ApRequest {
    http::Request::builder()
        .method(http::Method::GET)
        .uri(uri)
        .header("Accept", "application/activity+json")
        .body(Vec::new())
        .unwrap()
}
