//! Per-request context
//!
//! One `Context` per HTTP request: an immutable configuration half
//! (delegates and database, shared via `Arc`) and a mutable request
//! half. Components derive altered copies freely; nothing global.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::db::Database;
use crate::delegate::{ActivityHandlers, CommonDelegate, FederatedDelegate, SocialDelegate};
use crate::vocab::JsonMap;

/// What to do when a Follow for one of our actors arrives.
///
/// Serializes in snake_case so hosts can read it straight out of their
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFollow {
    /// Record nothing, reply nothing
    #[default]
    DoNothing,
    /// Reply with an Accept and record the follower
    AutoAccept,
    /// Reply with a Reject
    AutoReject,
}

/// State threaded through a Social API (outbox) request.
#[derive(Debug, Clone)]
pub struct SocialData {
    /// The outbox handling this request
    pub outbox: Url,
    /// The original JSON body; Update needs to distinguish "key absent"
    /// from "key present with null"
    pub raw_activity: JsonMap,
    /// Side effects may veto federation of this activity
    pub deliverable: bool,
}

/// State threaded through a Federated Protocol (inbox) request.
#[derive(Debug, Clone)]
pub struct FederatedData {
    /// The inbox handling this request
    pub inbox: Url,
    /// Follow reply policy, pulled from the federated delegate
    pub on_follow: OnFollow,
    /// Id of an activity just added to an outbox; inbox forwarding must
    /// not treat its own echo as already seen
    pub new_activity_id: Option<Url>,
}

/// Which half of the pipeline the context currently lives in.
#[derive(Debug, Clone, Default)]
pub enum RequestData {
    /// Outside any protocol pipeline (GET handling, setup)
    #[default]
    None,
    /// Social API (client-to-server) pipeline
    Social(SocialData),
    /// Federated Protocol (server-to-server) pipeline
    Federated(FederatedData),
}

/// Immutable engine configuration, supplied once at construction.
pub struct EngineConfig {
    /// Delegate for behavior shared by both protocol halves
    pub common: Arc<dyn CommonDelegate>,
    /// Social API delegate; `None` disables the Social API
    pub social: Option<Arc<dyn SocialDelegate>>,
    /// Federated Protocol delegate; `None` disables federation
    pub federated: Option<Arc<dyn FederatedDelegate>>,
    /// Per-type handler overrides tried first for Social dispatch
    pub social_handlers: Option<Arc<dyn ActivityHandlers>>,
    /// Per-type handler overrides tried first for Federated dispatch
    pub federated_handlers: Option<Arc<dyn ActivityHandlers>>,
    /// Handlers of last resort
    pub fallback: Option<Arc<dyn ActivityHandlers>>,
    /// Persistence capability
    pub db: Arc<dyn Database>,
}

impl EngineConfig {
    /// Configuration with both protocol halves disabled.
    pub fn new(common: Arc<dyn CommonDelegate>, db: Arc<dyn Database>) -> Self {
        Self {
            common,
            social: None,
            federated: None,
            social_handlers: None,
            federated_handlers: None,
            fallback: None,
            db,
        }
    }

    /// Enable the Social API with this delegate.
    pub fn with_social(mut self, delegate: Arc<dyn SocialDelegate>) -> Self {
        self.social = Some(delegate);
        self
    }

    /// Enable the Federated Protocol with this delegate.
    pub fn with_federated(mut self, delegate: Arc<dyn FederatedDelegate>) -> Self {
        self.federated = Some(delegate);
        self
    }

    /// Per-type overrides consulted first for Social dispatch.
    pub fn with_social_handlers(mut self, handlers: Arc<dyn ActivityHandlers>) -> Self {
        self.social_handlers = Some(handlers);
        self
    }

    /// Per-type overrides consulted first for Federated dispatch.
    pub fn with_federated_handlers(mut self, handlers: Arc<dyn ActivityHandlers>) -> Self {
        self.federated_handlers = Some(handlers);
        self
    }

    /// Handlers of last resort.
    pub fn with_fallback(mut self, handlers: Arc<dyn ActivityHandlers>) -> Self {
        self.fallback = Some(handlers);
        self
    }
}

/// Configuration plus per-request state.
#[derive(Clone)]
pub struct Context {
    config: Arc<EngineConfig>,
    /// The inbox/outbox IRI handling the current call
    pub box_iri: Option<Url>,
    /// User-Agent fragment for outbound requests on this actor's behalf
    pub app_agent: String,
    /// Pipeline-half state
    pub request: RequestData,
    /// Free-form application side-channel
    pub data: HashMap<String, Value>,
}

impl Context {
    /// Fresh request context over shared configuration.
    pub fn new(config: Arc<EngineConfig>, app_agent: impl Into<String>) -> Self {
        Self {
            config,
            box_iri: None,
            app_agent: app_agent.into(),
            request: RequestData::None,
            data: HashMap::new(),
        }
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The database capability.
    pub fn db(&self) -> &Arc<dyn Database> {
        &self.config.db
    }

    /// Whether the Social API half is enabled.
    pub fn social_enabled(&self) -> bool {
        self.config.social.is_some()
    }

    /// Whether the Federated Protocol half is enabled.
    pub fn federated_enabled(&self) -> bool {
        self.config.federated.is_some()
    }

    /// The social delegate, or `DelegateMissing`.
    pub fn social(&self) -> crate::error::Result<&Arc<dyn SocialDelegate>> {
        self.config
            .social
            .as_ref()
            .ok_or(crate::error::Error::DelegateMissing("social"))
    }

    /// The federated delegate, or `DelegateMissing`.
    pub fn federated(&self) -> crate::error::Result<&Arc<dyn FederatedDelegate>> {
        self.config
            .federated
            .as_ref()
            .ok_or(crate::error::Error::DelegateMissing("federated"))
    }

    /// Derive a copy living in the Social pipeline.
    pub fn with_social(&self, outbox: Url, raw_activity: JsonMap) -> Self {
        let mut ctx = self.clone();
        ctx.box_iri = Some(outbox.clone());
        ctx.request = RequestData::Social(SocialData {
            outbox,
            raw_activity,
            deliverable: true,
        });
        ctx
    }

    /// Derive a copy living in the Federated pipeline.
    pub fn with_federated(
        &self,
        inbox: Url,
        on_follow: OnFollow,
        new_activity_id: Option<Url>,
    ) -> Self {
        let mut ctx = self.clone();
        ctx.box_iri = Some(inbox.clone());
        ctx.request = RequestData::Federated(FederatedData {
            inbox,
            on_follow,
            new_activity_id,
        });
        ctx
    }

    /// The social request state, when inside that pipeline.
    pub fn social_data(&self) -> Option<&SocialData> {
        match &self.request {
            RequestData::Social(data) => Some(data),
            _ => None,
        }
    }

    /// Mutable social request state.
    pub fn social_data_mut(&mut self) -> Option<&mut SocialData> {
        match &mut self.request {
            RequestData::Social(data) => Some(data),
            _ => None,
        }
    }

    /// The federated request state, when inside that pipeline.
    pub fn federated_data(&self) -> Option<&FederatedData> {
        match &self.request {
            RequestData::Federated(data) => Some(data),
            _ => None,
        }
    }

    /// Whether a Social side effect marked the activity deliverable.
    /// Defaults to true outside the Social pipeline.
    pub fn deliverable(&self) -> bool {
        self.social_data().map(|d| d.deliverable).unwrap_or(true)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("box_iri", &self.box_iri)
            .field("app_agent", &self.app_agent)
            .field("request", &self.request)
            .field("social_enabled", &self.social_enabled())
            .field("federated_enabled", &self.federated_enabled())
            .finish()
    }
}
