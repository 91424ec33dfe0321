//! Request-level orchestrators
//!
//! `ApActor` owns the engine configuration and exposes the four
//! protocol state machines: POST/GET against inboxes and outboxes.
//! Each pipeline is a linear sequence of named gates; a gate either
//! advances or terminates with a specific HTTP response. Errors the
//! protocol does not map to a status propagate to the host unchanged.

use std::sync::Arc;

use chrono::Utc;
use http::{Method, StatusCode, header};
use serde_json::Value;
use url::Url;

use crate::addressing::dedupe_ordered_items;
use crate::context::{Context, EngineConfig};
use crate::delegate::{ApRequest, ApResponse, AuthResult};
use crate::engine;
use crate::error::{Error, Result};
use crate::transport::httpsig;
use crate::vocab::{AsValue, JsonMap};

/// Media type for ActivityPub payloads.
pub const ACTIVITY_JSON: &str = "application/activity+json";

/// The alternative JSON-LD media type, only with the AS profile.
const LD_JSON: &str = "application/ld+json";

/// Outcome of handing a request to the engine.
#[derive(Debug)]
pub enum Served {
    /// The engine produced the response
    Handled(ApResponse),
    /// Not an ActivityPub request; the host serves its own content
    NotActivityPub,
}

/// The protocol engine an application embeds.
///
/// Immutable configuration is supplied once here; every request gets a
/// fresh `Context` over it.
#[derive(Clone)]
pub struct ApActor {
    config: Arc<EngineConfig>,
    app_agent: String,
}

impl ApActor {
    /// Build the engine from its configuration.
    ///
    /// `app_agent` names the embedding application in outbound
    /// User-Agent headers.
    pub fn new(config: EngineConfig, app_agent: impl Into<String>) -> Self {
        Self {
            config: Arc::new(config),
            app_agent: app_agent.into(),
        }
    }

    /// A fresh per-request context.
    pub fn context(&self) -> Context {
        Context::new(self.config.clone(), self.app_agent.clone())
    }

    /// POST to an inbox: the Federated Protocol receive path.
    pub async fn handle_post_inbox(&self, inbox: &Url, req: &ApRequest) -> Result<Served> {
        // Gate: is this an ActivityPub POST at all?
        if !is_activitypub_post(req) {
            return Ok(Served::NotActivityPub);
        }
        // Gate: federated protocol enabled
        if self.config.federated.is_none() {
            return Ok(Served::Handled(empty_response(
                StatusCode::METHOD_NOT_ALLOWED,
            )));
        }

        let ctx = self.context();
        let delegate = ctx.federated()?.clone();

        // Gate: authenticated
        let AuthResult {
            ctx,
            authenticated,
            response,
        } = delegate.authenticate_post_inbox(ctx, req).await?;
        if !authenticated {
            return denied(response, Error::NotAuthenticated);
        }

        // Gate: body parses and resolves to a typed activity
        let activity = match parse_activity(req.body()) {
            Ok(activity) => activity,
            Err(err) => return respond_client_error(err),
        };
        if let Err(err) = require_valid_activity(&activity) {
            return respond_client_error(err);
        }

        // Gate: request body hook
        let ctx = delegate.post_inbox_request_body_hook(ctx, req, &activity).await?;

        // Gate: authorized (block list, then the delegate's own policy)
        let actors = activity.iris("actor");
        if delegate.blocked(&ctx, &actors).await? {
            return respond_client_error(Error::NotAuthorized);
        }
        let AuthResult {
            ctx,
            authenticated,
            response,
        } = delegate.authorize_post_inbox(ctx, &activity).await?;
        if !authenticated {
            return denied(response, Error::NotAuthorized);
        }

        // Side effects, then the forwarding obligation
        let mut ctx = ctx;
        if let Err(err) = engine::post_inbox(&mut ctx, inbox, &activity).await {
            return respond_client_error(err);
        }
        engine::inbox_forwarding(&mut ctx, inbox, &activity).await?;

        Ok(Served::Handled(empty_response(StatusCode::OK)))
    }

    /// POST to an outbox: the Social API send path.
    pub async fn handle_post_outbox(&self, outbox: &Url, req: &ApRequest) -> Result<Served> {
        if !is_activitypub_post(req) {
            return Ok(Served::NotActivityPub);
        }
        if self.config.social.is_none() {
            return Ok(Served::Handled(empty_response(
                StatusCode::METHOD_NOT_ALLOWED,
            )));
        }

        let ctx = self.context();
        let delegate = ctx.social()?.clone();

        // Gate: authenticated
        let AuthResult {
            ctx,
            authenticated,
            response,
        } = delegate.authenticate_post_outbox(ctx, req).await?;
        if !authenticated {
            return denied(response, Error::NotAuthenticated);
        }

        // Gate: body parses; bare objects get wrapped in a Create
        let raw = match parse_json_map(req.body()) {
            Ok(map) => map,
            Err(err) => return respond_client_error(err),
        };
        let value = match AsValue::resolve(raw.clone()) {
            Ok(value) => value,
            Err(err) => return respond_client_error(err),
        };
        let mut activity = if value.is_activity() {
            value
        } else {
            engine::wrap_in_create(&ctx, &value, outbox).await?
        };
        engine::add_new_ids(&ctx, &mut activity).await?;

        // Gate: request body hook
        let ctx = delegate.post_outbox_request_body_hook(ctx, req, &activity).await?;

        // Side effects, persistence, then federation when allowed
        let mut ctx = ctx;
        let (activity, deliverable) =
            match engine::post_outbox(&mut ctx, activity, outbox, raw).await {
                Ok(out) => out,
                Err(err) => return respond_client_error(err),
            };
        if deliverable && self.config.federated.is_some() {
            engine::deliver(&ctx, outbox, &activity).await?;
        }

        let id = activity.require_id()?;
        let response = http::Response::builder()
            .status(StatusCode::CREATED)
            .header(header::LOCATION, id.to_string())
            .body(Vec::new())
            .map_err(|e| Error::Internal(e.into()))?;
        Ok(Served::Handled(response))
    }

    /// GET an inbox as an OrderedCollection.
    pub async fn handle_get_inbox(&self, req: &ApRequest) -> Result<Served> {
        if !is_activitypub_get(req) {
            return Ok(Served::NotActivityPub);
        }
        let ctx = self.context();

        let AuthResult {
            ctx,
            authenticated,
            response,
        } = self.config.common.authenticate_get_inbox(ctx, req).await?;
        if !authenticated {
            return denied(response, Error::NotAuthenticated);
        }

        let mut collection = self.config.common.get_inbox(&ctx, req).await?;
        dedupe_ordered_items(&mut collection);
        Ok(Served::Handled(collection_response(collection.to_bytes()?)?))
    }

    /// GET an outbox as an OrderedCollection.
    pub async fn handle_get_outbox(&self, req: &ApRequest) -> Result<Served> {
        if !is_activitypub_get(req) {
            return Ok(Served::NotActivityPub);
        }
        let ctx = self.context();

        let AuthResult {
            ctx,
            authenticated,
            response,
        } = self.config.common.authenticate_get_outbox(ctx, req).await?;
        if !authenticated {
            return denied(response, Error::NotAuthenticated);
        }

        let mut collection = self.config.common.get_outbox(&ctx, req).await?;
        dedupe_ordered_items(&mut collection);
        Ok(Served::Handled(collection_response(collection.to_bytes()?)?))
    }
}

/// Whether a media type names an ActivityPub document.
///
/// `application/activity+json`, or `application/ld+json` carrying the
/// ActivityStreams profile parameter.
fn is_activitypub_media_type(value: &str) -> bool {
    let essence = value.split(';').next().unwrap_or("").trim();
    match essence {
        ACTIVITY_JSON => true,
        LD_JSON => value.contains("https://www.w3.org/ns/activitystreams"),
        _ => false,
    }
}

fn is_activitypub_post(req: &ApRequest) -> bool {
    req.method() == Method::POST
        && req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(is_activitypub_media_type)
}

fn is_activitypub_get(req: &ApRequest) -> bool {
    req.method() == Method::GET
        && req
            .headers()
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.split(',').any(is_activitypub_media_type))
}

fn parse_json_map(body: &[u8]) -> Result<JsonMap> {
    match serde_json::from_slice::<Value>(body)? {
        Value::Object(map) => Ok(map),
        _ => Err(Error::Validation("body is not a JSON object".to_string())),
    }
}

fn parse_activity(body: &[u8]) -> Result<AsValue> {
    AsValue::resolve(parse_json_map(body)?)
}

fn require_valid_activity(activity: &AsValue) -> Result<()> {
    activity.require_id()?;
    if !activity.is_activity() {
        return Err(Error::Validation(format!(
            "{} is not an Activity type",
            activity.primary_type().unwrap_or("value")
        )));
    }
    Ok(())
}

fn empty_response(status: StatusCode) -> ApResponse {
    let mut response = http::Response::new(Vec::new());
    *response.status_mut() = status;
    response
}

/// A failed authenticate/authorize gate: prefer the delegate-written
/// response; without one, answer with the error kind's own status.
fn denied(response: Option<ApResponse>, err: Error) -> Result<Served> {
    match response {
        Some(response) => {
            tracing::debug!(error = %err, "delegate denied the request");
            Ok(Served::Handled(response))
        }
        None => respond_client_error(err),
    }
}

/// Map client-mappable error kinds to their terminal responses;
/// everything else propagates for the host to render.
fn respond_client_error(err: Error) -> Result<Served> {
    let status = err.status();
    if status.is_client_error() {
        tracing::debug!(error = %err, status = %status, "request rejected");
        Ok(Served::Handled(empty_response(status)))
    } else {
        Err(err)
    }
}

/// A successful collection GET: body plus the protocol's response
/// headers (Content-Type, Date, Digest).
fn collection_response(body: Vec<u8>) -> Result<ApResponse> {
    http::Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, ACTIVITY_JSON)
        .header(header::DATE, httpsig::http_date(Utc::now()))
        .header("Digest", httpsig::body_digest(&body))
        .body(body)
        .map_err(|e| Error::Internal(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_matching_requires_the_as_profile_for_ld_json() {
        assert!(is_activitypub_media_type("application/activity+json"));
        assert!(is_activitypub_media_type(
            "application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\""
        ));
        assert!(!is_activitypub_media_type("application/ld+json"));
        assert!(!is_activitypub_media_type("application/json"));
        assert!(!is_activitypub_media_type("text/html"));
    }

    #[test]
    fn accept_header_lists_are_scanned() {
        let req = http::Request::builder()
            .method(Method::GET)
            .uri("https://srv.example/u/alice/inbox")
            .header(header::ACCEPT, "text/html, application/activity+json")
            .body(Vec::new())
            .unwrap();
        assert!(is_activitypub_get(&req));
    }

    #[test]
    fn non_activity_bodies_fail_validity() {
        let note = AsValue::resolve(
            serde_json::json!({"type": "Note", "id": "https://srv.example/n/1"})
                .as_object()
                .unwrap()
                .clone(),
        )
        .unwrap();
        assert!(require_valid_activity(&note).is_err());
    }
}
