//! Axum router glue
//!
//! Hosts that route through axum mount the engine with `routes`; hosts
//! on other frameworks call the `ApActor` handlers directly with `http`
//! types. When the router owns a path, non-ActivityPub requests answer
//! 406/415 instead of the pass-through the direct API offers.

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::response::Response;
use axum::routing::{get, post};
use http::{Method, StatusCode};
use url::Url;

use crate::actor::{ApActor, Served};

/// Largest request body the glue will buffer.
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
struct WebState {
    actor: ApActor,
    /// Base URL of this server, used to reconstruct box IRIs
    base: Url,
}

#[derive(Clone, Copy)]
enum Endpoint {
    Inbox,
    Outbox,
}

/// Mount an engine's inbox and outbox at the given paths.
pub fn routes(actor: ApActor, base: Url, inbox_path: &str, outbox_path: &str) -> Router {
    let state = WebState { actor, base };
    Router::new()
        .route(
            inbox_path,
            post(serve_post_inbox).get(serve_get_inbox),
        )
        .route(
            outbox_path,
            post(serve_post_outbox).get(serve_get_outbox),
        )
        .with_state(state)
}

async fn serve_post_inbox(State(state): State<WebState>, req: axum::extract::Request) -> Response {
    serve(state, req, Endpoint::Inbox).await
}

async fn serve_get_inbox(State(state): State<WebState>, req: axum::extract::Request) -> Response {
    serve(state, req, Endpoint::Inbox).await
}

async fn serve_post_outbox(State(state): State<WebState>, req: axum::extract::Request) -> Response {
    serve(state, req, Endpoint::Outbox).await
}

async fn serve_get_outbox(State(state): State<WebState>, req: axum::extract::Request) -> Response {
    serve(state, req, Endpoint::Outbox).await
}

async fn serve(state: WebState, req: axum::extract::Request, endpoint: Endpoint) -> Response {
    let (parts, body) = req.into_parts();

    let Ok(bytes) = axum::body::to_bytes(body, MAX_BODY_BYTES).await else {
        return status_response(StatusCode::PAYLOAD_TOO_LARGE);
    };
    let Ok(box_iri) = state.base.join(parts.uri.path()) else {
        return status_response(StatusCode::BAD_REQUEST);
    };

    let mut request = http::Request::new(bytes.to_vec());
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = parts.uri.clone();
    *request.headers_mut() = parts.headers.clone();

    let served = match (endpoint, &parts.method) {
        (Endpoint::Inbox, &Method::POST) => {
            state.actor.handle_post_inbox(&box_iri, &request).await
        }
        (Endpoint::Inbox, _) => state.actor.handle_get_inbox(&request).await,
        (Endpoint::Outbox, &Method::POST) => {
            state.actor.handle_post_outbox(&box_iri, &request).await
        }
        (Endpoint::Outbox, _) => state.actor.handle_get_outbox(&request).await,
    };

    match served {
        Ok(Served::Handled(response)) => response.map(Body::from),
        Ok(Served::NotActivityPub) => {
            let status = if parts.method == Method::GET {
                StatusCode::NOT_ACCEPTABLE
            } else {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            };
            status_response(status)
        }
        Err(err) => {
            tracing::error!(error = %err, path = %parts.uri.path(), "request failed");
            status_response(err.status())
        }
    }
}

fn status_response(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}
