//! fedcore - an embeddable ActivityPub protocol engine
//!
//! The engine implements both halves of ActivityPub for a host server:
//! the Social API (client POSTs to an outbox) and the Federated Protocol
//! (peers POST to an inbox). It validates and persists activities,
//! applies the per-type side effects the protocol prescribes, performs
//! inbox forwarding, and delivers activities to remote peers with HTTP
//! Signatures.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Host framework (axum via web::routes,        │
//! │                or any server speaking http types)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │        Orchestrators (actor::ApActor, §state machines)      │
//! │  - handle_post_inbox / handle_get_inbox                     │
//! │  - handle_post_outbox / handle_get_outbox                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Side-effect engine (engine)               │
//! │  - post_inbox, post_outbox, inbox_forwarding, deliver       │
//! │  - per-type side effects (social / federated)               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │        Capabilities supplied by the host application        │
//! │  - Database (persistence)    - Transport (signed HTTP)      │
//! │  - Common/Social/Federated delegates + activity handlers    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `actor`: request-level orchestrators
//! - `engine`: the side-effect engine
//! - `delegate`: delegate traits and the activity dispatcher
//! - `addressing`: recipient and addressing utilities
//! - `vocab`: the ontology facade over ActivityStreams JSON
//! - `db`: the persistence capability trait
//! - `transport`: the signed HTTP capability trait and default client
//! - `context`: the per-request context
//! - `web`: axum router glue
//! - `error`: error types

pub mod actor;
pub mod addressing;
pub mod context;
pub mod db;
pub mod delegate;
pub mod engine;
pub mod error;
pub mod transport;
pub mod vocab;
pub mod web;

#[cfg(test)]
mod testutil;

pub use actor::{ApActor, Served};
pub use context::{Context, EngineConfig, FederatedData, OnFollow, RequestData, SocialData};
pub use db::{CollectionOpts, CollectionUpdate, Database, InboxPair};
pub use delegate::{
    ActivityHandlers, ApRequest, ApResponse, AuthResult, CommonDelegate, FederatedDelegate, Hook,
    SocialDelegate,
};
pub use error::{DeliveryFailure, Error, Result};
pub use transport::{SignedTransport, Transport};
pub use vocab::{AsValue, JsonMap, PUBLIC_IRI};
