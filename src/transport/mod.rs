//! HTTP transport capability
//!
//! A transport is a per-actor signed HTTP client: signed GETs for
//! dereference, signed POSTs for delivery, and a batched fan-out for
//! delivery to many inboxes. The engine treats transport errors as
//! terminal for the delivery in question; retries and timeouts belong to
//! the transport itself.

mod http;
pub mod httpsig;

pub use http::SignedTransport;

use async_trait::async_trait;
use futures::StreamExt;
use url::Url;

use crate::error::{DeliveryFailure, Error, Result};
use crate::vocab::JsonMap;

/// How many POSTs a batch delivery keeps in flight at once.
const MAX_CONCURRENT_DELIVERIES: usize = 10;

/// A per-actor signed HTTP client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Signed GET of an ActivityPub document.
    async fn dereference(&self, iri: &Url) -> Result<JsonMap>;

    /// Signed POST of a serialized activity to one inbox.
    async fn deliver(&self, body: &[u8], to: &Url) -> Result<()>;

    /// `deliver` fanned out across many inboxes.
    ///
    /// Succeeds iff every per-recipient POST succeeded; otherwise fails
    /// with the aggregated list of per-inbox failures. The provided
    /// implementation runs deliveries concurrently with a bounded
    /// in-flight count.
    async fn batch_deliver(&self, body: &[u8], recipients: &[Url]) -> Result<()> {
        let failures: Vec<DeliveryFailure> = futures::stream::iter(recipients.iter().cloned())
            .map(|inbox| async move {
                match self.deliver(body, &inbox).await {
                    Ok(()) => None,
                    Err(err) => Some(DeliveryFailure {
                        inbox,
                        reason: err.to_string(),
                    }),
                }
            })
            .buffer_unordered(MAX_CONCURRENT_DELIVERIES)
            .filter_map(|outcome| async move { outcome })
            .collect()
            .await;

        if failures.is_empty() {
            tracing::debug!(recipients = recipients.len(), "batch delivery complete");
            Ok(())
        } else {
            tracing::warn!(
                failed = failures.len(),
                total = recipients.len(),
                "batch delivery had failures"
            );
            Err(Error::DeliveryFailed(failures))
        }
    }
}
