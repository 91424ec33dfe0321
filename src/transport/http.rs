//! Default signed transport over reqwest
//!
//! One `SignedTransport` speaks for one actor: every request carries an
//! HTTP Signature made with that actor's key. Timeouts and retry policy
//! belong to the `reqwest::Client` the host hands in.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use url::Url;

use super::Transport;
use super::httpsig;
use crate::error::{DeliveryFailure, Error, Result};
use crate::vocab::JsonMap;

/// Media type for delivered activities.
pub const ACTIVITY_JSON: &str = "application/activity+json";

/// A reqwest-backed transport signing as a single actor.
#[derive(Clone)]
pub struct SignedTransport {
    client: reqwest::Client,
    /// IRI of the actor's public key
    key_id: String,
    /// PKCS#8 PEM private key matching `key_id`
    private_key_pem: String,
    /// User-Agent for outbound requests
    user_agent: String,
}

impl SignedTransport {
    /// Build a transport for one actor.
    pub fn new(
        client: reqwest::Client,
        key_id: impl Into<String>,
        private_key_pem: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            client,
            key_id: key_id.into(),
            private_key_pem: private_key_pem.into(),
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl Transport for SignedTransport {
    async fn dereference(&self, iri: &Url) -> Result<JsonMap> {
        let signed =
            httpsig::sign_request("GET", iri, None, &self.private_key_pem, &self.key_id)?;

        let response = self
            .client
            .get(iri.clone())
            .header("Accept", ACTIVITY_JSON)
            .header("User-Agent", &self.user_agent)
            .header("Date", signed.date)
            .header("Signature", signed.signature)
            .send()
            .await
            .map_err(|e| Error::Transport(e.into()))?;

        if !response.status().is_success() {
            return Err(Error::Transport(anyhow::anyhow!(
                "GET {} returned HTTP {}",
                iri,
                response.status()
            )));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Transport(e.into()))?;
        match value {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(Error::Transport(anyhow::anyhow!(
                "GET {} returned a non-object document",
                iri
            ))),
        }
    }

    async fn deliver(&self, body: &[u8], to: &Url) -> Result<()> {
        let signed =
            httpsig::sign_request("POST", to, Some(body), &self.private_key_pem, &self.key_id)?;

        let mut request = self
            .client
            .post(to.clone())
            .header("Content-Type", ACTIVITY_JSON)
            .header("User-Agent", &self.user_agent)
            .header("Date", signed.date)
            .header("Signature", signed.signature);
        if let Some(digest) = signed.digest {
            request = request.header("Digest", digest);
        }

        let response = request
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| Error::Transport(anyhow::anyhow!("POST {} failed: {}", to, e)))?;

        if !response.status().is_success() {
            return Err(Error::Transport(anyhow::anyhow!(
                "inbox {} rejected activity: HTTP {}",
                to,
                response.status()
            )));
        }

        tracing::debug!(inbox = %to, "delivered activity");
        Ok(())
    }

    async fn batch_deliver(&self, body: &[u8], recipients: &[Url]) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(super::MAX_CONCURRENT_DELIVERIES));
        let body: Arc<[u8]> = Arc::from(body);

        let mut tasks = Vec::with_capacity(recipients.len());
        for inbox in recipients.iter().cloned() {
            let semaphore = semaphore.clone();
            let body = body.clone();
            let transport = self.clone();
            tasks.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return Some(DeliveryFailure {
                        inbox,
                        reason: "delivery pool closed".to_string(),
                    });
                };
                match transport.deliver(&body, &inbox).await {
                    Ok(()) => None,
                    Err(err) => Some(DeliveryFailure {
                        inbox,
                        reason: err.to_string(),
                    }),
                }
            }));
        }

        let mut failures = Vec::new();
        for task in tasks {
            match task.await {
                Ok(Some(failure)) => failures.push(failure),
                Ok(None) => {}
                Err(join_err) => {
                    return Err(Error::Internal(anyhow::anyhow!(
                        "delivery task panicked: {}",
                        join_err
                    )));
                }
            }
        }

        let succeeded = recipients.len() - failures.len();
        tracing::info!(
            succeeded,
            failed = failures.len(),
            "batch delivery complete"
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::DeliveryFailed(failures))
        }
    }
}
