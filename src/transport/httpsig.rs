//! HTTP Signatures (draft-cavage) for federated requests
//!
//! Signing covers `(request-target) host date` plus `digest` when a body
//! is present, with rsa-sha256 over unprefixed PKCS#1 v1.5. Verification
//! is exported for host `authenticate_post_inbox` delegates; the engine
//! itself only signs.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey, pkcs1v15};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Maximum allowed skew of a signed Date header, in seconds.
const MAX_DATE_SKEW_SECS: i64 = 300;

/// Headers produced for one signed request.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    /// Signature header value
    pub signature: String,
    /// Date header value (RFC 7231 IMF-fixdate)
    pub date: String,
    /// Digest header value, when a body was signed
    pub digest: Option<String>,
}

/// `SHA-256=<base64>` digest of a request body.
pub fn body_digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    format!("SHA-256={}", BASE64.encode(hasher.finalize()))
}

/// Format a timestamp the way HTTP Date headers want it.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn request_target(method: &str, url: &url::Url) -> String {
    let path = match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    };
    format!("{} {}", method.to_ascii_lowercase(), path)
}

/// Sign an outbound request with the actor's RSA key.
///
/// # Arguments
/// * `method` - HTTP method
/// * `url` - Full target URL
/// * `body` - Body to digest, for POSTs
/// * `private_key_pem` - PKCS#8 PEM private key
/// * `key_id` - IRI of the matching public key (`actor#main-key`)
pub fn sign_request(
    method: &str,
    url: &url::Url,
    body: Option<&[u8]>,
    private_key_pem: &str,
    key_id: &str,
) -> Result<SignedHeaders> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::Validation(format!("URL has no host: {}", url)))?;

    let date = http_date(Utc::now());
    let digest = body.map(body_digest);

    let mut signed_names = vec!["(request-target)", "host", "date"];
    let mut lines = vec![
        format!("(request-target): {}", request_target(method, url)),
        format!("host: {}", host),
        format!("date: {}", date),
    ];
    if let Some(ref digest) = digest {
        signed_names.push("digest");
        lines.push(format!("digest: {}", digest));
    }
    let signing_string = lines.join("\n");

    let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| Error::Validation(format!("invalid private key: {}", e)))?;
    let signing_key = pkcs1v15::SigningKey::<Sha256>::new_unprefixed(private_key);
    let signature = signing_key.sign_with_rng(&mut rand::thread_rng(), signing_string.as_bytes());

    let signature = format!(
        "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
        key_id,
        signed_names.join(" "),
        BASE64.encode(signature.to_bytes())
    );

    Ok(SignedHeaders {
        signature,
        date,
        digest,
    })
}

/// A parsed Signature header.
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    /// IRI of the signer's public key
    pub key_id: String,
    /// Declared algorithm
    pub algorithm: String,
    /// Header names covered by the signature, in order
    pub headers: Vec<String>,
    /// Base64 signature bytes
    pub signature: String,
}

/// Parse a `keyId="…",algorithm="…",headers="…",signature="…"` header.
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;

    for part in header.split(',') {
        let Some((name, value)) = part.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match name.trim() {
            "keyId" => key_id = Some(value.to_string()),
            "algorithm" => algorithm = Some(value.to_string()),
            "headers" => {
                headers = Some(value.split_whitespace().map(str::to_string).collect());
            }
            "signature" => signature = Some(value.to_string()),
            _ => {}
        }
    }

    Ok(ParsedSignature {
        key_id: key_id.ok_or_else(|| Error::Validation("signature missing keyId".into()))?,
        algorithm: algorithm
            .ok_or_else(|| Error::Validation("signature missing algorithm".into()))?,
        headers: headers.ok_or_else(|| Error::Validation("signature missing headers".into()))?,
        signature: signature
            .ok_or_else(|| Error::Validation("signature missing signature".into()))?,
    })
}

fn header_str<'a>(headers: &'a http::HeaderMap, name: &str) -> Result<&'a str> {
    headers
        .get(name)
        .ok_or_else(|| Error::Validation(format!("missing {} header", name)))?
        .to_str()
        .map_err(|_| Error::Validation(format!("invalid {} header", name)))
}

/// Verify an inbound signed request.
///
/// Checks Date skew, the body Digest when present, and the RSA
/// signature over the declared header list.
///
/// # Errors
/// `Error::NotAuthenticated` when the signature does not verify;
/// `Error::Validation` for structural problems.
pub fn verify_request(
    method: &str,
    path: &str,
    headers: &http::HeaderMap,
    body: Option<&[u8]>,
    public_key_pem: &str,
) -> Result<()> {
    let parsed = parse_signature_header(header_str(headers, "signature")?)?;

    if let Some(date) = headers.get("date") {
        let date = date
            .to_str()
            .ok()
            .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
            .ok_or_else(|| Error::Validation("invalid Date header".into()))?;
        if (Utc::now().timestamp() - date.timestamp()).abs() > MAX_DATE_SKEW_SECS {
            return Err(Error::Validation("Date header outside allowed skew".into()));
        }
    }

    if let (Some(body), Ok(claimed)) = (body, header_str(headers, "digest")) {
        if claimed != body_digest(body) {
            return Err(Error::Validation("Digest mismatch".into()));
        }
    }

    let mut lines = Vec::with_capacity(parsed.headers.len());
    for name in &parsed.headers {
        let line = match name.as_str() {
            "(request-target)" => format!("(request-target): {} {}", method.to_ascii_lowercase(), path),
            other => format!("{}: {}", other, header_str(headers, other)?),
        };
        lines.push(line);
    }
    let signing_string = lines.join("\n");

    let signature_bytes = BASE64
        .decode(&parsed.signature)
        .map_err(|_| Error::Validation("invalid signature encoding".into()))?;
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| Error::Validation(format!("invalid public key: {}", e)))?;
    let verifying_key = pkcs1v15::VerifyingKey::<Sha256>::new_unprefixed(public_key);
    let signature = pkcs1v15::Signature::try_from(signature_bytes.as_slice())
        .map_err(|e| Error::Validation(format!("invalid signature format: {}", e)))?;

    verifying_key
        .verify(signing_string.as_bytes(), &signature)
        .map_err(|_| Error::NotAuthenticated)
}
