//! HMAC-SHA256 verification of raw webhook bodies.
//!
//! The provider signs the exact request bytes with the shared secret and sends
//! the lowercase hex digest in the signature header.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "x-signature";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("webhook secret is not configured")]
    MissingSecret,
    #[error("signature header is missing")]
    MissingHeader,
    #[error("signature header is not a hex digest")]
    MalformedHeader,
    #[error("signature does not match body")]
    Mismatch,
}

impl SignatureError {
    pub const fn reason(self) -> &'static str {
        match self {
            Self::MissingSecret => "missing_secret",
            Self::MissingHeader => "missing_header",
            Self::MalformedHeader => "malformed_header",
            Self::Mismatch => "mismatch",
        }
    }
}

/// Hex digest the provider is expected to send for `body`.
pub fn sign_body(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify_signature(secret: &str, body: &[u8], provided: &str) -> Result<(), SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::MissingSecret);
    }

    let provided = hex::decode(provided.trim()).map_err(|_| SignatureError::MalformedHeader)?;

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(value) => value,
        Err(_) => return Err(SignatureError::Mismatch),
    };
    mac.update(body);
    // verify_slice compares in constant time and rejects length mismatches.
    mac.verify_slice(&provided).map_err(|_| SignatureError::Mismatch)
}

/// Secret and header of a request that passed the body-independent checks.
#[derive(Debug, Clone, Copy)]
pub struct SignatureCheck<'a> {
    secret: &'a str,
    provided: &'a str,
}

impl SignatureCheck<'_> {
    pub fn verify(&self, body: &[u8]) -> Result<(), SignatureError> {
        verify_signature(self.secret, body, self.provided)
    }
}

/// Checks the secret and signature header before any body byte is read.
pub fn signature_preconditions<'a>(
    secret: Option<&'a str>,
    headers: &'a HeaderMap,
) -> Result<SignatureCheck<'a>, SignatureError> {
    let secret = secret
        .filter(|value| !value.trim().is_empty())
        .ok_or(SignatureError::MissingSecret)?;

    let header = headers
        .get(SIGNATURE_HEADER)
        .ok_or(SignatureError::MissingHeader)?;
    let provided = header
        .to_str()
        .map_err(|_| SignatureError::MalformedHeader)?;

    Ok(SignatureCheck { secret, provided })
}

/// Runs every authentication precondition against an inbound request.
pub fn verify_request(
    secret: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), SignatureError> {
    signature_preconditions(secret, headers)?.verify(body)
}
