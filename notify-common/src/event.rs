use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payloads are JSON envelopes tagged with a `type` field. Only tags in the
/// configured trusted set are deserialized further; anything else is routed
/// to the dead-letter topic without an attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventPayload {
    ProductCreated(ProductCreated),
}

impl EventPayload {
    /// The tag this payload serializes under.
    pub fn type_tag(&self) -> &'static str {
        match self {
            EventPayload::ProductCreated(_) => "product-created",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductCreated {
    pub product_id: Uuid,
    pub title: String,
    pub price: i64,
    pub quantity: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("received empty payload")]
    Empty,
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload has no type tag")]
    MissingType,
    #[error("payload type {0:?} is not trusted")]
    UntrustedType(String),
}

#[derive(Deserialize)]
struct TypeTag {
    #[serde(rename = "type")]
    tag: Option<String>,
}

/// Decode an envelope, checking its tag against the trusted set before
/// committing to a full deserialization. Retrying cannot fix any failure
/// here, so callers treat every `DecodeError` as terminal.
pub fn decode_envelope(
    payload: &[u8],
    trusted_types: &HashSet<String>,
) -> Result<EventPayload, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::Empty);
    }

    let probe: TypeTag = serde_json::from_slice(payload)?;
    let tag = probe.tag.ok_or(DecodeError::MissingType)?;

    if !trusted_types.contains(&tag) {
        return Err(DecodeError::UntrustedType(tag));
    }

    Ok(serde_json::from_slice(payload)?)
}
