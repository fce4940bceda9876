use std::collections::HashMap;

use anyhow::{Context, Result};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;

use super::types::{GmailMessage, GmailPayload};
use crate::parsing::MessageBodies;

/// Gmail emits unpadded URL-safe base64, but padded input decodes as well.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Top-level headers keyed by lower-cased name.
pub fn extract_headers(message: &GmailMessage) -> HashMap<String, String> {
    message
        .payload
        .as_ref()
        .and_then(|payload| payload.headers.as_deref())
        .unwrap_or_default()
        .iter()
        .map(|header| (header.name.to_ascii_lowercase(), header.value.clone()))
        .collect()
}

/// Depth-first walk of the part tree. The first `text/html` and the first
/// `text/plain` part carrying body data win; later parts of the same type are
/// ignored.
pub fn find_bodies(message: &GmailMessage) -> MessageBodies {
    let mut bodies = MessageBodies::default();
    if let Some(payload) = &message.payload {
        collect_bodies(payload, &mut bodies);
    }
    bodies
}

fn collect_bodies(payload: &GmailPayload, bodies: &mut MessageBodies) {
    if bodies.html.is_some() && bodies.text.is_some() {
        return;
    }

    let mime_type = payload
        .mime_type
        .as_deref()
        .unwrap_or("")
        .to_ascii_lowercase();
    let slot = match mime_type.as_str() {
        "text/html" => Some(&mut bodies.html),
        "text/plain" => Some(&mut bodies.text),
        _ => None,
    };

    if let Some(slot) = slot {
        if slot.is_none() {
            let data = payload
                .body
                .as_ref()
                .and_then(|body| body.data.as_deref())
                .filter(|data| !data.is_empty());
            if let Some(data) = data {
                // An undecodable part is treated like a missing one.
                if let Ok(decoded) = decode_body_data(data) {
                    *slot = Some(decoded);
                }
            }
        }
    }

    for part in payload.parts.as_deref().unwrap_or_default() {
        collect_bodies(part, bodies);
    }
}

pub fn decode_body_data(data: &str) -> Result<String> {
    let bytes = URL_SAFE_LENIENT
        .decode(data.trim())
        .context("base64url decode gmail body data")?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
