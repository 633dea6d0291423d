//! Outbound topics and payload encoding.

use crate::error::Result;
use gpiohub_core::{ClickType, InputKind, OutputState};
use serde::Serialize;

/// State topic of an entity: `{prefix}/{kind}/{id}`.
pub fn state_topic(prefix: &str, kind: &str, id: &str) -> String {
    format!("{prefix}/{kind}/{id}")
}

#[derive(Serialize)]
struct GesturePayload<'a> {
    event_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<f64>,
}

#[derive(Serialize)]
struct SwitchPayload<'a> {
    state: &'a gpiohub_core::Switch,
}

/// Payload published for an input classification.
///
/// Gesture inputs publish `{"event_type": "single"}`, with the held time in
/// seconds for long presses. Binary sensors publish the bare state.
///
/// # Errors
///
/// Returns an error if JSON encoding fails.
pub fn input_payload(kind: InputKind, click: ClickType, duration: Option<f64>) -> Result<String> {
    match kind {
        InputKind::BinarySensor => Ok(click.as_str().to_string()),
        InputKind::Event => Ok(serde_json::to_string(&GesturePayload {
            event_type: click.as_str(),
            duration,
        })?),
    }
}

/// Payload published when an output changes: `{"state": "ON"}`.
///
/// # Errors
///
/// Returns an error if JSON encoding fails.
pub fn output_payload(state: &OutputState) -> Result<String> {
    Ok(serde_json::to_string(&SwitchPayload { state: &state.state })?)
}
