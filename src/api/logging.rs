use crate::util::parse_bool_str;
use serde::Serialize;

const DEBUG_PAYLOAD_ENV: &str = "CHATWRIGHT_DEBUG_PAYLOAD";

pub fn debug_payload_enabled() -> bool {
    std::env::var(DEBUG_PAYLOAD_ENV)
        .ok()
        .and_then(|v| parse_bool_str(&v))
        .unwrap_or(false)
}

pub fn emit_debug_payload<T: Serialize>(request_url: &str, payload: &T) {
    let formatted_payload = serde_json::to_string_pretty(payload)
        .unwrap_or_else(|_| "<payload serialization error>".to_string());
    tracing::debug!(
        target: "chatwright::api",
        url = request_url,
        "completion request payload:\n{formatted_payload}"
    );
}

pub fn emit_sse_parse_error(json_data: &str, parse_error: &serde_json::Error) {
    tracing::warn!(
        target: "chatwright::api",
        error = %parse_error,
        data = json_data,
        "unparseable stream event"
    );
}
