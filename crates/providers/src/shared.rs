//! Helpers shared by the vendor adapters.

use tracing::warn;

/// Parse accumulated tool-call argument text into a JSON object.
///
/// Empty text means no arguments. Text that fails to parse, or parses to
/// something other than an object, becomes an empty object so the call still
/// reaches the executor (which reports the bad input back to the model).
pub(crate) fn parse_tool_input(provider: &str, tool_name: &str, raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        Ok(other) => {
            warn!(provider, tool = %tool_name, input = %other, "Tool arguments are not an object");
            serde_json::json!({})
        }
        Err(e) => {
            warn!(provider, tool = %tool_name, error = %e, "Unparseable tool arguments");
            serde_json::json!({})
        }
    }
}

/// Trim a trailing slash so paths can be appended with `format!`.
pub(crate) fn normalize_base_url(base_url: impl Into<String>) -> String {
    base_url.into().trim_end_matches('/').to_string()
}
