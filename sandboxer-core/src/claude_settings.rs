//! Claude Code settings written into a sandbox
//!
//! Restricted sandboxes deny Claude's web tools: with egress filtered they
//! would only fail, and a denied tool fails fast instead.

use crate::error::{Result, SandboxError};
use serde_json::{json, Map, Value};

/// Home directory of the image's development user
pub const SANDBOX_HOME: &str = "/home/developer";

/// Tools denied by `disable-web-tools`
pub const WEB_TOOLS: [&str; 2] = ["WebSearch", "WebFetch"];

pub fn settings_path() -> String {
    format!("{}/.claude/settings.json", SANDBOX_HOME)
}

/// Add the web tools to `permissions.deny`, keeping every other setting
///
/// `existing` is the current settings file, if there is one.
pub fn deny_web_tools(name: &str, existing: Option<&str>) -> Result<String> {
    let invalid = |reason: String| {
        SandboxError::operation_failed(name, "update Claude settings in", reason)
    };

    let mut settings: Map<String, Value> = match existing.map(str::trim) {
        Some(raw) if !raw.is_empty() => serde_json::from_str(raw)
            .map_err(|e| invalid(format!("{} is not valid JSON: {}", settings_path(), e)))?,
        _ => Map::new(),
    };

    let permissions = settings
        .entry("permissions")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| invalid("\"permissions\" is not an object".to_string()))?;
    let deny = permissions
        .entry("deny")
        .or_insert_with(|| json!([]))
        .as_array_mut()
        .ok_or_else(|| invalid("\"permissions.deny\" is not an array".to_string()))?;

    for tool in WEB_TOOLS {
        if !deny.iter().any(|v| v.as_str() == Some(tool)) {
            deny.push(json!(tool));
        }
    }

    serde_json::to_string_pretty(&Value::Object(settings))
        .map_err(|e| invalid(e.to_string()))
}
