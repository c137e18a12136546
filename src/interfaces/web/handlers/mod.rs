pub mod admin;
pub mod discord;
pub mod executions;
pub mod tasks;

use axum::Json;

pub(crate) fn ok(value: serde_json::Value) -> Json<serde_json::Value> {
    let mut body = serde_json::json!({"success": true});
    if let (Some(body), Some(extra)) = (body.as_object_mut(), value.as_object()) {
        for (k, v) in extra {
            body.insert(k.clone(), v.clone());
        }
    }
    Json(body)
}

pub(crate) fn fail(message: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(serde_json::json!({"success": false, "error": message.to_string()}))
}
