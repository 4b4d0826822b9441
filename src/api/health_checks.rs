use axum::Json;

pub async fn ok() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}
