use crate::error::ApiError;
use crate::models::{CreateWebhook, Webhook};
use crate::webhooks::{self, WebhookStore};
use rocket::serde::json::Json;
use rocket::{delete, get, post, State};
use std::sync::Arc;

#[get("/api/webhooks")]
pub fn list_webhooks(store: &State<Arc<WebhookStore>>) -> Json<Vec<Webhook>> {
    Json(store.list())
}

#[post("/api/webhooks", format = "json", data = "<body>")]
pub fn create_webhook(
    store: &State<Arc<WebhookStore>>,
    body: Json<CreateWebhook>,
) -> Result<Json<Webhook>, ApiError> {
    store.create(body.into_inner()).map(Json)
}

#[get("/api/webhooks/<id>")]
pub fn get_webhook(store: &State<Arc<WebhookStore>>, id: &str) -> Result<Json<Webhook>, ApiError> {
    store
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Webhook {id} not found")))
}

#[delete("/api/webhooks/<id>")]
pub fn delete_webhook(
    store: &State<Arc<WebhookStore>>,
    id: &str,
) -> Result<Json<serde_json::Value>, ApiError> {
    store.delete(id)?;
    Ok(Json(serde_json::json!({ "deleted": true, "id": id })))
}

/// Fire a synchronous `test` event and report what the endpoint said.
#[post("/api/webhooks/<id>/test")]
pub async fn test_webhook(
    store: &State<Arc<WebhookStore>>,
    client: &State<crate::HttpClient>,
    id: &str,
) -> Result<Json<serde_json::Value>, ApiError> {
    let webhook = store
        .get(id)
        .ok_or_else(|| ApiError::not_found(format!("Webhook {id} not found")))?;
    let data = serde_json::json!({ "test": true });
    let outcome = webhooks::deliver_one(&client.0, &webhook, "test", &data).await;
    match outcome {
        Ok(status) => {
            store.record_delivery(id, status < 400, &status.to_string());
            Ok(Json(serde_json::json!({ "delivered": status < 400, "upstreamStatus": status })))
        }
        Err(e) => {
            store.record_delivery(id, false, "error");
            Ok(Json(serde_json::json!({ "delivered": false, "error": e })))
        }
    }
}
