use crate::common::test_client;
use rocket::http::{ContentType, Status};

#[test]
fn test_webhook_crud() {
    let client = test_client();

    let res = client
        .post("/api/webhooks")
        .header(ContentType::JSON)
        .body(r#"{"url": "http://127.0.0.1:1/hook", "events": ["message.delivered"], "secret": "s3cret"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let webhook: serde_json::Value = res.into_json().unwrap();
    assert_eq!(webhook["status"], "active");
    assert_eq!(webhook["failureCount"], 0);
    let id = webhook["id"].as_str().unwrap().to_string();

    let res = client.get("/api/webhooks").dispatch();
    let all: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(all.len(), 1);

    let res = client.get(format!("/api/webhooks/{id}")).dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.delete(format!("/api/webhooks/{id}")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let res = client.get(format!("/api/webhooks/{id}")).dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_webhook_rejects_bad_url() {
    let client = test_client();
    let res = client
        .post("/api/webhooks")
        .header(ContentType::JSON)
        .body(r#"{"url": "not-a-url"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_webhook_test_endpoint_records_failure() {
    let client = test_client();
    let res = client
        .post("/api/webhooks")
        .header(ContentType::JSON)
        .body(r#"{"url": "http://127.0.0.1:1/hook"}"#)
        .dispatch();
    let webhook: serde_json::Value = res.into_json().unwrap();
    let id = webhook["id"].as_str().unwrap().to_string();

    // Nothing listens on that port; the delivery must fail and be recorded
    let res = client.post(format!("/api/webhooks/{id}/test")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["delivered"], false);

    let res = client.get(format!("/api/webhooks/{id}")).dispatch();
    let after: serde_json::Value = res.into_json().unwrap();
    assert_eq!(after["failureCount"], 1);
    assert_eq!(after["lastDeliveryStatus"], "error");
    assert!(after["lastDeliveryAt"].is_string());
}
