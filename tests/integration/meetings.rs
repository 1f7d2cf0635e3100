use crate::common::test_client;
use rocket::http::{ContentType, Status};

#[test]
fn test_meeting_crud() {
    let client = test_client();

    let res = client
        .post("/api/meetings")
        .header(ContentType::JSON)
        .body(r#"{"name": "standup", "agentIds": ["a1", "a2"]}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let meeting: serde_json::Value = res.into_json().unwrap();
    assert_eq!(meeting["name"], "standup");
    assert_eq!(meeting["status"], "active");
    assert_eq!(meeting["sidebarMode"], "grid");
    let id = meeting["id"].as_str().unwrap().to_string();

    let res = client.get("/api/meetings").dispatch();
    let all: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(all.len(), 1);

    let res = client
        .patch(format!("/api/meetings/{id}"))
        .header(ContentType::JSON)
        .body(r#"{"activeAgentId": "a2", "sidebarMode": "focus"}"#)
        .dispatch();
    let updated: serde_json::Value = res.into_json().unwrap();
    assert_eq!(updated["activeAgentId"], "a2");
    assert_eq!(updated["sidebarMode"], "focus");
    assert!(updated["endedAt"].is_null());

    // Ending stamps endedAt once
    let res = client
        .patch(format!("/api/meetings/{id}"))
        .header(ContentType::JSON)
        .body(r#"{"status": "ended"}"#)
        .dispatch();
    let ended: serde_json::Value = res.into_json().unwrap();
    assert!(ended["endedAt"].is_string());

    let res = client.delete(format!("/api/meetings/{id}")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let res = client.get(format!("/api/meetings/{id}")).dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_meeting_requires_name() {
    let client = test_client();
    let res = client
        .post("/api/meetings")
        .header(ContentType::JSON)
        .body(r#"{"name": "  "}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
    let err: serde_json::Value = res.into_json().unwrap();
    assert_eq!(err["error"], "missing_field");
}
