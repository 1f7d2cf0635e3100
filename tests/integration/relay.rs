use crate::common::{gen_keypair, register_agent, set_organization, test_client};
use ai_maestro::models::{Payload, PayloadKind, Priority};
use ai_maestro::relay::RelayQueue;
use rocket::http::{ContentType, Header, Status};

fn sample_envelope(id: &str, to: &str) -> ai_maestro::models::Envelope {
    ai_maestro::models::Envelope {
        version: "amp/0.1".to_string(),
        id: id.to_string(),
        from: "alice@default.acme.aimaestro.local".to_string(),
        to: to.to_string(),
        subject: "queued".to_string(),
        priority: Priority::Normal,
        timestamp: chrono::Utc::now().to_rfc3339(),
        expires_at: None,
        signature: String::new(),
        in_reply_to: None,
        thread_id: id.to_string(),
    }
}

fn sample_payload(message: &str) -> Payload {
    Payload {
        kind: PayloadKind::Notification,
        message: message.to_string(),
        context: None,
        attachments: None,
    }
}

#[test]
fn test_queue_and_ack_directly() {
    let dir = format!("/tmp/aim_relay_{}", uuid::Uuid::new_v4().simple());
    let queue = RelayQueue::new(std::path::Path::new(&dir));

    for i in 0..3 {
        queue
            .queue_message(
                "agent-1",
                sample_envelope(&format!("msg_{i}_test"), "bob"),
                sample_payload(&format!("m{i}")),
                None,
            )
            .unwrap();
    }

    // limit=0 returns all, oldest first
    let pending = queue.get_pending_messages("agent-1", 0);
    assert_eq!(pending.len(), 3);
    assert!(pending[0].queued_at <= pending[1].queued_at);

    // Entries stay pending until acknowledged
    assert_eq!(queue.get_pending_messages("agent-1", 0).len(), 3);

    // Ack removes exactly one; a duplicate ack is a no-op
    assert!(queue.acknowledge_message("agent-1", "msg_0_test"));
    assert!(!queue.acknowledge_message("agent-1", "msg_0_test"));
    let pending = queue.get_pending_messages("agent-1", 0);
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|e| e.envelope.id != "msg_0_test"));

    // Batch ack
    let ids: Vec<String> = pending.iter().map(|e| e.envelope.id.clone()).collect();
    assert_eq!(queue.acknowledge_messages("agent-1", &ids), 2);
    assert!(queue.get_pending_messages("agent-1", 0).is_empty());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_pending_limit_is_capped_at_100() {
    let dir = format!("/tmp/aim_relay_{}", uuid::Uuid::new_v4().simple());
    let queue = RelayQueue::new(std::path::Path::new(&dir));
    for i in 0..120 {
        queue
            .queue_message(
                "agent-1",
                sample_envelope(&format!("msg_{i:03}_x"), "bob"),
                sample_payload("m"),
                None,
            )
            .unwrap();
    }

    assert_eq!(queue.get_pending_messages("agent-1", 1000).len(), 100);
    assert_eq!(queue.get_pending_messages("agent-1", 5).len(), 5);
    assert_eq!(queue.get_pending_messages("agent-1", 0).len(), 120);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_pending_pickup_over_http() {
    let client = test_client();
    set_organization(&client, "acme");
    let (_, pem) = gen_keypair();
    let carol = register_agent(&client, "carol", &pem);
    let key = carol["apiKey"].as_str().unwrap();
    let agent_id = carol["agentId"].as_str().unwrap();
    let auth = Header::new("Authorization", format!("Bearer {key}"));

    // Queue entries through a second handle on the same data dir (the
    // store on disk is the single source of truth for pending state).
    let queue = RelayQueue::new(std::path::Path::new(&client.data_dir));
    for i in 0..3 {
        queue
            .queue_message(
                agent_id,
                sample_envelope(&format!("msg_{i}_http"), "carol"),
                sample_payload(&format!("m{i}")),
                None,
            )
            .unwrap();
    }

    let res = client
        .get("/v1/messages/pending")
        .header(auth.clone())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["count"], 3);
    assert_eq!(body["messages"][0]["envelope"]["id"], "msg_0_http");

    // Single ack via DELETE
    let res = client
        .delete("/v1/messages/pending?id=msg_0_http")
        .header(auth.clone())
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["acknowledged"], true);

    // Batch ack via POST
    let res = client
        .post("/v1/messages/pending")
        .header(ContentType::JSON)
        .header(auth.clone())
        .body(r#"{"ids": ["msg_1_http", "msg_2_http", "msg_2_http"]}"#)
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["acknowledged"], 2);

    let res = client.get("/v1/messages/pending").header(auth).dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["count"], 0);
}

#[test]
fn test_batch_ack_rejects_oversized_batches() {
    let client = test_client();
    set_organization(&client, "acme");
    let (_, pem) = gen_keypair();
    let carol = register_agent(&client, "carol", &pem);
    let key = carol["apiKey"].as_str().unwrap();

    let ids: Vec<String> = (0..101).map(|i| format!("msg_{i}")).collect();
    let res = client
        .post("/v1/messages/pending")
        .header(ContentType::JSON)
        .header(Header::new("Authorization", format!("Bearer {key}")))
        .body(serde_json::json!({ "ids": ids }).to_string())
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_expired_entries_are_dropped() {
    let dir = format!("/tmp/aim_relay_{}", uuid::Uuid::new_v4().simple());
    let queue = RelayQueue::new(std::path::Path::new(&dir));
    queue
        .queue_message("agent-1", sample_envelope("msg_live_x", "bob"), sample_payload("m"), None)
        .unwrap();

    // Forge an already-expired entry on disk
    let past = (chrono::Utc::now() - chrono::Duration::days(8)).to_rfc3339();
    let expired = ai_maestro::models::RelayEntry {
        agent_id: "agent-1".to_string(),
        envelope: sample_envelope("msg_dead_x", "bob"),
        payload: sample_payload("m"),
        sender_public_key_hex: None,
        queued_at: past.clone(),
        expires_at: past,
    };
    ai_maestro::store::write_json_atomic(
        std::path::Path::new(&format!("{dir}/relay/agent-1/msg_dead_x.json")),
        &expired,
    )
    .unwrap();

    let pending = queue.get_pending_messages("agent-1", 0);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].envelope.id, "msg_live_x");

    assert_eq!(queue.cleanup_all_expired_messages(), 1);

    let _ = std::fs::remove_dir_all(&dir);
}
