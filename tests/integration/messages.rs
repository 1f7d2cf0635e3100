use crate::common::{create_agent, test_client};
use rocket::http::{ContentType, Status};

fn compose(client: &rocket::local::blocking::Client, to: &str, subject: &str, message: &str) -> serde_json::Value {
    let body = serde_json::json!({ "to": to, "subject": subject, "message": message });
    let res = client
        .post("/api/messages")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    res.into_json().unwrap()
}

#[test]
fn test_compose_and_list() {
    let client = test_client();
    create_agent(&client, "bob");
    let msg = compose(&client, "bob", "greetings", "hello bob");
    assert_eq!(msg["from"], "maestro");
    assert_eq!(msg["status"], "unread");

    let res = client.get("/api/messages?agent=bob").dispatch();
    let listing: serde_json::Value = res.into_json().unwrap();
    assert_eq!(listing["box"], "inbox");
    assert_eq!(listing["count"], 1);
    assert_eq!(listing["messages"][0]["preview"], "hello bob");

    // Unknown recipient is refused
    let res = client
        .post("/api/messages")
        .header(ContentType::JSON)
        .body(r#"{"to": "nobody", "subject": "x", "message": "y"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_listing_filters_and_limits() {
    let client = test_client();
    create_agent(&client, "bob");
    for i in 0..30 {
        compose(&client, "bob", &format!("msg {i}"), &format!("body {i}"));
    }

    // Default limit is 25
    let res = client.get("/api/messages?agent=bob").dispatch();
    let listing: serde_json::Value = res.into_json().unwrap();
    assert_eq!(listing["count"], 25);

    // limit=0 returns everything
    let res = client.get("/api/messages?agent=bob&limit=0").dispatch();
    let listing: serde_json::Value = res.into_json().unwrap();
    assert_eq!(listing["count"], 30);

    // Newest first
    let first = listing["messages"][0]["subject"].as_str().unwrap();
    assert_eq!(first, "msg 29");

    // Preview length is honored
    let res = client
        .get("/api/messages?agent=bob&limit=1&previewLength=4")
        .dispatch();
    let listing: serde_json::Value = res.into_json().unwrap();
    assert_eq!(listing["messages"][0]["preview"], "body");

    // Status filter
    let res = client.get("/api/messages?agent=bob&status=read").dispatch();
    let listing: serde_json::Value = res.into_json().unwrap();
    assert_eq!(listing["count"], 0);
}

#[test]
fn test_mark_read_is_idempotent() {
    let client = test_client();
    create_agent(&client, "bob");
    let msg = compose(&client, "bob", "s", "m");
    let id = msg["id"].as_str().unwrap();

    let body = serde_json::json!({ "agent": "bob", "id": id, "action": "read" });
    let res = client
        .patch("/api/messages")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    // Second call is a no-op and still succeeds
    let res = client
        .patch("/api/messages")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.get("/api/messages?agent=bob&status=read").dispatch();
    let listing: serde_json::Value = res.into_json().unwrap();
    assert_eq!(listing["count"], 1);
}

#[test]
fn test_archive_moves_between_boxes() {
    let client = test_client();
    create_agent(&client, "bob");
    let msg = compose(&client, "bob", "s", "m");
    let id = msg["id"].as_str().unwrap();

    let body = serde_json::json!({ "agent": "bob", "id": id, "action": "archive" });
    let res = client
        .patch("/api/messages")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    // Exactly one status holds: gone from inbox, archived in archived
    let res = client.get("/api/messages?agent=bob").dispatch();
    let listing: serde_json::Value = res.into_json().unwrap();
    assert_eq!(listing["count"], 0);

    let res = client.get("/api/messages?agent=bob&box=archived").dispatch();
    let listing: serde_json::Value = res.into_json().unwrap();
    assert_eq!(listing["count"], 1);
    assert_eq!(listing["messages"][0]["status"], "archived");

    // Archiving again is a no-op
    let res = client
        .patch("/api/messages")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_delete_message() {
    let client = test_client();
    create_agent(&client, "bob");
    let msg = compose(&client, "bob", "s", "m");
    let id = msg["id"].as_str().unwrap();

    let res = client.delete(format!("/api/messages?agent=bob&id={id}")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let res = client.delete(format!("/api/messages?agent=bob&id={id}")).dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_resolve_action() {
    let client = test_client();
    let res = client
        .post("/api/agents")
        .header(ContentType::JSON)
        .body(r#"{"name": "bob", "alias": "bobby", "tmuxSessionName": "bob-main"}"#)
        .dispatch();
    let agent: serde_json::Value = res.into_json().unwrap();

    for identifier in ["bob", "bobby", "bob-main"] {
        let res = client
            .get(format!("/api/messages?action=resolve&identifier={identifier}"))
            .dispatch();
        assert_eq!(res.status(), Status::Ok, "resolve {identifier}");
        let body: serde_json::Value = res.into_json().unwrap();
        assert_eq!(body["agentId"], agent["id"]);
        assert_eq!(body["name"], "bob");
    }

    let res = client
        .get("/api/messages?action=resolve&identifier=missing")
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_counts_stats_and_search() {
    let client = test_client();
    create_agent(&client, "bob");
    compose(&client, "bob", "first", "the quick brown fox");
    compose(&client, "bob", "second", "jumped over");

    let res = client.get("/api/messages?action=unread-count&agent=bob").dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["unreadCount"], 2);

    let res = client.get("/api/messages?action=sent-count&agent=maestro").dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["sentCount"], 2);

    let res = client.get("/api/messages?action=stats&agent=bob").dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["inbox"], 2);
    assert_eq!(body["unread"], 2);
    assert_eq!(body["archived"], 0);

    let res = client.get("/api/messages?action=search&agent=bob&q=FOX").dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["results"][0]["subject"], "first");

    let res = client.get("/api/messages?action=agents").dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let names: Vec<&str> = body["agents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"bob"));
    assert!(names.contains(&"maestro"));
}

#[test]
fn test_forward_message() {
    let client = test_client();
    create_agent(&client, "bob");
    create_agent(&client, "carol");
    let msg = compose(&client, "bob", "origin", "pass it on");
    let id = msg["id"].as_str().unwrap();

    let body = serde_json::json!({ "agent": "bob", "id": id, "to": "carol" });
    let res = client
        .post("/api/messages/forward")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let forwarded: serde_json::Value = res.into_json().unwrap();
    assert_eq!(forwarded["subject"], "Fwd: origin");
    assert_eq!(forwarded["from"], "bob");

    let res = client.get("/api/messages?agent=carol").dispatch();
    let listing: serde_json::Value = res.into_json().unwrap();
    assert_eq!(listing["count"], 1);
}

#[test]
fn test_meeting_messages_dedupe_and_order() {
    let client = test_client();
    create_agent(&client, "alice");
    create_agent(&client, "bob");
    let data_dir = client.data_dir.clone();

    // Craft the broadcast fan-out directly so timestamps are controlled:
    // the same message copied into both inboxes must collapse to one.
    let mailbox = ai_maestro::mailbox::Mailbox::new(std::path::Path::new(&data_dir));
    let mk = |id: &str, from: &str, message: &str, timestamp: &str| ai_maestro::models::StoredMessage {
        id: id.to_string(),
        from: from.to_string(),
        from_alias: None,
        from_label: None,
        to: "broadcast".to_string(),
        to_alias: None,
        subject: "[MEETING:m1] standup".to_string(),
        content: ai_maestro::models::Payload {
            kind: ai_maestro::models::PayloadKind::Notification,
            message: message.to_string(),
            context: None,
            attachments: None,
        },
        priority: ai_maestro::models::Priority::Normal,
        timestamp: timestamp.to_string(),
        status: "unread".to_string(),
        in_reply_to: None,
        thread_id: None,
        delivered_via: "local".to_string(),
        sender_public_key_hex: None,
        signature_verified: None,
    };

    // Broadcast copies (same sender/content/second, different ids)
    mailbox.deliver("alice", &mk("msg_1_aaa", "maestro", "kickoff", "2026-08-01T10:00:00.100+00:00")).unwrap();
    mailbox.deliver("bob", &mk("msg_1_bbb", "maestro", "kickoff", "2026-08-01T10:00:00.900+00:00")).unwrap();
    // A later distinct message
    mailbox.deliver("alice", &mk("msg_2_ccc", "bob", "status: done", "2026-08-01T10:05:00+00:00")).unwrap();
    // Unrelated chatter is excluded by the subject prefix
    let mut other = mk("msg_3_ddd", "bob", "lunch?", "2026-08-01T10:06:00+00:00");
    other.subject = "no meeting tag".to_string();
    mailbox.deliver("alice", &other).unwrap();

    let res = client
        .get("/api/messages/meeting?meetingId=m1&participants=alice,bob")
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["count"], 2);
    // Ascending by timestamp
    assert_eq!(body["messages"][0]["preview"], "kickoff");
    assert_eq!(body["messages"][1]["preview"], "status: done");

    // The since filter trims older entries
    let res = client
        .get("/api/messages/meeting?meetingId=m1&participants=alice,bob&since=2026-08-01T10:01:00%2B00:00")
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["count"], 1);
}
