use crate::common::{create_agent, test_client};
use rocket::http::{ContentType, Header, Status};

fn delivery_body(id: &str, to: &str) -> serde_json::Value {
    serde_json::json!({
        "envelope": {
            "version": "amp/0.1",
            "id": id,
            "from": "zed@partner.example",
            "to": to,
            "subject": "cross-provider",
            "priority": "normal",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "signature": "",
            "thread_id": id,
        },
        "payload": { "type": "request", "message": "hello from far away" },
    })
}

fn deliver<'a>(
    client: &'a rocket::local::blocking::Client,
    body: &serde_json::Value,
    provider: Option<&str>,
) -> rocket::local::blocking::LocalResponse<'a> {
    let mut req = client
        .post("/v1/federation/deliver")
        .header(ContentType::JSON)
        .body(body.to_string());
    if let Some(p) = provider {
        req = req.header(Header::new("X-AMP-Provider", p.to_string()));
    }
    req.dispatch()
}

#[test]
fn test_federated_delivery_to_local_agent() {
    let client = test_client();
    create_agent(&client, "bob");

    let res = deliver(&client, &delivery_body("msg_1_fed", "bob@acme.aimaestro.local"), Some("partner.example"));
    assert_eq!(res.status(), Status::Ok);
    let out: serde_json::Value = res.into_json().unwrap();
    assert_eq!(out["status"], "delivered");
    assert_eq!(out["method"], "federation");

    let res = client.get("/api/messages?agent=bob").dispatch();
    let listing: serde_json::Value = res.into_json().unwrap();
    assert_eq!(listing["count"], 1);
    assert_eq!(listing["messages"][0]["deliveredVia"], "federation");
}

#[test]
fn test_federation_requires_provider_header() {
    let client = test_client();
    create_agent(&client, "bob");
    let res = deliver(&client, &delivery_body("msg_2_fed", "bob"), None);
    assert_eq!(res.status(), Status::BadRequest);
    let err: serde_json::Value = res.into_json().unwrap();
    assert_eq!(err["error"], "missing_field");
}

#[test]
fn test_federation_replay_protection() {
    let client = test_client();
    create_agent(&client, "bob");
    let body = delivery_body("msg_3_fed", "bob");

    let res = deliver(&client, &body, Some("partner.example"));
    assert_eq!(res.status(), Status::Ok);

    // Exact same envelope id again → duplicate
    let res = deliver(&client, &body, Some("partner.example"));
    assert_eq!(res.status(), Status::Conflict);
    let err: serde_json::Value = res.into_json().unwrap();
    assert_eq!(err["error"], "duplicate_message");

    // Bob still has exactly one copy
    let res = client.get("/api/messages?agent=bob").dispatch();
    let listing: serde_json::Value = res.into_json().unwrap();
    assert_eq!(listing["count"], 1);

    // The marker file is the base64url of the envelope id
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    let marker = format!(
        "{}/federation/delivered/{}",
        client.data_dir,
        URL_SAFE_NO_PAD.encode("msg_3_fed")
    );
    assert!(std::path::Path::new(&marker).exists());
}

#[test]
fn test_federation_unknown_recipient_404() {
    let client = test_client();
    let res = deliver(&client, &delivery_body("msg_4_fed", "nobody"), Some("partner.example"));
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_federation_relays_for_known_remote_agent() {
    let client = test_client();
    let res = client
        .post("/api/agents")
        .header(ContentType::JSON)
        .body(r#"{"name": "roamer", "hostId": "h2"}"#)
        .dispatch();
    let roamer: serde_json::Value = res.into_json().unwrap();

    let res = deliver(&client, &delivery_body("msg_5_fed", "roamer"), Some("partner.example"));
    assert_eq!(res.status(), Status::Ok);
    let out: serde_json::Value = res.into_json().unwrap();
    assert_eq!(out["status"], "queued");
    assert_eq!(out["method"], "relay");

    let dir = format!("{}/relay/{}", client.data_dir, roamer["id"].as_str().unwrap());
    assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 1);
}

#[test]
fn test_federation_verifies_signature_when_key_provided() {
    let client = test_client();
    create_agent(&client, "bob");

    let kp = ai_maestro::keys::generate_key_pair();
    let pem = ai_maestro::keys::public_key_to_pem(&kp.public_hex).unwrap();
    let payload = ai_maestro::models::Payload {
        kind: ai_maestro::models::PayloadKind::Request,
        message: "signed hello".to_string(),
        context: None,
        attachments: None,
    };
    let canonical = ai_maestro::keys::canonical_string(
        "zed@partner.example",
        "bob",
        "signed",
        "normal",
        None,
        &payload,
    );
    let signature = ai_maestro::keys::sign(&kp.signing, &canonical);

    let body = serde_json::json!({
        "envelope": {
            "version": "amp/0.1",
            "id": "msg_6_fed",
            "from": "zed@partner.example",
            "to": "bob",
            "subject": "signed",
            "priority": "normal",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "signature": signature,
            "thread_id": "msg_6_fed",
        },
        "payload": { "type": "request", "message": "signed hello" },
        "sender_public_key": pem,
    });
    let res = deliver(&client, &body, Some("partner.example"));
    assert_eq!(res.status(), Status::Ok);

    let res = client.get("/api/messages?agent=bob").dispatch();
    let listing: serde_json::Value = res.into_json().unwrap();
    assert_eq!(listing["messages"][0]["signatureVerified"], true);
}
