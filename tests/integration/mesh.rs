use crate::common::{set_organization, test_client};
use rocket::http::{ContentType, Status};

fn register_peer_body(id: &str, url: &str) -> serde_json::Value {
    serde_json::json!({
        "host": { "id": id, "name": format!("Host {id}"), "url": url },
    })
}

#[test]
fn test_register_peer_happy_path() {
    let client = test_client();
    let body = serde_json::json!({
        "host": { "id": "h2", "name": "Host 2", "url": "http://10.0.0.2:8000" },
        "organization": { "value": "acme" },
        "source": { "initiator": "h2", "propagationDepth": 0 },
    });
    let res = client
        .post("/api/hosts/register-peer")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let out: serde_json::Value = res.into_json().unwrap();
    assert_eq!(out["registered"], true);
    assert_eq!(out["alreadyKnown"], false);
    assert!(out["host"]["id"].as_str().unwrap().len() > 0);
    assert_eq!(out["organization"]["value"], "acme");

    // The organization was adopted from the peer
    let res = client.get("/api/hosts/identity").dispatch();
    let identity: serde_json::Value = res.into_json().unwrap();
    assert_eq!(identity["organization"]["organization"], "acme");

    // And the peer is now in the hosts list with a sync source
    let res = client.get("/api/hosts").dispatch();
    let hosts: Vec<serde_json::Value> = res.into_json().unwrap();
    let peer = hosts.iter().find(|h| h["id"] == "h2").unwrap();
    assert_eq!(peer["type"], "remote");
    assert_eq!(peer["syncSource"], "h2");
}

#[test]
fn test_register_peer_twice_reports_already_known() {
    let client = test_client();
    let body = register_peer_body("h2", "http://10.0.0.2:8000");
    client
        .post("/api/hosts/register-peer")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    let res = client
        .post("/api/hosts/register-peer")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    let out: serde_json::Value = res.into_json().unwrap();
    assert_eq!(out["registered"], true);
    assert_eq!(out["alreadyKnown"], true);
}

#[test]
fn test_register_peer_refuses_self() {
    let client = test_client();
    let res = client.get("/api/hosts/identity").dispatch();
    let identity: serde_json::Value = res.into_json().unwrap();
    let self_id = identity["host"]["id"].as_str().unwrap();

    let res = client
        .post("/api/hosts/register-peer")
        .header(ContentType::JSON)
        .body(register_peer_body(self_id, "http://10.9.9.9:8000").to_string())
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_propagation_depth_guard() {
    let client = test_client();

    // Depth 3 is the last acceptable hop
    let body = serde_json::json!({
        "host": { "id": "h3", "name": "Host 3", "url": "http://10.0.0.3:8000" },
        "source": { "propagationDepth": 3 },
    });
    let res = client
        .post("/api/hosts/register-peer")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    // Depth 4 is rejected without mutation
    let body = serde_json::json!({
        "host": { "id": "h4", "name": "Host 4", "url": "http://10.0.0.4:8000" },
        "source": { "propagationDepth": 4 },
    });
    let res = client
        .post("/api/hosts/register-peer")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);

    let res = client.get("/api/hosts").dispatch();
    let hosts: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(hosts.iter().all(|h| h["id"] != "h4"));
}

#[test]
fn test_propagation_id_replay_is_ignored() {
    let client = test_client();
    let pid = uuid::Uuid::new_v4().to_string();

    let body = serde_json::json!({
        "host": { "id": "h2", "name": "Host 2", "url": "http://10.0.0.2:8000" },
        "source": { "propagationDepth": 1, "propagationId": pid },
    });
    let res = client
        .post("/api/hosts/register-peer")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    let out: serde_json::Value = res.into_json().unwrap();
    assert_eq!(out["registered"], true);

    // Same propagation id with a different host: no-op
    let body = serde_json::json!({
        "host": { "id": "h5", "name": "Host 5", "url": "http://10.0.0.5:8000" },
        "source": { "propagationDepth": 1, "propagationId": pid },
    });
    let res = client
        .post("/api/hosts/register-peer")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let out: serde_json::Value = res.into_json().unwrap();
    assert_eq!(out["registered"], false);

    let res = client.get("/api/hosts").dispatch();
    let hosts: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(hosts.iter().all(|h| h["id"] != "h5"));
}

#[test]
fn test_register_peer_organization_mismatch_409() {
    let client = test_client();
    set_organization(&client, "acme");

    let body = serde_json::json!({
        "host": { "id": "h6", "name": "Host 6", "url": "http://10.0.0.6:8000" },
        "organization": { "value": "zebra" },
    });
    let res = client
        .post("/api/hosts/register-peer")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);

    let res = client.get("/api/hosts").dispatch();
    let hosts: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(hosts.iter().all(|h| h["id"] != "h6"));
}

#[test]
fn test_exchange_peers_skips_and_probes() {
    let client = test_client();
    // Sender and one more peer are already known
    client
        .post("/api/hosts/register-peer")
        .header(ContentType::JSON)
        .body(register_peer_body("h2", "http://10.0.0.2:8000").to_string())
        .dispatch();
    client
        .post("/api/hosts/register-peer")
        .header(ContentType::JSON)
        .body(register_peer_body("h3", "http://10.0.0.3:8000").to_string())
        .dispatch();

    let res = client.get("/api/hosts/identity").dispatch();
    let identity: serde_json::Value = res.into_json().unwrap();
    let self_id = identity["host"]["id"].as_str().unwrap();

    let body = serde_json::json!({
        "fromHost": { "id": "h2", "name": "Host 2", "url": "http://10.0.0.2:8000" },
        "knownHosts": [
            // self: silently skipped
            { "id": self_id, "name": "Me", "url": "http://10.9.9.9:1" },
            // the sender itself: skipped
            { "id": "h2", "name": "Host 2", "url": "http://10.0.0.2:8000" },
            // already known by id: reported as such
            { "id": "h3", "name": "Host 3", "url": "http://10.0.0.3:8000" },
            // fresh but unreachable: health probe fails, not added
            { "id": "h7", "name": "Host 7", "url": "http://127.0.0.1:1" },
        ],
    });
    let res = client
        .post("/api/hosts/exchange-peers")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let out: serde_json::Value = res.into_json().unwrap();
    assert_eq!(out["newlyAdded"].as_array().unwrap().len(), 0);
    assert_eq!(out["alreadyKnown"][0], "h3");
    assert_eq!(out["unreachable"][0], "h7");

    let res = client.get("/api/hosts").dispatch();
    let hosts: Vec<serde_json::Value> = res.into_json().unwrap();
    assert!(hosts.iter().all(|h| h["id"] != "h7"));
}

#[test]
fn test_exchange_peers_replay_guard() {
    let client = test_client();
    let pid = uuid::Uuid::new_v4().to_string();
    let body = serde_json::json!({
        "fromHost": { "id": "h2", "name": "Host 2", "url": "http://10.0.0.2:8000" },
        "knownHosts": [],
        "propagationId": pid,
    });
    let res = client
        .post("/api/hosts/exchange-peers")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client
        .post("/api/hosts/exchange-peers")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    let out: serde_json::Value = res.into_json().unwrap();
    assert_eq!(out["reason"], "propagation_replay");
}

#[test]
fn test_exchange_peers_organization_mismatch() {
    let client = test_client();
    set_organization(&client, "acme");
    let body = serde_json::json!({
        "fromHost": { "id": "h4", "name": "Host 4", "url": "http://10.0.0.4:8000" },
        "knownHosts": [],
        "organization": { "value": "other-org" },
    });
    let res = client
        .post("/api/hosts/exchange-peers")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
}

#[test]
fn test_propagation_set_survives_restart() {
    let client = test_client();
    let pid = uuid::Uuid::new_v4().to_string();
    let data_dir = client.data_dir.clone();

    let body = serde_json::json!({
        "host": { "id": "h2", "name": "Host 2", "url": "http://10.0.0.2:8000" },
        "source": { "propagationId": pid },
    });
    client
        .post("/api/hosts/register-peer")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();

    // A fresh PropagationSet over the same directory still knows the id
    let set = ai_maestro::mesh::PropagationSet::new(std::path::Path::new(&data_dir));
    assert!(set.seen_or_record(&pid));
}
