use crate::common::{create_agent, test_client};
use rocket::http::{ContentType, Status};

#[test]
fn test_create_and_get_agent() {
    let client = test_client();
    let agent = create_agent(&client, "forge");
    assert_eq!(agent["name"], "forge");
    assert!(agent["id"].as_str().unwrap().len() > 0);
    assert!(agent["hostId"].as_str().unwrap().len() > 0);

    let res = client
        .get(format!("/api/agents/{}", agent["id"].as_str().unwrap()))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let fetched: serde_json::Value = res.into_json().unwrap();
    assert_eq!(fetched["name"], "forge");
}

#[test]
fn test_duplicate_name_on_same_host_fails() {
    let client = test_client();
    create_agent(&client, "drift");

    let res = client
        .post("/api/agents")
        .header(ContentType::JSON)
        .body(r#"{"name": "drift"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["error"], "name_taken");

    // Same name on a different host is fine
    let res = client
        .post("/api/agents")
        .header(ContentType::JSON)
        .body(r#"{"name": "drift", "hostId": "other-host"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_invalid_agent_name() {
    let client = test_client();
    let res = client
        .post("/api/agents")
        .header(ContentType::JSON)
        .body(r#"{"name": "bad name!"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["error"], "invalid_field");
}

#[test]
fn test_get_missing_agent_404() {
    let client = test_client();
    let res = client.get("/api/agents/no-such-id").dispatch();
    assert_eq!(res.status(), Status::NotFound);
}

#[test]
fn test_search_agents() {
    let client = test_client();
    create_agent(&client, "lux");
    create_agent(&client, "luna");
    create_agent(&client, "forge");

    let res = client.get("/api/agents/search?q=lu").dispatch();
    let results: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(results.len(), 2);

    // Case-insensitive
    let res = client.get("/api/agents/search?q=LU").dispatch();
    let results: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(results.len(), 2);
}

#[test]
fn test_update_agent_merges_metadata_amp_deeply() {
    let client = test_client();
    let agent = create_agent(&client, "patchy");
    let id = agent["id"].as_str().unwrap();

    // Seed metadata.amp with two keys
    let res = client
        .patch(format!("/api/agents/{id}"))
        .header(ContentType::JSON)
        .body(r#"{"label": "Patchy", "metadata": {"amp": {"a": 1, "b": 2}}}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    // Patch only one amp key; the other must survive the deep merge
    let res = client
        .patch(format!("/api/agents/{id}"))
        .header(ContentType::JSON)
        .body(r#"{"metadata": {"amp": {"b": 3}}}"#)
        .dispatch();
    let updated: serde_json::Value = res.into_json().unwrap();
    assert_eq!(updated["label"], "Patchy");
    assert_eq!(updated["metadata"]["amp"]["a"], 1);
    assert_eq!(updated["metadata"]["amp"]["b"], 3);

    // Preferences also merge deeply
    client
        .patch(format!("/api/agents/{id}"))
        .header(ContentType::JSON)
        .body(r#"{"preferences": {"theme": "dark"}}"#)
        .dispatch();
    let res = client
        .patch(format!("/api/agents/{id}"))
        .header(ContentType::JSON)
        .body(r#"{"preferences": {"notifyOnMessage": true}}"#)
        .dispatch();
    let updated: serde_json::Value = res.into_json().unwrap();
    assert_eq!(updated["preferences"]["theme"], "dark");
    assert_eq!(updated["preferences"]["notifyOnMessage"], true);
}

#[test]
fn test_soft_delete_leaves_backup() {
    let client = test_client();
    let agent = create_agent(&client, "ghost");
    let id = agent["id"].as_str().unwrap().to_string();

    let res = client.delete(format!("/api/agents/{id}")).dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client.get(format!("/api/agents/{id}")).dispatch();
    assert_eq!(res.status(), Status::NotFound);

    let backup = format!("{}/agents/deleted/{id}.json", client.data_dir);
    assert!(std::path::Path::new(&backup).exists());
}

#[test]
fn test_hard_delete_wipes_mailboxes() {
    let client = test_client();
    let agent = create_agent(&client, "wipeme");
    let id = agent["id"].as_str().unwrap().to_string();

    // Put a message in the inbox first
    let res = client
        .post("/api/messages")
        .header(ContentType::JSON)
        .body(r#"{"to": "wipeme", "subject": "hi", "message": "there"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    assert!(std::path::Path::new(&format!("{}/messages/inbox/wipeme", client.data_dir)).exists());

    let res = client.delete(format!("/api/agents/{id}?hard=true")).dispatch();
    assert_eq!(res.status(), Status::Ok);

    assert!(!std::path::Path::new(&format!("{}/messages/inbox/wipeme", client.data_dir)).exists());
    assert!(!std::path::Path::new(&format!("{}/agents/{id}", client.data_dir)).exists());
}

#[test]
fn test_lookup_endpoint() {
    let client = test_client();
    create_agent(&client, "findme");

    let res = client.get("/api/agents/lookup?name=findme").dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["found"], true);
    assert_eq!(body["agent"]["name"], "findme");

    let res = client.get("/api/agents/lookup?name=nobody").dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["found"], false);
}

#[test]
fn test_fleet_view_filters_system_agents_and_counts_orphans() {
    let client = test_client();
    create_agent(&client, "visible");
    create_agent(&client, "_aim-helper");

    // Agent pinned to a host that isn't configured → orphan
    client
        .post("/api/agents")
        .header(ContentType::JSON)
        .body(r#"{"name": "stray", "hostId": "gone-host"}"#)
        .dispatch();

    let res = client.get("/api/agents").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let view: serde_json::Value = res.into_json().unwrap();
    let agents = view["agents"].as_array().unwrap();
    assert!(agents.iter().all(|a| a["name"] != "_aim-helper"));
    assert_eq!(view["stats"]["total"], 2);
    assert_eq!(view["stats"]["orphans"], 1);
    assert_eq!(view["stats"]["online"], 0);
    // Everything here was just created
    assert_eq!(view["stats"]["newlyRegistered"], 2);
}

#[test]
fn test_local_listing_returns_bare_array() {
    let client = test_client();
    create_agent(&client, "solo");
    let res = client.get("/api/agents?local=true").dispatch();
    let agents: Vec<serde_json::Value> = res.into_json().unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0]["name"], "solo");
}
