use rocket::http::{ContentType, Status};
use rocket::local::blocking::Client;

/// Wrapper around Client that auto-deletes the temp data dir on drop.
/// Uses Option<Client> so the rocket instance drops before the cleanup.
pub struct TestClient {
    client: Option<Client>,
    pub data_dir: String,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        drop(self.client.take());
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

pub fn test_client() -> TestClient {
    // Keep mDNS out of test runs; each test gets a unique data dir so
    // parallel tests never share state.
    unsafe {
        std::env::set_var("MDNS_ENABLED", "0");
    }
    let data_dir = format!(
        "/tmp/aim_test_{}",
        uuid::Uuid::new_v4().simple()
    );

    let rocket = ai_maestro::rocket_with_data_dir(&data_dir);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient {
        client: Some(client),
        data_dir,
    }
}

/// Set the host organization (required before AMP registration).
pub fn set_organization(client: &Client, name: &str) {
    let res = client
        .post("/api/hosts/organization")
        .header(ContentType::JSON)
        .body(format!(r#"{{"organization": "{name}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

/// Generate a fresh Ed25519 keypair and return (keypair, public PEM).
pub fn gen_keypair() -> (ai_maestro::keys::KeyPair, String) {
    let kp = ai_maestro::keys::generate_key_pair();
    let pem = ai_maestro::keys::public_key_to_pem(&kp.public_hex).expect("valid public key");
    (kp, pem)
}

/// Register an agent over AMP; returns the parsed registration response.
pub fn register_agent(client: &Client, name: &str, public_pem: &str) -> serde_json::Value {
    let body = serde_json::json!({
        "name": name,
        "public_key": public_pem,
        "key_algorithm": "Ed25519",
    });
    let res = client
        .post("/v1/register")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Created);
    res.into_json().unwrap()
}

/// Create a plain (UI path) agent record; returns the agent JSON.
pub fn create_agent(client: &Client, name: &str) -> serde_json::Value {
    let res = client
        .post("/api/agents")
        .header(ContentType::JSON)
        .body(format!(r#"{{"name": "{name}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    res.into_json().unwrap()
}

/// Route a message via /v1/route with the given API key.
pub fn route_message<'a>(
    client: &'a Client,
    api_key: &str,
    to: &str,
    subject: &str,
    message: &str,
) -> rocket::local::blocking::LocalResponse<'a> {
    let body = serde_json::json!({
        "to": to,
        "subject": subject,
        "payload": { "type": "notification", "message": message },
    });
    client
        .post("/v1/route")
        .header(ContentType::JSON)
        .header(rocket::http::Header::new(
            "Authorization",
            format!("Bearer {api_key}"),
        ))
        .body(body.to_string())
        .dispatch()
}
