use ai_maestro::keys;
use ai_maestro::models::{Payload, PayloadKind};

fn sample_payload() -> Payload {
    Payload {
        kind: PayloadKind::Notification,
        message: "hello".to_string(),
        context: None,
        attachments: None,
    }
}

#[test]
fn test_pem_round_trip() {
    let kp = keys::generate_key_pair();
    let pem = keys::public_key_to_pem(&kp.public_hex).unwrap();
    assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
    let hex = keys::extract_public_key_hex(&pem).unwrap();
    assert_eq!(hex, kp.public_hex);
    assert_eq!(hex.len(), 64);
}

#[test]
fn test_extract_rejects_garbage() {
    assert!(keys::extract_public_key_hex("not a pem").is_err());
    // Valid base64 but not an Ed25519 SPKI body
    let fake = "-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n";
    let err = keys::extract_public_key_hex(fake).unwrap_err();
    assert_eq!(err.error, "invalid_field");
}

#[test]
fn test_fingerprint_shape() {
    let kp = keys::generate_key_pair();
    let fp = keys::fingerprint(&kp.public_hex).unwrap();
    assert!(fp.starts_with("SHA256:"));
    // base64 of 32 bytes is 44 chars with padding
    assert_eq!(fp.len(), "SHA256:".len() + 44);
}

#[test]
fn test_sign_verify_round_trip() {
    let kp = keys::generate_key_pair();
    let canonical = keys::canonical_string(
        "alice@acme.aimaestro.local",
        "bob@acme.aimaestro.local",
        "hi",
        "normal",
        None,
        &sample_payload(),
    );
    let sig = keys::sign(&kp.signing, &canonical);
    assert!(keys::verify(&kp.public_hex, &canonical, &sig));

    // Any bit flip in the data breaks verification
    let tampered = canonical.replace("hi", "ho");
    assert!(!keys::verify(&kp.public_hex, &tampered, &sig));

    // A different key fails too
    let other = keys::generate_key_pair();
    assert!(!keys::verify(&other.public_hex, &canonical, &sig));

    // Corrupt signature fails
    let mut bad_sig = sig.clone();
    bad_sig.replace_range(0..1, if sig.starts_with('A') { "B" } else { "A" });
    assert!(!keys::verify(&kp.public_hex, &canonical, &bad_sig));
}

#[test]
fn test_canonical_string_format() {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use sha2::{Digest, Sha256};

    let payload = sample_payload();
    let payload_json = serde_json::to_string(&payload).unwrap();
    let hash = STANDARD.encode(Sha256::digest(payload_json.as_bytes()));

    let canonical = keys::canonical_string("a@x", "b@x", "subj", "high", None, &payload);
    assert_eq!(canonical, format!("a@x|b@x|subj|high||{hash}"));

    let threaded = keys::canonical_string("a@x", "b@x", "subj", "high", Some("msg_1_abc"), &payload);
    assert_eq!(threaded, format!("a@x|b@x|subj|high|msg_1_abc|{hash}"));
}

#[test]
fn test_key_store_persists_pair() {
    let dir = format!("/tmp/aim_keys_{}", uuid::Uuid::new_v4().simple());
    let store = keys::KeyStore::new(std::path::Path::new(&dir));
    let kp = keys::generate_key_pair();
    store.save_key_pair("agent-1", &kp).unwrap();

    let loaded = store.load_key_pair("agent-1").unwrap();
    assert_eq!(loaded.public_hex, kp.public_hex);
    assert_eq!(store.public_key_hex("agent-1").unwrap(), kp.public_hex);

    // Private key is mode 0600
    use std::os::unix::fs::PermissionsExt;
    let meta = std::fs::metadata(format!("{dir}/agents/agent-1/keys/private.pem")).unwrap();
    assert_eq!(meta.permissions().mode() & 0o777, 0o600);

    let _ = std::fs::remove_dir_all(&dir);
}
