use crate::error::ApiError;
use crate::models::Payload;
use crate::store;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::io;
use std::path::PathBuf;

// DER prefixes for Ed25519: SPKI public keys and PKCS#8 private keys.
const SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];
const PKCS8_PREFIX: [u8; 16] = [
    0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04,
    0x20,
];

pub struct KeyPair {
    pub signing: SigningKey,
    pub public_hex: String,
}

pub fn generate_key_pair() -> KeyPair {
    let signing = SigningKey::generate(&mut OsRng);
    let public_hex = hex::encode(signing.verifying_key().to_bytes());
    KeyPair { signing, public_hex }
}

fn pem_wrap(tag: &str, der: &[u8]) -> String {
    let b64 = BASE64.encode(der);
    let mut out = format!("-----BEGIN {tag}-----\n");
    for chunk in b64.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(chunk).unwrap_or(""));
        out.push('\n');
    }
    out.push_str(&format!("-----END {tag}-----\n"));
    out
}

fn pem_body(pem: &str, tag: &str) -> Option<Vec<u8>> {
    let begin = format!("-----BEGIN {tag}-----");
    let end = format!("-----END {tag}-----");
    let start = pem.find(&begin)? + begin.len();
    let stop = pem.find(&end)?;
    let body: String = pem[start..stop].chars().filter(|c| !c.is_whitespace()).collect();
    BASE64.decode(body).ok()
}

/// PEM-encode a raw 32-byte public key (hex) as SPKI.
pub fn public_key_to_pem(public_hex: &str) -> Result<String, ApiError> {
    let raw = hex::decode(public_hex)
        .map_err(|_| ApiError::invalid_field("public_key", "Public key must be 32-byte hex"))?;
    if raw.len() != 32 {
        return Err(ApiError::invalid_field("public_key", "Public key must be 32-byte hex"));
    }
    let mut der = Vec::with_capacity(44);
    der.extend_from_slice(&SPKI_PREFIX);
    der.extend_from_slice(&raw);
    Ok(pem_wrap("PUBLIC KEY", &der))
}

pub fn private_key_to_pem(signing: &SigningKey) -> String {
    let mut der = Vec::with_capacity(48);
    der.extend_from_slice(&PKCS8_PREFIX);
    der.extend_from_slice(&signing.to_bytes());
    pem_wrap("PRIVATE KEY", &der)
}

/// Validate a PEM SPKI Ed25519 public key and return the raw key as 64-char hex.
pub fn extract_public_key_hex(pem: &str) -> Result<String, ApiError> {
    let der = pem_body(pem, "PUBLIC KEY")
        .ok_or_else(|| ApiError::invalid_field("public_key", "Public key must be PEM-encoded"))?;
    if der.len() != 44 || der[..12] != SPKI_PREFIX {
        return Err(ApiError::invalid_field(
            "public_key",
            "Public key must be an Ed25519 SPKI key",
        ));
    }
    Ok(hex::encode(&der[12..]))
}

fn extract_private_seed(pem: &str) -> Option<[u8; 32]> {
    let der = pem_body(pem, "PRIVATE KEY")?;
    if der.len() != 48 || der[..16] != PKCS8_PREFIX {
        return None;
    }
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&der[16..]);
    Some(seed)
}

/// `"SHA256:" + base64(sha256(raw public key bytes))`
pub fn fingerprint(public_hex: &str) -> Result<String, ApiError> {
    let raw = hex::decode(public_hex)
        .map_err(|_| ApiError::invalid_field("public_key", "Public key must be 32-byte hex"))?;
    Ok(format!("SHA256:{}", BASE64.encode(Sha256::digest(&raw))))
}

/// The string AMP signatures are computed over:
/// `from|to|subject|priority|in_reply_to|base64(sha256(json(payload)))`.
/// A missing `in_reply_to` is rendered as the empty string.
pub fn canonical_string(
    from: &str,
    to: &str,
    subject: &str,
    priority: &str,
    in_reply_to: Option<&str>,
    payload: &Payload,
) -> String {
    let payload_json = serde_json::to_string(payload).unwrap_or_default();
    let payload_hash = BASE64.encode(Sha256::digest(payload_json.as_bytes()));
    format!(
        "{from}|{to}|{subject}|{priority}|{}|{payload_hash}",
        in_reply_to.unwrap_or("")
    )
}

pub fn sign(signing: &SigningKey, canonical: &str) -> String {
    BASE64.encode(signing.sign(canonical.as_bytes()).to_bytes())
}

/// Verify a base64 signature against a 64-char-hex public key. Any parse
/// failure counts as verification failure.
pub fn verify(public_hex: &str, canonical: &str, signature_b64: &str) -> bool {
    let Ok(raw) = hex::decode(public_hex) else {
        return false;
    };
    let Ok(raw32) = <[u8; 32]>::try_from(raw.as_slice()) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&raw32) else {
        return false;
    };
    let Ok(sig_bytes) = BASE64.decode(signature_b64) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    key.verify(canonical.as_bytes(), &sig).is_ok()
}

/// Per-agent Ed25519 key material on disk:
/// `agents/<uuid>/keys/{private.pem (0600), public.pem (0644)}`.
pub struct KeyStore {
    agents_dir: PathBuf,
}

impl KeyStore {
    pub fn new(data_dir: &std::path::Path) -> Self {
        KeyStore {
            agents_dir: data_dir.join("agents"),
        }
    }

    fn keys_dir(&self, agent_id: &str) -> PathBuf {
        self.agents_dir.join(agent_id).join("keys")
    }

    pub fn save_key_pair(&self, agent_id: &str, kp: &KeyPair) -> io::Result<()> {
        let dir = self.keys_dir(agent_id);
        store::write_text_atomic_mode(&dir.join("private.pem"), &private_key_to_pem(&kp.signing), 0o600)?;
        let public_pem = public_key_to_pem(&kp.public_hex)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.message))?;
        store::write_text_atomic_mode(&dir.join("public.pem"), &public_pem, 0o644)
    }

    /// Persist only a public key (agents registered remotely never share
    /// private material).
    pub fn save_public_key(&self, agent_id: &str, public_hex: &str) -> Result<(), ApiError> {
        let pem = public_key_to_pem(public_hex)?;
        store::write_text_atomic_mode(&self.keys_dir(agent_id).join("public.pem"), &pem, 0o644)?;
        Ok(())
    }

    pub fn load_key_pair(&self, agent_id: &str) -> Option<KeyPair> {
        let pem = std::fs::read_to_string(self.keys_dir(agent_id).join("private.pem")).ok()?;
        let seed = extract_private_seed(&pem)?;
        let signing = SigningKey::from_bytes(&seed);
        let public_hex = hex::encode(signing.verifying_key().to_bytes());
        Some(KeyPair { signing, public_hex })
    }

    pub fn public_key_hex(&self, agent_id: &str) -> Option<String> {
        let pem = std::fs::read_to_string(self.keys_dir(agent_id).join("public.pem")).ok()?;
        extract_public_key_hex(&pem).ok()
    }
}
