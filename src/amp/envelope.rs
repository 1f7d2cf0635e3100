use crate::keys;
use crate::models::{Envelope, Payload, Priority, AMP_VERSION};
use crate::store;

/// `msg_{unix_ms}_{rand7}`
pub fn new_envelope_id() -> String {
    let unix_ms = chrono::Utc::now().timestamp_millis();
    let rand7: String = uuid::Uuid::new_v4().simple().to_string().chars().take(7).collect();
    format!("msg_{unix_ms}_{rand7}")
}

/// Build an envelope with a fresh timestamp. `thread_id` is the reply
/// target when present, else the envelope's own id.
pub fn build_envelope(
    id: String,
    from: &str,
    to: &str,
    subject: &str,
    priority: Priority,
    in_reply_to: Option<String>,
    expires_at: Option<String>,
    signature: String,
) -> Envelope {
    let thread_id = in_reply_to.clone().unwrap_or_else(|| id.clone());
    Envelope {
        version: AMP_VERSION.to_string(),
        id,
        from: from.to_string(),
        to: to.to_string(),
        subject: subject.to_string(),
        priority,
        timestamp: store::now_rfc3339(),
        expires_at,
        signature,
        in_reply_to,
        thread_id,
    }
}

/// Canonical signing string for an envelope + payload pair.
pub fn canonical_for(envelope: &Envelope, payload: &Payload) -> String {
    keys::canonical_string(
        &envelope.from,
        &envelope.to,
        &envelope.subject,
        envelope.priority.as_str(),
        envelope.in_reply_to.as_deref(),
        payload,
    )
}
