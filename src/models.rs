use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

// --- Hosts ---

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub id: String,
    pub name: String,
    pub url: String,
    /// "self" for exactly one entry, "remote" for peers.
    #[serde(rename = "type")]
    pub host_type: String,
    /// Every hostname/IP/URL this host is also known by. Used for dedup.
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tailscale: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHost {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateHost {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub aliases: Option<Vec<String>>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Host-level organization label. Write-once: set by explicit user action
/// or adopted during a peer handshake, never renamed.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub organization: String,
    pub set_at: String,
    pub set_by: String,
}

/// Organization block as carried on the mesh wire.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationInfo {
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set_by: Option<String>,
}

// --- Agents ---

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AgentSession {
    pub index: u32,
    pub tmux_session_name: String,
    pub working_directory: String,
    /// "online" iff tmux reports the session exists.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AgentTools {
    #[serde(default)]
    pub repositories: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AmpIdentity {
    pub fingerprint: String,
    pub public_key_hex: String,
    pub key_algorithm: String,
    pub created_at: String,
    pub amp_address: String,
    pub tenant: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub host_id: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// tags[0] is the sidebar folder, tags[1] the sub-folder.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub program_args: Vec<String>,
    /// sessions[0], when present, is the canonical session.
    #[serde(default)]
    pub sessions: Vec<AgentSession>,
    #[serde(default)]
    pub tools: AgentTools,
    #[serde(default = "empty_object")]
    pub hooks: serde_json::Value,
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
    #[serde(default = "empty_object")]
    pub preferences: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amp_identity: Option<AmpIdentity>,
}

impl Agent {
    pub fn canonical_session(&self) -> Option<&AgentSession> {
        self.sessions.first()
    }

    pub fn is_online(&self) -> bool {
        self.sessions
            .first()
            .map(|s| s.status == "online")
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgent {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub program_args: Vec<String>,
    /// When set, an inactive session entry is created alongside the record.
    #[serde(default)]
    pub tmux_session_name: Option<String>,
}

// --- API keys ---

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyRecord {
    /// SHA-256 hex of the opaque token; the token itself is never persisted.
    pub hash: String,
    pub agent_id: String,
    pub tenant_id: String,
    pub address: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

// --- AMP wire objects (snake_case) ---

pub const AMP_VERSION: &str = "amp/0.1";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Request,
    Response,
    Notification,
    Update,
    Ack,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Payload {
    #[serde(rename = "type")]
    pub kind: PayloadKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Envelope {
    pub version: String,
    /// `msg_{unix_ms}_{rand7}`
    pub id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub priority: Priority,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    /// base64 Ed25519 signature over the canonical string; may be empty.
    #[serde(default)]
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    /// `in_reply_to` when replying, else the envelope's own id.
    pub thread_id: String,
}

// --- Stored messages (camelCase) ---

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_label: Option<String>,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_alias: Option<String>,
    pub subject: String,
    pub content: Payload,
    pub priority: Priority,
    pub timestamp: String,
    /// Exactly one of unread | read | archived.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub delivered_via: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_public_key_hex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_verified: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MessageSummary {
    pub id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub preview: String,
    pub status: String,
    pub priority: Priority,
    #[serde(rename = "type")]
    pub kind: PayloadKind,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    pub delivered_via: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_public_key_hex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_verified: Option<bool>,
}

// --- Relay queue ---

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RelayEntry {
    pub agent_id: String,
    pub envelope: Envelope,
    pub payload: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_public_key_hex: Option<String>,
    pub queued_at: String,
    pub expires_at: String,
}

// --- Meetings ---

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Meeting {
    pub id: String,
    pub name: String,
    pub agent_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_agent_id: Option<String>,
    pub sidebar_mode: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMeeting {
    pub name: String,
    #[serde(default)]
    pub agent_ids: Vec<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub sidebar_mode: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMeeting {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub agent_ids: Option<Vec<String>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub active_agent_id: Option<String>,
    #[serde(default)]
    pub sidebar_mode: Option<String>,
    #[serde(default)]
    pub last_active_at: Option<String>,
}

// --- Webhooks ---

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub id: String,
    pub url: String,
    pub events: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub status: String,
    pub failure_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_delivery_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_delivery_status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateWebhook {
    pub url: String,
    #[serde(default = "default_webhook_events")]
    pub events: Vec<String>,
    #[serde(default)]
    pub secret: Option<String>,
}

fn default_webhook_events() -> Vec<String> {
    vec!["*".to_string()]
}

// --- AMP request/response bodies (snake_case) ---

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub tenant: Option<String>,
    pub name: String,
    /// PEM SPKI Ed25519 public key.
    pub public_key: String,
    #[serde(default)]
    pub key_algorithm: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub delivery: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RoutePayloadIn {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<PayloadKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RouteRequest {
    pub to: Option<String>,
    pub subject: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    pub payload: Option<RoutePayloadIn>,
    #[serde(default)]
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
    /// Only honored on mesh-forwarded requests; local senders are identified
    /// by their API key.
    #[serde(default)]
    pub from: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RouteOutcome {
    pub status: &'static str,
    pub method: &'static str,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FederationDelivery {
    pub envelope: Envelope,
    pub payload: Payload,
    #[serde(default)]
    pub sender_public_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchAckRequest {
    #[serde(default)]
    pub ids: Vec<String>,
}

// --- Peer mesh wire objects (camelCase) ---

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PeerHostInfo {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PropagationSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiator: Option<String>,
    #[serde(default)]
    pub propagation_depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub propagation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPeerRequest {
    pub host: PeerHostInfo,
    #[serde(default)]
    pub source: Option<PropagationSource>,
    #[serde(default)]
    pub organization: Option<OrganizationInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangePeersRequest {
    pub from_host: PeerHostInfo,
    #[serde(default)]
    pub known_hosts: Vec<PeerHostInfo>,
    #[serde(default)]
    pub organization: Option<OrganizationInfo>,
    #[serde(default)]
    pub propagation_id: Option<String>,
}

// --- Session commands ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendCommand {
    pub command: String,
    #[serde(default = "default_true")]
    pub require_idle: bool,
    #[serde(default = "default_true")]
    pub add_newline: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkSession {
    pub tmux_session_name: String,
    #[serde(default)]
    pub working_directory: Option<String>,
    /// Spawn the session via tmux if it does not exist yet.
    #[serde(default)]
    pub wake: bool,
}

// --- UI message operations ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeMessage {
    /// Recipient agent name or alias on this host.
    pub to: String,
    #[serde(default)]
    pub from: Option<String>,
    pub subject: String,
    pub message: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default, rename = "type")]
    pub kind: Option<PayloadKind>,
    #[serde(default)]
    pub in_reply_to: Option<String>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchMessage {
    pub agent: String,
    pub id: String,
    /// "read" or "archive"
    pub action: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardMessage {
    pub agent: String,
    pub id: String,
    pub to: String,
}

// --- Aggregated fleet view ---

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct FleetStats {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub orphans: usize,
    pub cached: usize,
    pub newly_registered: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetView {
    pub agents: Vec<serde_json::Value>,
    pub stats: FleetStats,
    /// True on the first-paint response that omits peer hosts.
    pub partial: bool,
}
