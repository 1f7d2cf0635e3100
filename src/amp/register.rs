use crate::amp::address;
use crate::amp::auth::AuthStore;
use crate::error::ApiError;
use crate::hosts::HostsStore;
use crate::keys::{self, KeyStore};
use crate::models::{Agent, AmpIdentity, CreateAgent, RegisterRequest};
use crate::registry::Registry;
use crate::store;
use sha2::{Digest, Sha256};

const ADJECTIVES: [&str; 12] = [
    "swift", "quiet", "bright", "bold", "calm", "clever", "eager", "keen", "lively", "merry",
    "nimble", "steady",
];
const NOUNS: [&str; 12] = [
    "falcon", "otter", "aspen", "comet", "ember", "harbor", "lantern", "meadow", "ridge",
    "sparrow", "thicket", "willow",
];

/// Three alternatives for a taken name: `-2`, `-3`, and an
/// adjective-noun pair picked deterministically from the name.
pub fn name_suggestions(name: &str) -> [String; 3] {
    let digest = Sha256::digest(name.as_bytes());
    let adj = ADJECTIVES[digest[0] as usize % ADJECTIVES.len()];
    let noun = NOUNS[digest[1] as usize % NOUNS.len()];
    [
        format!("{name}-2"),
        format!("{name}-3"),
        format!("{name}-{adj}-{noun}"),
    ]
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOutcome {
    pub created: bool,
    pub agent_id: String,
    pub name: String,
    pub address: String,
    pub fingerprint: String,
    pub api_key: String,
    pub tenant: String,
}

/// Register (or re-register) an agent under this host's organization.
/// A name collision with the same key fingerprint re-issues the API key;
/// a collision with a different fingerprint is refused with suggestions.
pub fn register_agent(
    req: RegisterRequest,
    created_by: Option<String>,
    hosts: &HostsStore,
    registry: &Registry,
    key_store: &KeyStore,
    auth: &AuthStore,
) -> Result<RegisterOutcome, ApiError> {
    let org = hosts
        .organization()
        .ok_or_else(ApiError::organization_not_set)?;

    let name = req.name.trim().to_lowercase();
    if name.is_empty() {
        return Err(ApiError::missing_field("name"));
    }
    if !address::valid_amp_name(&name) {
        return Err(ApiError::invalid_field(
            "name",
            "Agent name must be lowercase letters, digits and inner dashes (max 63 chars)",
        ));
    }
    if let Some(ref alg) = req.key_algorithm
        && !alg.eq_ignore_ascii_case("ed25519")
    {
        return Err(ApiError::invalid_field("key_algorithm", "Key algorithm must be Ed25519"));
    }

    let public_hex = keys::extract_public_key_hex(&req.public_key)?;
    let fingerprint = keys::fingerprint(&public_hex)?;

    let self_host = hosts
        .get_self_host()
        .ok_or_else(|| ApiError::internal("Self host is not configured"))?;
    let tenant = req
        .tenant
        .as_deref()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "default".to_string());
    let provider = address::provider_domain(Some(&org.organization));
    let amp_address =
        address::compose_address(&name, req.scope.as_deref(), &tenant, &provider);

    if let Some(existing) = registry.get_agent_by_name(&name, &self_host.id) {
        let existing_fp = existing
            .amp_identity
            .as_ref()
            .map(|i| i.fingerprint.clone())
            .unwrap_or_default();
        if existing_fp == fingerprint {
            // Same key re-registering: re-issue credentials for the same identity.
            let (api_key, _) = auth.issue(&existing.id, &tenant, &amp_address, created_by)?;
            println!("🔁 AMP re-registration for '{name}' ({fingerprint})");
            return Ok(RegisterOutcome {
                created: false,
                agent_id: existing.id,
                name,
                address: amp_address,
                fingerprint,
                api_key,
                tenant,
            });
        }
        let suggestions = name_suggestions(&name);
        return Err(ApiError::name_taken(format!(
            "Agent name '{name}' is already registered with a different key"
        ))
        .with_extra(serde_json::json!({ "suggestions": suggestions })));
    }

    let agent = create_registered_agent(&req, &name, &self_host.id, registry)?;
    key_store.save_public_key(&agent.id, &public_hex)?;

    let identity = AmpIdentity {
        fingerprint: fingerprint.clone(),
        public_key_hex: public_hex,
        key_algorithm: "Ed25519".to_string(),
        created_at: store::now_rfc3339(),
        amp_address: amp_address.clone(),
        tenant: tenant.clone(),
    };
    registry.mark_amp_registered(&agent.id, identity)?;
    let (api_key, _) = auth.issue(&agent.id, &tenant, &amp_address, created_by)?;
    println!("🔐 AMP registration: '{name}' → {amp_address}");

    Ok(RegisterOutcome {
        created: true,
        agent_id: agent.id,
        name,
        address: amp_address,
        fingerprint,
        api_key,
        tenant,
    })
}

fn create_registered_agent(
    req: &RegisterRequest,
    name: &str,
    host_id: &str,
    registry: &Registry,
) -> Result<Agent, ApiError> {
    let spec = CreateAgent {
        name: name.to_string(),
        label: None,
        alias: req.alias.clone(),
        host_id: Some(host_id.to_string()),
        avatar: None,
        tags: Vec::new(),
        owner: None,
        team: None,
        program: None,
        model: None,
        working_directory: None,
        program_args: Vec::new(),
        tmux_session_name: None,
    };
    let agent = registry.create_agent(spec, host_id)?;
    if let Some(metadata) = req.metadata.clone() {
        return registry.update_agent(&agent.id, &serde_json::json!({ "metadata": metadata }));
    }
    Ok(agent)
}
