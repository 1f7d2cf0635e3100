use crate::error::ApiError;

pub const DEFAULT_PROVIDER_DOMAIN: &str = "aimaestro.local";

/// `{organization}.aimaestro.local`, or the bare default when no
/// organization is configured.
pub fn provider_domain(organization: Option<&str>) -> String {
    match organization {
        Some(org) if !org.is_empty() => format!("{org}.{DEFAULT_PROVIDER_DOMAIN}"),
        _ => DEFAULT_PROVIDER_DOMAIN.to_string(),
    }
}

/// AMP agent names: lowercase DNS-label shape,
/// `^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$`.
pub fn valid_amp_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > 63 {
        return false;
    }
    let label = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !label(bytes[0]) || !label(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes.iter().all(|&b| label(b) || b == b'-')
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    pub name: String,
    pub tenant: Option<String>,
    pub scope: Option<String>,
    /// True when the recipient was given as a bare name with no provider.
    pub bare: bool,
}

/// `{name}@[scope.]{tenant}.{provider}`
pub fn compose_address(name: &str, scope: Option<&str>, tenant: &str, provider: &str) -> String {
    match scope {
        Some(scope) if !scope.is_empty() => format!("{name}@{scope}.{tenant}.{provider}"),
        _ => format!("{name}@{tenant}.{provider}"),
    }
}

/// Parse a recipient. Bare names resolve within this provider; full
/// addresses must end in our provider domain, anything else is a foreign
/// provider this host will not route to.
pub fn parse_address(to: &str, provider: &str) -> Result<ParsedAddress, ApiError> {
    let to = to.trim();
    if to.is_empty() {
        return Err(ApiError::missing_field("to"));
    }

    let Some((name, domain)) = to.split_once('@') else {
        return Ok(ParsedAddress {
            name: to.to_lowercase(),
            tenant: None,
            scope: None,
            bare: true,
        });
    };

    let name = name.to_lowercase();
    if name.is_empty() {
        return Err(ApiError::invalid_field("to", "Recipient name must not be empty"));
    }

    let rest = if domain == provider {
        ""
    } else if let Some(rest) = domain.strip_suffix(&format!(".{provider}")) {
        rest
    } else {
        return Err(ApiError::external_provider(format!(
            "Recipient provider '{domain}' is not served by this host"
        )));
    };

    let segments: Vec<&str> = rest.split('.').filter(|s| !s.is_empty()).collect();
    let (scope, tenant) = match segments.as_slice() {
        [] => (None, None),
        [tenant] => (None, Some(tenant.to_string())),
        [scope, .., tenant] => (Some(scope.to_string()), Some(tenant.to_string())),
    };

    Ok(ParsedAddress {
        name,
        tenant,
        scope,
        bare: false,
    })
}
