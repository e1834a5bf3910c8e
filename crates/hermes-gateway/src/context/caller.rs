use hermes_core::error::{BridgeError, Result};

/// Callers identified by a workflow callback are namespaced under this prefix.
pub const CALLBACK_PREFIX: &str = "n8n:";

const MAX_CALLER_LEN: usize = 128;

/// Trim and validate a caller id as it arrives in a request body.
///
/// Ids are case-sensitive; policy keys must match them exactly.
pub fn normalize_caller_id(raw: &str) -> Result<String> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(BridgeError::BadRequest("caller_id must not be empty".into()));
    }
    if id.chars().count() > MAX_CALLER_LEN {
        return Err(BridgeError::BadRequest(format!("caller_id longer than {MAX_CALLER_LEN} chars")));
    }
    if let Some(c) = id.chars().find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '@'))) {
        return Err(BridgeError::BadRequest(format!("caller_id contains invalid character {c:?}")));
    }
    Ok(id.to_string())
}

/// Caller id for a workflow calling back into the bridge.
pub fn callback_caller(source_workflow: &str) -> Result<String> {
    let src = normalize_caller_id(source_workflow)
        .map_err(|_| BridgeError::BadRequest(format!("invalid source_workflow: {source_workflow:?}")))?;
    Ok(format!("{CALLBACK_PREFIX}{src}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_accepts_namespaced_ids() {
        assert_eq!(normalize_caller_id("  researcher ").unwrap(), "researcher");
        assert_eq!(normalize_caller_id("n8n:daily-digest").unwrap(), "n8n:daily-digest");
    }

    #[test]
    fn rejects_empty_and_odd_characters() {
        assert!(normalize_caller_id("   ").is_err());
        assert!(normalize_caller_id("a b").is_err());
        assert!(normalize_caller_id("x/../y").is_err());
        assert!(normalize_caller_id(&"a".repeat(129)).is_err());
    }

    #[test]
    fn callback_ids_are_prefixed() {
        assert_eq!(callback_caller("wf_42").unwrap(), "n8n:wf_42");
        assert_eq!(callback_caller("").unwrap_err().client_code().as_str(), "BAD_REQUEST");
    }
}
