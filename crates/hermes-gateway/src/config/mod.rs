//! Bridge config loader (strict parsing).

pub mod schema;

use std::fs;

use hermes_core::error::{BridgeError, Result};

pub use schema::{
    AgentConfig, AlertSection, AuditSection, BridgeConfig, CommandConfig, DeliverySection,
    GatewaySection, PolicySection, RateLimitBackend, StoreSection, WorkflowSection,
};

pub fn load_from_file(path: &str) -> Result<BridgeConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| BridgeError::Internal(format!("read config failed ({path}): {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<BridgeConfig> {
    let cfg: BridgeConfig = serde_yaml::from_str(s)
        .map_err(|e| BridgeError::BadRequest(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
