use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_VCPUS_PER_VM: u32 = 64;
pub const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid vm config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("vm name must not be empty")]
    EmptyName,

    #[error("vm name is {len} bytes long (max {max})", max = MAX_NAME_LEN)]
    NameTooLong { len: usize },

    #[error("vm must have between 1 and {max} vcpus (got {0})", max = MAX_VCPUS_PER_VM)]
    InvalidVcpuCount(u32),
}

/// Per-VM settings the monitor needs to host the timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    /// Identifier handed to the interrupt controller with every assertion.
    pub vm_id: u32,
    pub name: String,
    pub vcpus: u32,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            vm_id: 1,
            name: "vm".to_string(),
            vcpus: 1,
        }
    }
}

impl VmConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(ConfigError::NameTooLong {
                len: self.name.len(),
            });
        }
        if self.vcpus == 0 || self.vcpus > MAX_VCPUS_PER_VM {
            return Err(ConfigError::InvalidVcpuCount(self.vcpus));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = VmConfig::from_json(r#"{ "vm_id": 12 }"#).unwrap();
        assert_eq!(config.vm_id, 12);
        assert_eq!(config.name, "vm");
        assert_eq!(config.vcpus, 1);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = VmConfig::from_json(r#"{ "vm_id": 1, "hz": 100 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn limits_are_enforced() {
        let err = VmConfig::from_json(r#"{ "vcpus": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVcpuCount(0)));

        let err = VmConfig::from_json(r#"{ "name": "" }"#).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyName));

        let long = "x".repeat(MAX_NAME_LEN + 1);
        let config = VmConfig {
            name: long,
            ..VmConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NameTooLong { len }) if len == MAX_NAME_LEN + 1
        ));
    }
}
