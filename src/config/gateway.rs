//! Payment gateway configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::ValidationError;

/// Payment gateway configuration (Razorpay)
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Razorpay API key id (public half of the key pair)
    pub key_id: String,

    /// Razorpay API key secret, also used to verify payment signatures
    pub key_secret: SecretString,

    /// Gateway API base URL
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Seconds a created order stays payable before it is expired
    #[serde(default = "default_intent_ttl")]
    pub intent_ttl_secs: u64,

    /// Interval between background expiry sweeps, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl GatewayConfig {
    /// Check if using Razorpay test mode
    pub fn is_test_mode(&self) -> bool {
        self.key_id.starts_with("rzp_test_")
    }

    /// Check if using Razorpay live mode
    pub fn is_live_mode(&self) -> bool {
        self.key_id.starts_with("rzp_live_")
    }

    /// Validate gateway configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.key_id.is_empty() {
            return Err(ValidationError::MissingRequired("GATEWAY_KEY_ID"));
        }
        if self.key_secret.expose_secret().is_empty() {
            return Err(ValidationError::MissingRequired("GATEWAY_KEY_SECRET"));
        }

        // Verify key prefix for safety
        if !self.key_id.starts_with("rzp_") {
            return Err(ValidationError::InvalidGatewayKeyId);
        }
        if !self.api_base_url.starts_with("https://") && !self.api_base_url.starts_with("http://") {
            return Err(ValidationError::InvalidGatewayBaseUrl);
        }
        if self.intent_ttl_secs == 0 {
            return Err(ValidationError::InvalidIntentTtl);
        }
        if self.sweep_interval_secs == 0 {
            return Err(ValidationError::InvalidSweepInterval);
        }

        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            key_id: String::new(),
            key_secret: SecretString::new(String::new()),
            api_base_url: default_api_base_url(),
            intent_ttl_secs: default_intent_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://api.razorpay.com".to_string()
}

fn default_intent_ttl() -> u64 {
    1800
}

fn default_sweep_interval() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            key_id: "rzp_test_abc123".to_string(),
            key_secret: SecretString::new("secret123".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_is_test_mode() {
        let config = test_config();
        assert!(config.is_test_mode());
        assert!(!config.is_live_mode());
    }

    #[test]
    fn test_is_live_mode() {
        let config = GatewayConfig {
            key_id: "rzp_live_abc123".to_string(),
            ..test_config()
        };
        assert!(config.is_live_mode());
        assert!(!config.is_test_mode());
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.api_base_url, "https://api.razorpay.com");
        assert_eq!(config.intent_ttl_secs, 1800);
        assert_eq!(config.sweep_interval_secs, 3600);
    }

    #[test]
    fn test_validation_missing_key_id() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_missing_secret() {
        let config = GatewayConfig {
            key_id: "rzp_test_abc123".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_key_prefix() {
        let config = GatewayConfig {
            key_id: "sk_test_abc123".to_string(),
            ..test_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_ttl() {
        let config = GatewayConfig {
            intent_ttl_secs: 0,
            ..test_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(test_config().validate().is_ok());
    }
}
