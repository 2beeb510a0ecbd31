use crate::error::{AudioModemError, Result};
use crate::{DEFAULT_PROFILE_NAME, DEFAULT_RECEIVE_TIMEOUT_SECS, DEFAULT_SETTLE_DELAY_MS};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// External page that performs the receive role in a full browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub base_url: String,
    pub bot: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            base_url: "https://zvukpay.link/receiver.html".to_string(),
            bot: String::new(),
        }
    }
}

impl FallbackConfig {
    /// `<base_url>?bot=<bot>&token_id=<id>&amount=<amount>`
    pub fn url_for(&self, token_id: &str, amount: Decimal) -> Result<Url> {
        let amount = amount.normalize().to_string();
        Url::parse_with_params(
            &self.base_url,
            &[("bot", self.bot.as_str()), ("token_id", token_id), ("amount", amount.as_str())],
        )
        .map_err(|e| AudioModemError::InvalidConfig(format!("fallback url: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Modem profile both ends agreed on
    pub profile: String,
    pub receive_timeout_secs: u64,
    pub settle_delay_ms: u64,
    pub fallback: FallbackConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            profile: DEFAULT_PROFILE_NAME.to_string(),
            receive_timeout_secs: DEFAULT_RECEIVE_TIMEOUT_SECS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            fallback: FallbackConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Parse a config document. The top level must be a JSON object; fields
    /// it leaves out keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| AudioModemError::InvalidConfig(e.to_string()))?;
        if !value.is_object() {
            return Err(AudioModemError::InvalidConfig(
                "config must be a JSON object".to_string(),
            ));
        }
        let config: Self =
            serde_json::from_value(value).map_err(|e| AudioModemError::InvalidConfig(e.to_string()))?;
        if config.receive_timeout_secs == 0 {
            return Err(AudioModemError::InvalidConfig(
                "receive_timeout_secs must be positive".to_string(),
            ));
        }
        Url::parse(&config.fallback.base_url)
            .map_err(|e| AudioModemError::InvalidConfig(format!("fallback base_url: {}", e)))?;
        Ok(config)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.profile, "default");
        assert_eq!(config.receive_timeout(), Duration::from_secs(12));
        assert_eq!(config.settle_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SessionConfig::from_json(r#"{ "profile": "robust", "fallback": { "bot": "paybot" } }"#).unwrap();
        assert_eq!(config.profile, "robust");
        assert_eq!(config.receive_timeout_secs, 12);
        assert_eq!(config.fallback.bot, "paybot");
        assert_eq!(config.fallback.base_url, FallbackConfig::default().base_url);
    }

    #[test]
    fn test_invalid_json_values() {
        assert!(SessionConfig::from_json(r#"{ "receive_timeout_secs": 0 }"#).is_err());
        assert!(SessionConfig::from_json(r#"{ "fallback": { "base_url": "not a url" } }"#).is_err());
    }

    #[test]
    fn test_non_object_documents_rejected() {
        for json in ["[]", "[\"robust\", 12]", "12", "\"default\"", "null"] {
            assert!(
                matches!(SessionConfig::from_json(json), Err(AudioModemError::InvalidConfig(_))),
                "{} was accepted",
                json
            );
        }
        assert!(SessionConfig::from_json("{}").is_ok());
    }

    #[test]
    fn test_fallback_url() {
        let fallback = FallbackConfig {
            base_url: "https://example.com/receiver.html".to_string(),
            bot: "pay_bot".to_string(),
        };
        let url = fallback.url_for("abc 123", Decimal::new(5000, 2)).unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.com/receiver.html?bot=pay_bot&token_id=abc+123&amount=50"
        );
    }
}
