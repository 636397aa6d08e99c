use dotenvy::dotenv;
use std::env;

/// Process configuration, loaded once at startup. Secrets are only ever
/// injected through the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub gateway_base_url: String,
    pub gateway_secret_key: String,
    pub gateway_callback_url: String,
    pub webhook_secret: String,
    pub default_currency: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();

        let config = Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")?,
            gateway_base_url: env::var("GATEWAY_BASE_URL")?,
            gateway_secret_key: env::var("GATEWAY_SECRET_KEY")?,
            gateway_callback_url: env::var("GATEWAY_CALLBACK_URL")?,
            webhook_secret: env::var("GATEWAY_WEBHOOK_SECRET")?,
            default_currency: env::var("DEFAULT_CURRENCY").unwrap_or_else(|_| "NGN".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.server_port == 0 {
            anyhow::bail!("SERVER_PORT must be greater than 0");
        }
        if self.gateway_secret_key.is_empty() {
            anyhow::bail!("GATEWAY_SECRET_KEY is empty");
        }
        if self.webhook_secret.is_empty() {
            anyhow::bail!("GATEWAY_WEBHOOK_SECRET is empty");
        }
        url::Url::parse(&self.gateway_base_url)
            .map_err(|_| anyhow::anyhow!("GATEWAY_BASE_URL is not a valid URL"))?;
        url::Url::parse(&self.gateway_callback_url)
            .map_err(|_| anyhow::anyhow!("GATEWAY_CALLBACK_URL is not a valid URL"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server_port: 3000,
            database_url: "postgres://localhost:5432/oja".to_string(),
            gateway_base_url: "https://api.gateway.example".to_string(),
            gateway_secret_key: "sk_test_123".to_string(),
            gateway_callback_url: "https://app.example/payments/callback".to_string(),
            webhook_secret: "whsec_123".to_string(),
            default_currency: "NGN".to_string(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_invalid_gateway_url_rejected() {
        let mut config = base_config();
        config.gateway_base_url = "not-a-url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_webhook_secret_rejected() {
        let mut config = base_config();
        config.webhook_secret = String::new();
        assert!(config.validate().is_err());
    }
}
