use crate::error::{BotError, Result};

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_CLASH_API_URL: &str = "https://api.clashofclans.com/v1";

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub mongodb_url: String,
    pub redis_url: String,
    pub clash_api_url: String,
    pub clash_tokens: Vec<String>,
    pub error_webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| BotError::Config(format!("{key} not set")))
        };

        let clash_tokens: Vec<String> = required("CLASH_TOKENS")?
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();

        if clash_tokens.is_empty() {
            return Err(BotError::Config("CLASH_TOKENS contains no tokens".to_string()));
        }

        Ok(Self {
            discord_token: required("DISCORD_TOKEN")?,
            mongodb_url: required("MONGODB_URL")?,
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            clash_api_url: lookup("CLASH_API_URL")
                .unwrap_or_else(|| DEFAULT_CLASH_API_URL.to_string()),
            clash_tokens,
            error_webhook_url: lookup("ERROR_WEBHOOK_URL").filter(|v| !v.is_empty()),
        })
    }
}
