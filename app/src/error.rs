use poise::serenity_prelude as serenity;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Discord API error: {0}")]
    Discord(#[from] serenity::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Clash of Clans API returned {status}: {reason}")]
    Api { status: StatusCode, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("BSON encoding error: {0}")]
    BsonEncode(#[from] mongodb::bson::ser::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("`{0}` is not a valid tag.")]
    InvalidTag(String),

    #[error("`{0}` is neither a guild id nor \"global\".")]
    InvalidTarget(String),

    #[error("You've reached the maximum of {limit} {what}.")]
    QuotaExceeded { what: &'static str, limit: usize },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Rejected(String),
}

impl BotError {
    /// Errors caused by the invoking user's input. These are echoed back but
    /// not reported to the error webhook.
    pub fn is_user_error(&self) -> bool {
        match self {
            Self::InvalidTag(_)
            | Self::InvalidTarget(_)
            | Self::QuotaExceeded { .. }
            | Self::NotFound(_)
            | Self::Rejected(_) => true,
            Self::Api { status, .. } => matches!(
                *status,
                StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::SERVICE_UNAVAILABLE
            ),
            _ => false,
        }
    }

    /// Message shown to the invoking user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Api { status, .. } if *status == StatusCode::NOT_FOUND => {
                "Nothing was found for that tag.".to_string()
            }
            Self::Api { status, .. } if *status == StatusCode::SERVICE_UNAVAILABLE => {
                "Clash of Clans is currently under maintenance.".to_string()
            }
            Self::Api { status, .. } if *status == StatusCode::FORBIDDEN => {
                "The clan's war log is private.".to_string()
            }
            e if e.is_user_error() => e.to_string(),
            _ => "Something went wrong while running this command.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
