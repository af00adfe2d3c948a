pub mod models;
pub mod tags;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{BotError, Result};
use models::{ApiErrorBody, Clan, ClanWar, ClanWarLeagueGroup, Player};
use tags::encode_tag;

const API_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the Clash of Clans REST API.
///
/// Requests rotate through the configured bearer tokens.
#[derive(Debug, Clone)]
pub struct ClashClient {
    client: Client,
    base_url: Arc<str>,
    tokens: Arc<[String]>,
    next_token: Arc<AtomicUsize>,
}

impl ClashClient {
    pub fn new(base_url: &str, tokens: Vec<String>) -> Result<Self> {
        if tokens.is_empty() {
            return Err(BotError::Config("at least one API token is required".to_string()));
        }

        Ok(Self {
            client: Client::builder().timeout(API_TIMEOUT).build()?,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            tokens: tokens.into(),
            next_token: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn token(&self) -> &str {
        let index = self.next_token.fetch_add(1, Ordering::Relaxed) % self.tokens.len();
        &self.tokens[index]
    }

    async fn request(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);
        Ok(self.client.get(url).bearer_auth(self.token()).send().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.request(path).await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let reason = response
            .json::<ApiErrorBody>()
            .await
            .map(|body| body.reason)
            .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown").to_string());

        Err(BotError::Api { status, reason })
    }

    pub async fn get_clan(&self, tag: &str) -> Result<Clan> {
        self.get(&format!("/clans/{}", encode_tag(tag))).await
    }

    pub async fn get_player(&self, tag: &str) -> Result<Player> {
        self.get(&format!("/players/{}", encode_tag(tag))).await
    }

    pub async fn get_current_war(&self, clan_tag: &str) -> Result<ClanWar> {
        self.get(&format!("/clans/{}/currentwar", encode_tag(clan_tag))).await
    }

    pub async fn get_league_group(&self, clan_tag: &str) -> Result<ClanWarLeagueGroup> {
        self.get(&format!("/clans/{}/currentwar/leaguegroup", encode_tag(clan_tag)))
            .await
    }

    pub async fn get_league_war(&self, war_tag: &str) -> Result<ClanWar> {
        self.get(&format!("/clanwarleagues/wars/{}", encode_tag(war_tag)))
            .await
    }

    /// Status code of the `locations` endpoint, used to detect maintenance.
    pub async fn locations_status(&self) -> Result<StatusCode> {
        Ok(self.request("/locations?limit=1").await?.status())
    }
}
