use async_trait::async_trait;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::coc::models::{Clan, Player};
use crate::error::{BotError, Result};

const CLAN_PREFIX: &str = "CLAN:";
const PLAYER_PREFIX: &str = "PLAYER:";
const CUSTOM_ID_PREFIX: &str = "CMD-";

const DELETE_BATCH: usize = 500;

const ENTITY_TTL: Duration = Duration::from_secs(10 * 60);
const CUSTOM_ID_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Discord rejects component custom ids longer than this.
pub const MAX_CUSTOM_ID_LEN: usize = 100;

#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    /// Deletes every key starting with `prefix`, returning how many were removed.
    async fn delete_prefixed(&self, prefix: &str) -> Result<usize>;
}

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = client.get_connection_manager().await?;
        info!("Connected to Redis");
        Ok(Self { connection })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut connection = self.connection.clone();
        Ok(connection.get(key).await?)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut connection = self.connection.clone();
        Ok(redis::cmd("MGET").arg(keys).query_async(&mut connection).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut connection = self.connection.clone();
        let _: () = connection.set_ex(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn delete_prefixed(&self, prefix: &str) -> Result<usize> {
        let mut connection = self.connection.clone();
        let mut keys = Vec::new();
        {
            // SCAN walks the keyspace in steps instead of blocking Redis like KEYS.
            let mut iter = connection
                .scan_match::<_, String>(format!("{prefix}*"))
                .await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }
        // SCAN may return a key more than once.
        keys.sort_unstable();
        keys.dedup();

        let mut deleted = 0;
        for batch in keys.chunks(DELETE_BATCH) {
            let removed: usize = connection.del(batch).await?;
            deleted += removed;
        }
        Ok(deleted)
    }
}

/// Cached clan/player JSON and oversized component payloads.
///
/// Read helpers never fail: a cache-layer error reads as a miss.
#[derive(Clone)]
pub struct CacheService {
    store: Arc<dyn KeyValueStore>,
}

impl CacheService {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                debug!("Cache read for {} failed: {}", key, e);
                return None;
            }
        };
        serde_json::from_str(&raw).ok()
    }

    async fn read_many<T: DeserializeOwned>(&self, keys: Vec<String>) -> Vec<T> {
        match self.store.get_many(&keys).await {
            Ok(values) => values
                .into_iter()
                .flatten()
                .filter_map(|raw| serde_json::from_str(&raw).ok())
                .collect(),
            Err(e) => {
                debug!("Cache read for {} keys failed: {}", keys.len(), e);
                Vec::new()
            }
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let result = match serde_json::to_string(value) {
            Ok(raw) => self.store.set(key, &raw, ttl).await,
            Err(e) => Err(BotError::from(e)),
        };
        if let Err(e) = result {
            debug!("Cache write for {} failed: {}", key, e);
        }
    }

    pub async fn get_clan(&self, tag: &str) -> Option<Clan> {
        self.read(&format!("{CLAN_PREFIX}{tag}")).await
    }

    pub async fn get_player(&self, tag: &str) -> Option<Player> {
        self.read(&format!("{PLAYER_PREFIX}{tag}")).await
    }

    pub async fn get_clans(&self, tags: &[String]) -> Vec<Clan> {
        self.read_many(tags.iter().map(|t| format!("{CLAN_PREFIX}{t}")).collect())
            .await
    }

    pub async fn get_players(&self, tags: &[String]) -> Vec<Player> {
        self.read_many(tags.iter().map(|t| format!("{PLAYER_PREFIX}{t}")).collect())
            .await
    }

    pub async fn set_clan(&self, clan: &Clan) {
        self.write(&format!("{CLAN_PREFIX}{}", clan.tag), clan, ENTITY_TTL)
            .await;
    }

    pub async fn set_player(&self, player: &Player) {
        self.write(&format!("{PLAYER_PREFIX}{}", player.tag), player, ENTITY_TTL)
            .await;
    }

    /// Drops every cached clan and player.
    pub async fn flush(&self) -> Result<usize> {
        let clans = self.store.delete_prefixed(CLAN_PREFIX).await?;
        let players = self.store.delete_prefixed(PLAYER_PREFIX).await?;
        Ok(clans + players)
    }

    /// Returns a component custom id carrying `payload`.
    ///
    /// Payloads too long for Discord are stored in the cache and replaced by
    /// a generated key.
    pub async fn create_custom_id<T: Serialize>(&self, payload: &T) -> Result<String> {
        let raw = serde_json::to_string(payload)?;
        if raw.len() <= MAX_CUSTOM_ID_LEN {
            return Ok(raw);
        }

        let key = format!("{CUSTOM_ID_PREFIX}{:016x}", rand::thread_rng().gen::<u64>());
        self.store.set(&key, &raw, CUSTOM_ID_TTL).await?;
        Ok(key)
    }

    pub async fn get_custom_id<T: DeserializeOwned>(&self, custom_id: &str) -> Option<T> {
        if custom_id.starts_with(CUSTOM_ID_PREFIX) {
            self.read(custom_id).await
        } else {
            serde_json::from_str(custom_id).ok()
        }
    }
}
