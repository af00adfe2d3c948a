use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType};
use mongodb::options::FullDocumentType;
use mongodb::{Collection, Database};
use parking_lot::RwLock;
use poise::serenity_prelude::{self as serenity, GuildId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{BotError, Result};

/// Well-known settings keys.
pub mod keys {
    pub const PREFIX: &str = "PREFIX";
    pub const COLOR: &str = "COLOR";
    pub const FAMILY_ROLE: &str = "FAMILY_ROLE";

    pub const ALL: &[&str] = &[PREFIX, COLOR, FAMILY_ROLE];
}

const GLOBAL: &str = "global";
const WATCH_MAX_AWAIT: Duration = Duration::from_millis(500);

/// Owner of a settings document: a single guild, or the bot as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingsTarget {
    Global,
    Guild(GuildId),
}

impl SettingsTarget {
    pub fn id(&self) -> String {
        match self {
            Self::Global => GLOBAL.to_string(),
            Self::Guild(id) => id.get().to_string(),
        }
    }
}

impl fmt::Display for SettingsTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

impl FromStr for SettingsTarget {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        if s == GLOBAL {
            return Ok(Self::Global);
        }

        match s.parse::<u64>() {
            Ok(id) if id != 0 => Ok(Self::Guild(GuildId::new(id))),
            _ => Err(BotError::InvalidTarget(s.to_string())),
        }
    }
}

impl From<GuildId> for SettingsTarget {
    fn from(id: GuildId) -> Self {
        Self::Guild(id)
    }
}

impl From<&serenity::Guild> for SettingsTarget {
    fn from(guild: &serenity::Guild) -> Self {
        Self::Guild(guild.id)
    }
}

/// An externally observed change to the backing store.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsChange {
    Replaced { target: SettingsTarget, values: Document },
    Removed { target: SettingsTarget },
}

/// Persistence behind [`Settings`].
#[async_trait]
pub trait SettingsStore: Send + Sync + 'static {
    async fn load_all(&self) -> Result<Vec<(SettingsTarget, Document)>>;
    async fn set(&self, target: SettingsTarget, key: &str, value: Bson) -> Result<()>;
    async fn delete(&self, target: SettingsTarget, key: &str) -> Result<()>;
    async fn clear(&self, target: SettingsTarget) -> Result<()>;
    async fn watch(&self) -> Result<BoxStream<'static, Result<SettingsChange>>>;
}

/// Settings documents keyed by target id in `_id`.
#[derive(Debug, Clone)]
pub struct MongoSettingsStore {
    collection: Collection<Document>,
}

impl MongoSettingsStore {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection("settings"),
        }
    }
}

/// Reads a target from a document `_id`, stored as a string or an integer.
fn target_from_id(id: &Bson) -> Option<SettingsTarget> {
    let id = match id {
        Bson::String(id) => id.clone(),
        Bson::Int64(id) => id.to_string(),
        Bson::Int32(id) => id.to_string(),
        _ => return None,
    };

    match id.parse() {
        Ok(target) => Some(target),
        Err(_) => {
            warn!("Ignoring settings document with invalid id {}", id);
            None
        }
    }
}

fn split_document(mut document: Document) -> Option<(SettingsTarget, Document)> {
    let target = target_from_id(&document.remove("_id")?)?;
    Some((target, document))
}

fn change_from_event(event: ChangeStreamEvent<Document>) -> Option<SettingsChange> {
    match event.operation_type {
        OperationType::Insert | OperationType::Update | OperationType::Replace => event
            .full_document
            .and_then(split_document)
            .map(|(target, values)| SettingsChange::Replaced { target, values }),
        OperationType::Delete => event
            .document_key
            .and_then(|key| key.get("_id").and_then(target_from_id))
            .map(|target| SettingsChange::Removed { target }),
        _ => None,
    }
}

#[async_trait]
impl SettingsStore for MongoSettingsStore {
    async fn load_all(&self) -> Result<Vec<(SettingsTarget, Document)>> {
        let documents: Vec<Document> = self.collection.find(doc! {}).await?.try_collect().await?;
        Ok(documents.into_iter().filter_map(split_document).collect())
    }

    async fn set(&self, target: SettingsTarget, key: &str, value: Bson) -> Result<()> {
        self.collection
            .update_one(doc! { "_id": target.id() }, doc! { "$set": { key: value } })
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn delete(&self, target: SettingsTarget, key: &str) -> Result<()> {
        self.collection
            .update_one(doc! { "_id": target.id() }, doc! { "$unset": { key: "" } })
            .await?;
        Ok(())
    }

    async fn clear(&self, target: SettingsTarget) -> Result<()> {
        self.collection.delete_one(doc! { "_id": target.id() }).await?;
        Ok(())
    }

    async fn watch(&self) -> Result<BoxStream<'static, Result<SettingsChange>>> {
        let stream = self
            .collection
            .watch()
            .full_document(FullDocumentType::UpdateLookup)
            .max_await_time(WATCH_MAX_AWAIT)
            .await?;

        Ok(stream
            .filter_map(|event| async move {
                match event {
                    Ok(event) => change_from_event(event).map(Ok),
                    Err(e) => Some(Err(BotError::from(e))),
                }
            })
            .boxed())
    }
}

/// Per-target key/value settings, cached in memory.
///
/// Writes update memory first and the store second. A failed store write is
/// logged and leaves memory ahead of the store until the next change event.
pub struct Settings {
    items: RwLock<HashMap<SettingsTarget, Document>>,
    store: Arc<dyn SettingsStore>,
}

impl Settings {
    pub async fn load(store: Arc<dyn SettingsStore>) -> Result<Self> {
        let items: HashMap<_, _> = store.load_all().await?.into_iter().collect();
        info!("Loaded settings for {} targets", items.len());

        Ok(Self {
            items: RwLock::new(items),
            store,
        })
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        target: impl Into<SettingsTarget>,
        key: &str,
        default: T,
    ) -> T {
        let target = target.into();
        let value = self
            .items
            .read()
            .get(&target)
            .and_then(|values| values.get(key).cloned());

        match value {
            Some(value) => bson::from_bson(value).unwrap_or_else(|e| {
                debug!("Setting {} for {} has an unexpected type: {}", key, target, e);
                default
            }),
            None => default,
        }
    }

    /// Like [`Settings::get`], but a guild without the key falls back to the
    /// global value before `default`.
    pub fn get_or_global<T: DeserializeOwned>(
        &self,
        target: impl Into<SettingsTarget>,
        key: &str,
        default: T,
    ) -> T {
        let global = self.get(SettingsTarget::Global, key, default);
        match target.into() {
            SettingsTarget::Global => global,
            target => self.get(target, key, global),
        }
    }

    /// Keys currently set for the target.
    pub fn entries(&self, target: impl Into<SettingsTarget>) -> Document {
        self.items
            .read()
            .get(&target.into())
            .cloned()
            .unwrap_or_default()
    }

    pub async fn set<T: Serialize>(
        &self,
        target: impl Into<SettingsTarget>,
        key: &str,
        value: T,
    ) -> Result<()> {
        let target = target.into();
        let value = bson::to_bson(&value)?;

        self.items
            .write()
            .entry(target)
            .or_default()
            .insert(key, value.clone());

        if let Err(e) = self.store.set(target, key, value).await {
            warn!("Failed to persist setting {} for {}: {}", key, target, e);
        }
        Ok(())
    }

    pub async fn delete(&self, target: impl Into<SettingsTarget>, key: &str) {
        let target = target.into();

        if let Some(values) = self.items.write().get_mut(&target) {
            values.remove(key);
        }

        if let Err(e) = self.store.delete(target, key).await {
            warn!("Failed to delete setting {} for {}: {}", key, target, e);
        }
    }

    pub async fn clear(&self, target: impl Into<SettingsTarget>) {
        let target = target.into();
        self.items.write().remove(&target);

        if let Err(e) = self.store.clear(target).await {
            warn!("Failed to clear settings for {}: {}", target, e);
        }
    }

    pub fn apply(&self, change: SettingsChange) {
        let mut items = self.items.write();
        match change {
            SettingsChange::Replaced { target, values } => {
                debug!("Settings for {} changed externally", target);
                items.insert(target, values);
            }
            SettingsChange::Removed { target } => {
                debug!("Settings for {} removed externally", target);
                items.remove(&target);
            }
        }
    }

    /// Applies store changes until the change stream ends or fails.
    pub async fn sync(&self) -> Result<()> {
        let mut changes = self.store.watch().await?;
        while let Some(change) = changes.next().await {
            self.apply(change?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory store recording what was persisted.
    #[derive(Default)]
    struct MemoryStore {
        documents: Mutex<HashMap<SettingsTarget, Document>>,
        changes: Mutex<Vec<SettingsChange>>,
        fail_writes: AtomicBool,
    }

    impl MemoryStore {
        fn check(&self) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(BotError::Config("store unavailable".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SettingsStore for MemoryStore {
        async fn load_all(&self) -> Result<Vec<(SettingsTarget, Document)>> {
            Ok(self.documents.lock().clone().into_iter().collect())
        }

        async fn set(&self, target: SettingsTarget, key: &str, value: Bson) -> Result<()> {
            self.check()?;
            self.documents.lock().entry(target).or_default().insert(key, value);
            Ok(())
        }

        async fn delete(&self, target: SettingsTarget, key: &str) -> Result<()> {
            self.check()?;
            if let Some(values) = self.documents.lock().get_mut(&target) {
                values.remove(key);
            }
            Ok(())
        }

        async fn clear(&self, target: SettingsTarget) -> Result<()> {
            self.check()?;
            self.documents.lock().remove(&target);
            Ok(())
        }

        async fn watch(&self) -> Result<BoxStream<'static, Result<SettingsChange>>> {
            let changes: Vec<_> = self.changes.lock().drain(..).map(Ok).collect();
            Ok(stream::iter(changes).boxed())
        }
    }

    fn guild(id: u64) -> SettingsTarget {
        SettingsTarget::Guild(GuildId::new(id))
    }

    async fn settings(store: &Arc<MemoryStore>) -> Settings {
        Settings::load(Arc::clone(store) as Arc<dyn SettingsStore>)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn set_then_get_until_deleted() {
        let store = Arc::new(MemoryStore::default());
        let settings = settings(&store).await;
        let guild_a = GuildId::new(1);

        settings.set(guild_a, keys::FAMILY_ROLE, "123").await.unwrap();
        assert_eq!(settings.get(guild_a, keys::FAMILY_ROLE, String::new()), "123");
        assert_eq!(
            store.documents.lock()[&guild(1)].get_str(keys::FAMILY_ROLE).unwrap(),
            "123"
        );

        settings.delete(guild_a, keys::FAMILY_ROLE).await;
        assert_eq!(settings.get(guild_a, keys::FAMILY_ROLE, "none".to_string()), "none");
        assert!(store.documents.lock()[&guild(1)].is_empty());
    }

    #[tokio::test]
    async fn clear_drops_every_key() {
        let store = Arc::new(MemoryStore::default());
        let settings = settings(&store).await;

        settings.set(guild(1), keys::PREFIX, "?").await.unwrap();
        settings.set(guild(1), keys::COLOR, 0xff00ffu32).await.unwrap();
        settings.set(guild(2), keys::PREFIX, "$").await.unwrap();
        settings.clear(guild(1)).await;

        assert_eq!(settings.get(guild(1), keys::PREFIX, "!".to_string()), "!");
        assert_eq!(settings.get(guild(1), keys::COLOR, 0u32), 0);
        assert_eq!(settings.get(guild(2), keys::PREFIX, "!".to_string()), "$");
        assert!(!store.documents.lock().contains_key(&guild(1)));
    }

    #[tokio::test]
    async fn mismatched_type_yields_default() {
        let store = Arc::new(MemoryStore::default());
        let settings = settings(&store).await;

        settings.set(SettingsTarget::Global, "LIMIT", "lots").await.unwrap();
        assert_eq!(settings.get(SettingsTarget::Global, "LIMIT", 5i64), 5);
    }

    #[tokio::test]
    async fn arrays_round_trip() {
        let store = Arc::new(MemoryStore::default());
        let settings = settings(&store).await;

        settings.set(guild(7), "CLANS", vec!["#2PP", "#8QU8J9LP"]).await.unwrap();
        let clans: Vec<String> = settings.get(guild(7), "CLANS", Vec::new());
        assert_eq!(clans, ["#2PP", "#8QU8J9LP"]);
    }

    #[tokio::test]
    async fn failed_store_write_keeps_memory_value() {
        let store = Arc::new(MemoryStore::default());
        let settings = settings(&store).await;
        store.fail_writes.store(true, Ordering::SeqCst);

        settings.set(guild(1), keys::PREFIX, "?").await.unwrap();
        assert_eq!(settings.get(guild(1), keys::PREFIX, "!".to_string()), "?");
        assert!(store.documents.lock().is_empty());
    }

    #[tokio::test]
    async fn loads_existing_documents() {
        let store = Arc::new(MemoryStore::default());
        store
            .documents
            .lock()
            .insert(guild(9), doc! { "PREFIX": "." });

        let settings = settings(&store).await;
        assert_eq!(settings.get(guild(9), keys::PREFIX, "!".to_string()), ".");
    }

    #[tokio::test]
    async fn sync_applies_external_changes() {
        let store = Arc::new(MemoryStore::default());
        let settings = settings(&store).await;
        settings.set(guild(2), keys::PREFIX, "?").await.unwrap();

        store.changes.lock().extend([
            SettingsChange::Replaced {
                target: guild(1),
                values: doc! { "COLOR": 42 },
            },
            SettingsChange::Removed { target: guild(2) },
        ]);
        settings.sync().await.unwrap();

        assert_eq!(settings.get(guild(1), keys::COLOR, 0i32), 42);
        assert_eq!(settings.get(guild(2), keys::PREFIX, "!".to_string()), "!");
    }

    #[test]
    fn target_parsing() {
        assert_eq!("global".parse::<SettingsTarget>().unwrap(), SettingsTarget::Global);
        assert_eq!("1234".parse::<SettingsTarget>().unwrap(), guild(1234));
        assert!(matches!(
            "0".parse::<SettingsTarget>(),
            Err(BotError::InvalidTarget(_))
        ));
        assert!(matches!(
            "my-guild".parse::<SettingsTarget>(),
            Err(BotError::InvalidTarget(_))
        ));
    }

    #[tokio::test]
    async fn guild_values_fall_back_to_global_then_default() {
        let store = Arc::new(MemoryStore::default());
        let settings = settings(&store).await;

        assert_eq!(settings.get_or_global(guild(1), keys::PREFIX, "!".to_string()), "!");

        settings.set(SettingsTarget::Global, keys::PREFIX, "$").await.unwrap();
        assert_eq!(settings.get_or_global(guild(1), keys::PREFIX, "!".to_string()), "$");

        settings.set(guild(1), keys::PREFIX, "?").await.unwrap();
        assert_eq!(settings.get_or_global(guild(1), keys::PREFIX, "!".to_string()), "?");
        assert_eq!(settings.get_or_global(guild(2), keys::PREFIX, "!".to_string()), "$");
        assert_eq!(
            settings.get_or_global(SettingsTarget::Global, keys::PREFIX, "!".to_string()),
            "$"
        );

        settings.set(SettingsTarget::Global, keys::COLOR, 0x00ff00u32).await.unwrap();
        assert_eq!(settings.get_or_global(guild(1), keys::COLOR, 0x5970c1u32), 0x00ff00);
    }

    fn event(document: Document) -> ChangeStreamEvent<Document> {
        bson::from_document(document).unwrap()
    }

    #[test]
    fn inserts_and_updates_replace_the_target() {
        for operation in ["insert", "update", "replace"] {
            let change = change_from_event(event(doc! {
                "_id": { "_data": "826500" },
                "operationType": operation,
                "documentKey": { "_id": "77" },
                "fullDocument": { "_id": "77", "PREFIX": "?" },
            }));
            assert_eq!(
                change,
                Some(SettingsChange::Replaced {
                    target: guild(77),
                    values: doc! { "PREFIX": "?" },
                })
            );
        }
    }

    #[test]
    fn deletes_remove_string_and_numeric_ids() {
        let change = change_from_event(event(doc! {
            "_id": { "_data": "826501" },
            "operationType": "delete",
            "documentKey": { "_id": "global" },
        }));
        assert_eq!(change, Some(SettingsChange::Removed { target: SettingsTarget::Global }));

        let change = change_from_event(event(doc! {
            "_id": { "_data": "826502" },
            "operationType": "delete",
            "documentKey": { "_id": 88i64 },
        }));
        assert_eq!(change, Some(SettingsChange::Removed { target: guild(88) }));
    }

    #[test]
    fn other_operations_are_ignored() {
        let change = change_from_event(event(doc! {
            "_id": { "_data": "826503" },
            "operationType": "drop",
        }));
        assert_eq!(change, None);

        // An update whose document vanished before the lookup carries no values.
        let change = change_from_event(event(doc! {
            "_id": { "_data": "826504" },
            "operationType": "update",
            "documentKey": { "_id": "77" },
        }));
        assert_eq!(change, None);
    }

    #[test]
    fn split_document_reads_target_from_id() {
        let (target, values) =
            split_document(doc! { "_id": "55", "PREFIX": "?" }).unwrap();
        assert_eq!(target, guild(55));
        assert_eq!(values, doc! { "PREFIX": "?" });

        assert!(split_document(doc! { "_id": "nope" }).is_none());
        assert!(split_document(doc! { "PREFIX": "?" }).is_none());

        let (target, _) = split_document(doc! { "_id": 55i64 }).unwrap();
        assert_eq!(target, guild(55));
    }
}
