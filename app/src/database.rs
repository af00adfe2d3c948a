use futures::stream::TryStreamExt;
use mongodb::bson::{doc, DateTime, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BotError, Result};

pub const MAX_FREE_FLAGS: usize = 200;
pub const MAX_LINKS: usize = 25;

const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedUser {
    pub guild: String,
    pub tag: String,
    pub name: String,
    pub reason: String,
    pub user: String,
    pub created_at: DateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub tag: String,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedAccount {
    pub user: String,
    #[serde(default)]
    pub entries: Vec<LinkEntry>,
}

impl LinkedAccount {
    pub fn default_tag(&self) -> Option<&str> {
        self.entries.first().map(|e| e.tag.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClanAlias {
    pub guild: String,
    pub alias: String,
    pub tag: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patron {
    pub user: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub guilds: Vec<String>,
}

/// Outcome of adding an account to a user's links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Added,
    AlreadyLinked,
}

/// Rejects a new flag once a non-sponsor guild holds the free maximum.
/// Updating an existing flag is always allowed.
pub fn check_flag_quota(existing: usize, already_flagged: bool, sponsor: bool) -> Result<()> {
    if already_flagged || sponsor || existing < MAX_FREE_FLAGS {
        return Ok(());
    }
    Err(BotError::QuotaExceeded {
        what: "flags",
        limit: MAX_FREE_FLAGS,
    })
}

/// Explains why an account could not be pushed onto `entries`.
pub fn link_outcome(entries: &[LinkEntry], tag: &str) -> Result<LinkOutcome> {
    if entries.iter().any(|e| e.tag == tag) {
        return Ok(LinkOutcome::AlreadyLinked);
    }
    if entries.len() >= MAX_LINKS {
        return Err(BotError::QuotaExceeded {
            what: "linked accounts",
            limit: MAX_LINKS,
        });
    }
    Err(BotError::Rejected(
        "Your linked accounts changed while saving. Try again.".to_string(),
    ))
}

/// Matches the user's document only while `tag` is absent and a slot is free.
fn link_push_filter(user: &str, tag: &str) -> Document {
    let mut filter = doc! {
        "user": user,
        "entries.tag": { "$ne": tag },
    };
    filter.insert(format!("entries.{}", MAX_LINKS - 1), doc! { "$exists": false });
    filter
}

fn link_push_update(tag: &str, make_default: bool) -> Document {
    let entry = doc! { "tag": tag, "verified": false };
    if make_default {
        doc! { "$push": { "entries": { "$each": [entry], "$position": 0 } } }
    } else {
        doc! { "$push": { "entries": entry } }
    }
}

pub fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY,
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY,
        _ => false,
    }
}

fn index(name: &str, keys: Document, unique: bool) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().name(name.to_string()).unique(unique).build())
        .build()
}

/// Unique across documents; accounts without entries are left out of the index.
fn linked_tag_index() -> IndexModel {
    IndexModel::builder()
        .keys(doc! { "entries.tag": 1 })
        .options(
            IndexOptions::builder()
                .name("entries-tag".to_string())
                .unique(true)
                .partial_filter_expression(doc! { "entries.tag": { "$exists": true } })
                .build(),
        )
        .build()
}

#[derive(Debug, Clone)]
pub struct Db {
    database: Database,
    pub flags: Collection<FlaggedUser>,
    pub links: Collection<LinkedAccount>,
    pub aliases: Collection<ClanAlias>,
    pub patrons: Collection<Patron>,
}

impl Db {
    pub async fn connect(uri: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        let database = client
            .default_database()
            .ok_or_else(|| BotError::Config("no default database specified".to_string()))?;

        let db = Self::new(database);
        db.create_indexes().await?;
        info!("Connected to MongoDB");
        Ok(db)
    }

    pub fn new(database: Database) -> Self {
        Self {
            flags: database.collection("flags"),
            links: database.collection("links"),
            aliases: database.collection("aliases"),
            patrons: database.collection("patrons"),
            database,
        }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    async fn create_indexes(&self) -> Result<()> {
        self.flags
            .create_index(index("guild-tag", doc! { "guild": 1, "tag": 1 }, true))
            .await?;
        self.links
            .create_index(index("user", doc! { "user": 1 }, true))
            .await?;
        self.links.create_index(linked_tag_index()).await?;
        self.aliases
            .create_index(index("guild-alias", doc! { "guild": 1, "alias": 1 }, true))
            .await?;
        Ok(())
    }

    pub async fn is_sponsor(&self, guild: &str) -> Result<bool> {
        let count = self
            .patrons
            .count_documents(doc! { "active": true, "guilds": guild })
            .await?;
        Ok(count > 0)
    }

    pub async fn count_flags(&self, guild: &str) -> Result<usize> {
        Ok(self.flags.count_documents(doc! { "guild": guild }).await? as usize)
    }

    pub async fn find_flag(&self, guild: &str, tag: &str) -> Result<Option<FlaggedUser>> {
        Ok(self.flags.find_one(doc! { "guild": guild, "tag": tag }).await?)
    }

    pub async fn upsert_flag(&self, flag: &FlaggedUser) -> Result<()> {
        self.flags
            .replace_one(doc! { "guild": flag.guild.as_str(), "tag": flag.tag.as_str() }, flag)
            .upsert(true)
            .await?;
        Ok(())
    }

    /// Stores a new flag. The guild's flags are ordered by `_id`; a flag that
    /// landed past the free limit because of a concurrent insert is removed
    /// again, so non-sponsor guilds never keep more than the limit.
    pub async fn insert_flag(&self, flag: &FlaggedUser, sponsor: bool) -> Result<()> {
        let id = match self.flags.insert_one(flag).await {
            Ok(result) => result.inserted_id,
            Err(e) if is_duplicate_key(&e) => return self.upsert_flag(flag).await,
            Err(e) => return Err(e.into()),
        };
        if sponsor {
            return Ok(());
        }

        let ahead = self
            .flags
            .count_documents(doc! { "guild": flag.guild.as_str(), "_id": { "$lt": id.clone() } })
            .await? as usize;
        if let Err(e) = check_flag_quota(ahead, false, false) {
            debug!("Backing out flag {} in {}: {} flags ahead", flag.tag, flag.guild, ahead);
            self.flags.delete_one(doc! { "_id": id }).await?;
            return Err(e);
        }
        Ok(())
    }

    pub async fn delete_flag(&self, guild: &str, tag: &str) -> Result<bool> {
        let result = self
            .flags
            .delete_one(doc! { "guild": guild, "tag": tag })
            .await?;
        Ok(result.deleted_count > 0)
    }

    pub async fn list_flags(&self, guild: &str) -> Result<Vec<FlaggedUser>> {
        Ok(self
            .flags
            .find(doc! { "guild": guild })
            .sort(doc! { "createdAt": -1 })
            .await?
            .try_collect()
            .await?)
    }

    pub async fn find_links(&self, user: &str) -> Result<Option<LinkedAccount>> {
        Ok(self.links.find_one(doc! { "user": user }).await?)
    }

    pub async fn find_link_owner(&self, tag: &str) -> Result<Option<LinkedAccount>> {
        Ok(self.links.find_one(doc! { "entries.tag": tag }).await?)
    }

    /// Links `tag` to `user` in one conditional update. The unique
    /// `entries.tag` index keeps a tag on a single account.
    pub async fn add_link(&self, user: &str, tag: &str, make_default: bool) -> Result<LinkOutcome> {
        let pushed = self
            .links
            .update_one(link_push_filter(user, tag), link_push_update(tag, make_default))
            .upsert(true)
            .await;
        match pushed {
            Ok(_) => return Ok(LinkOutcome::Added),
            Err(e) if !is_duplicate_key(&e) => return Err(e.into()),
            Err(_) => {}
        }

        if let Some(owner) = self.find_link_owner(tag).await? {
            if owner.user != user {
                return Err(BotError::Rejected(format!(
                    "{tag} is already linked to another user."
                )));
            }
        }

        let entries = self
            .find_links(user)
            .await?
            .map(|account| account.entries)
            .unwrap_or_default();
        let outcome = link_outcome(&entries, tag)?;
        if make_default {
            self.promote_link(user, tag).await?;
        }
        Ok(outcome)
    }

    /// Moves an existing entry to the front, making it the default account.
    pub async fn promote_link(&self, user: &str, tag: &str) -> Result<()> {
        let pipeline = vec![doc! {
            "$set": {
                "entries": {
                    "$concatArrays": [
                        { "$filter": { "input": "$entries", "cond": { "$eq": ["$$this.tag", tag] } } },
                        { "$filter": { "input": "$entries", "cond": { "$ne": ["$$this.tag", tag] } } },
                    ]
                }
            }
        }];
        self.links.update_one(doc! { "user": user }, pipeline).await?;
        Ok(())
    }

    pub async fn remove_link(&self, user: &str, tag: &str) -> Result<bool> {
        let result = self
            .links
            .update_one(
                doc! { "user": user },
                doc! { "$pull": { "entries": { "tag": tag } } },
            )
            .await?;
        Ok(result.modified_count > 0)
    }

    pub async fn find_alias(&self, guild: &str, alias: &str) -> Result<Option<ClanAlias>> {
        Ok(self
            .aliases
            .find_one(doc! { "guild": guild, "alias": alias.to_lowercase() })
            .await?)
    }

    pub async fn upsert_alias(&self, alias: &ClanAlias) -> Result<()> {
        self.aliases
            .replace_one(doc! { "guild": alias.guild.as_str(), "alias": alias.alias.as_str() }, alias)
            .upsert(true)
            .await?;
        Ok(())
    }

    pub async fn delete_alias(&self, guild: &str, alias: &str) -> Result<bool> {
        let result = self
            .aliases
            .delete_one(doc! { "guild": guild, "alias": alias.to_lowercase() })
            .await?;
        Ok(result.deleted_count > 0)
    }

    pub async fn list_aliases(&self, guild: &str) -> Result<Vec<ClanAlias>> {
        Ok(self
            .aliases
            .find(doc! { "guild": guild })
            .sort(doc! { "alias": 1 })
            .await?
            .try_collect()
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(tags: &[&str]) -> Vec<LinkEntry> {
        tags.iter()
            .map(|t| LinkEntry {
                tag: t.to_string(),
                verified: false,
            })
            .collect()
    }

    #[test]
    fn flag_quota_blocks_free_guilds_at_the_limit() {
        assert!(check_flag_quota(MAX_FREE_FLAGS - 1, false, false).is_ok());
        assert!(matches!(
            check_flag_quota(MAX_FREE_FLAGS, false, false),
            Err(BotError::QuotaExceeded { limit: MAX_FREE_FLAGS, .. })
        ));
    }

    #[test]
    fn flag_quota_allows_updates_and_sponsors() {
        assert!(check_flag_quota(MAX_FREE_FLAGS, true, false).is_ok());
        assert!(check_flag_quota(MAX_FREE_FLAGS * 3, false, true).is_ok());
    }

    #[test]
    fn flag_count_never_exceeds_free_limit() {
        let mut count = 0;
        for _ in 0..MAX_FREE_FLAGS + 50 {
            if check_flag_quota(count, false, false).is_ok() {
                count += 1;
            }
        }
        assert_eq!(count, MAX_FREE_FLAGS);
    }

    #[test]
    fn concurrent_flags_past_the_limit_are_backed_out() {
        // Two inserts race at 199 stored flags; each counts the flags ordered before it.
        let kept = (MAX_FREE_FLAGS - 1..MAX_FREE_FLAGS + 1)
            .filter(|ahead| check_flag_quota(*ahead, false, false).is_ok())
            .count();
        assert_eq!(kept, 1);
    }

    #[test]
    fn link_push_requires_a_free_slot_and_a_new_tag() {
        let filter = link_push_filter("1", "#A");
        assert_eq!(filter.get_str("user").unwrap(), "1");
        assert_eq!(
            filter.get_document("entries.tag").unwrap(),
            &doc! { "$ne": "#A" }
        );
        assert_eq!(
            filter.get_document(format!("entries.{}", MAX_LINKS - 1)).unwrap(),
            &doc! { "$exists": false }
        );
    }

    #[test]
    fn default_links_are_pushed_to_the_front() {
        let update = link_push_update("#A", true);
        let push = update.get_document("$push").unwrap().get_document("entries").unwrap();
        assert_eq!(push.get_i32("$position").unwrap(), 0);

        let update = link_push_update("#B", false);
        let entry = update.get_document("$push").unwrap().get_document("entries").unwrap();
        assert_eq!(entry.get_str("tag").unwrap(), "#B");
        assert!(!entry.get_bool("verified").unwrap());
    }

    #[test]
    fn rejected_pushes_are_explained() {
        assert_eq!(
            link_outcome(&entries(&["#A", "#B"]), "#B").unwrap(),
            LinkOutcome::AlreadyLinked
        );

        let full: Vec<String> = (0..MAX_LINKS).map(|i| format!("#P{i}")).collect();
        let full: Vec<&str> = full.iter().map(String::as_str).collect();
        assert!(matches!(
            link_outcome(&entries(&full), "#NEW"),
            Err(BotError::QuotaExceeded { limit: MAX_LINKS, .. })
        ));
        // Re-linking an existing account still works at the limit.
        assert_eq!(
            link_outcome(&entries(&full), "#P3").unwrap(),
            LinkOutcome::AlreadyLinked
        );
        assert!(matches!(
            link_outcome(&entries(&["#A"]), "#C"),
            Err(BotError::Rejected(_))
        ));
    }

    async fn live_db() -> Option<Db> {
        let uri = std::env::var("MONGODB_TEST_URI").ok()?;
        let client = Client::with_uri_str(&uri).await.ok()?;
        let name = format!("clashperk_test_{}", rand::random::<u32>());
        let db = Db::new(client.database(&name));
        db.create_indexes().await.ok()?;
        Some(db)
    }

    fn flag(tag: String) -> FlaggedUser {
        FlaggedUser {
            guild: "1".to_string(),
            name: tag.clone(),
            tag,
            reason: "test".to_string(),
            user: "2".to_string(),
            created_at: DateTime::now(),
        }
    }

    #[tokio::test]
    #[ignore = "needs MONGODB_TEST_URI"]
    async fn parallel_flags_stop_at_the_free_limit() {
        let Some(db) = live_db().await else { return };
        for i in 0..MAX_FREE_FLAGS - 1 {
            db.insert_flag(&flag(format!("#OLD{i}")), false).await.unwrap();
        }

        let racers = (0..8).map(|i| {
            let db = &db;
            async move { db.insert_flag(&flag(format!("#NEW{i}")), false).await }
        });
        let results = futures::future::join_all(racers).await;

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(db.count_flags("1").await.unwrap(), MAX_FREE_FLAGS);
        db.database().drop().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs MONGODB_TEST_URI"]
    async fn a_tag_is_linked_to_one_user() {
        let Some(db) = live_db().await else { return };

        let racers = ["10", "11", "12"].map(|user| {
            let db = &db;
            async move { db.add_link(user, "#SHARED", false).await }
        });
        let results = futures::future::join_all(racers).await;
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

        let owner = db.find_link_owner("#SHARED").await.unwrap().unwrap();
        assert_eq!(owner.entries.len(), 1);
        assert_eq!(
            db.add_link(&owner.user, "#SHARED", true).await.unwrap(),
            LinkOutcome::AlreadyLinked
        );

        for i in 0..MAX_LINKS + 3 {
            let _ = db.add_link("20", &format!("#P{i}"), false).await;
        }
        assert_eq!(db.find_links("20").await.unwrap().unwrap().entries.len(), MAX_LINKS);

        db.add_link("20", "#P7", true).await.unwrap();
        let account = db.find_links("20").await.unwrap().unwrap();
        assert_eq!(account.default_tag(), Some("#P7"));
        assert_eq!(account.entries.len(), MAX_LINKS);
        db.database().drop().await.unwrap();
    }
}
