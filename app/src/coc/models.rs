use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clan {
    pub tag: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub clan_level: u32,
    #[serde(default)]
    pub clan_points: u32,
    #[serde(default)]
    pub members: u32,
    #[serde(default)]
    pub required_trophies: u32,
    #[serde(default)]
    pub war_wins: u32,
    #[serde(default)]
    pub war_losses: Option<u32>,
    #[serde(default)]
    pub war_ties: Option<u32>,
    #[serde(default)]
    pub war_win_streak: u32,
    #[serde(default)]
    pub is_war_log_public: bool,
    #[serde(default)]
    pub war_league: Option<NamedEntity>,
    #[serde(default)]
    pub location: Option<NamedEntity>,
    #[serde(default)]
    pub badge_urls: Option<BadgeUrls>,
    #[serde(default)]
    pub member_list: Vec<ClanMember>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClanMember {
    pub tag: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub exp_level: u32,
    #[serde(default)]
    pub trophies: u32,
    #[serde(default)]
    pub donations: u32,
    #[serde(default)]
    pub donations_received: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedEntity {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgeUrls {
    pub small: String,
    pub medium: String,
    pub large: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub tag: String,
    pub name: String,
    #[serde(default)]
    pub town_hall_level: u32,
    #[serde(default)]
    pub exp_level: u32,
    #[serde(default)]
    pub trophies: u32,
    #[serde(default)]
    pub best_trophies: u32,
    #[serde(default)]
    pub war_stars: u32,
    #[serde(default)]
    pub attack_wins: u32,
    #[serde(default)]
    pub defense_wins: u32,
    #[serde(default)]
    pub donations: u32,
    #[serde(default)]
    pub donations_received: u32,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub clan: Option<PlayerClan>,
    #[serde(default)]
    pub league: Option<NamedEntity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerClan {
    pub tag: String,
    pub name: String,
    #[serde(default)]
    pub clan_level: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WarState {
    NotInWar,
    Preparation,
    InWar,
    WarEnded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClanWar {
    pub state: WarState,
    #[serde(default)]
    pub team_size: u32,
    #[serde(default)]
    pub attacks_per_member: Option<u32>,
    #[serde(default)]
    pub end_time: Option<String>,
    pub clan: WarClan,
    pub opponent: WarClan,
}

impl ClanWar {
    /// Returns the war with `tag`'s side as `clan`, if `tag` took part.
    pub fn oriented_to(mut self, tag: &str) -> Option<Self> {
        if self.clan.tag == tag {
            Some(self)
        } else if self.opponent.tag == tag {
            std::mem::swap(&mut self.clan, &mut self.opponent);
            Some(self)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarClan {
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub stars: u32,
    #[serde(default)]
    pub destruction_percentage: f64,
    #[serde(default)]
    pub attacks: u32,
    #[serde(default)]
    pub members: Vec<WarMember>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarMember {
    pub tag: String,
    pub name: String,
    #[serde(default)]
    pub map_position: u32,
    #[serde(default)]
    pub townhall_level: u32,
    #[serde(default)]
    pub attacks: Vec<WarAttack>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarAttack {
    pub attacker_tag: String,
    pub defender_tag: String,
    pub stars: u32,
    pub destruction_percentage: f64,
    #[serde(default)]
    pub order: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClanWarLeagueGroup {
    pub state: String,
    #[serde(default)]
    pub season: String,
    #[serde(default)]
    pub clans: Vec<LeagueClan>,
    #[serde(default)]
    pub rounds: Vec<LeagueRound>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeagueClan {
    pub tag: String,
    pub name: String,
    #[serde(default)]
    pub clan_level: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeagueRound {
    pub war_tags: Vec<String>,
}

impl ClanWarLeagueGroup {
    /// War tags that have been scheduled; `#0` marks a round not drawn yet.
    pub fn scheduled_war_tags(&self) -> impl Iterator<Item = &str> {
        self.rounds
            .iter()
            .flat_map(|round| round.war_tags.iter())
            .map(String::as_str)
            .filter(|tag| *tag != "#0")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub reason: String,
    #[serde(default)]
    pub message: Option<String>,
}
