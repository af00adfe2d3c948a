use std::cmp::Ordering;
use std::collections::HashMap;

use crate::coc::models::{ClanWar, WarState};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeagueMemberStats {
    pub tag: String,
    pub name: String,
    pub stars: u32,
    pub destruction: f64,
    pub attacks: u32,
    pub rounds: u32,
}

#[derive(Debug, Default)]
pub struct LeagueSummary {
    pub won: u32,
    pub lost: u32,
    pub tied: u32,
    pub stars: u32,
    pub destruction: f64,
    pub rounds_played: u32,
    pub members: Vec<LeagueMemberStats>,
}

/// Aggregates the clan's league wars into a season summary.
///
/// Wars the clan didn't take part in are ignored. Only ended wars count
/// towards the win/loss record; member stats include wars in progress.
pub fn summarize_league(clan_tag: &str, wars: impl IntoIterator<Item = ClanWar>) -> LeagueSummary {
    let mut summary = LeagueSummary::default();
    let mut members: HashMap<String, LeagueMemberStats> = HashMap::new();

    for war in wars.into_iter().filter_map(|w| w.oriented_to(clan_tag)) {
        if war.state == WarState::Preparation || war.state == WarState::NotInWar {
            continue;
        }

        summary.rounds_played += 1;
        summary.stars += war.clan.stars;
        summary.destruction += war.clan.destruction_percentage;

        if war.state == WarState::WarEnded {
            match compare_sides(&war) {
                Ordering::Greater => summary.won += 1,
                Ordering::Less => summary.lost += 1,
                Ordering::Equal => summary.tied += 1,
            }
        }

        for member in &war.clan.members {
            let stats = members
                .entry(member.tag.clone())
                .or_insert_with(|| LeagueMemberStats {
                    tag: member.tag.clone(),
                    ..Default::default()
                });
            stats.name.clone_from(&member.name);
            stats.rounds += 1;
            for attack in &member.attacks {
                stats.attacks += 1;
                stats.stars += attack.stars;
                stats.destruction += attack.destruction_percentage;
            }
        }
    }

    summary.members = members.into_values().collect();
    summary.members.sort_by(|a, b| {
        b.stars
            .cmp(&a.stars)
            .then_with(|| b.destruction.total_cmp(&a.destruction))
            .then_with(|| a.name.cmp(&b.name))
    });
    summary
}

fn compare_sides(war: &ClanWar) -> Ordering {
    war.clan
        .stars
        .cmp(&war.opponent.stars)
        .then_with(|| {
            war.clan
                .destruction_percentage
                .total_cmp(&war.opponent.destruction_percentage)
        })
}

pub fn format_leaderboard(members: &[LeagueMemberStats], limit: usize) -> String {
    members
        .iter()
        .take(limit)
        .enumerate()
        .map(|(i, m)| {
            format!(
                "`{:>2}` ⭐ `{:>3}` `{:>6.1}%` `{}/{}` {}",
                i + 1,
                m.stars,
                m.destruction,
                m.attacks,
                m.rounds,
                m.name
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coc::models::{WarAttack, WarClan, WarMember};

    fn side(tag: &str, stars: u32, destruction: f64, members: Vec<WarMember>) -> WarClan {
        WarClan {
            tag: tag.to_string(),
            name: tag.to_string(),
            stars,
            destruction_percentage: destruction,
            attacks: members.len() as u32,
            members,
        }
    }

    fn member(tag: &str, name: &str, stars: Option<u32>) -> WarMember {
        WarMember {
            tag: tag.to_string(),
            name: name.to_string(),
            map_position: 1,
            townhall_level: 15,
            attacks: stars
                .map(|s| WarAttack {
                    attacker_tag: tag.to_string(),
                    defender_tag: "#X".to_string(),
                    stars: s,
                    destruction_percentage: 100.0,
                    order: 1,
                })
                .into_iter()
                .collect(),
        }
    }

    fn war(state: WarState, clan: WarClan, opponent: WarClan) -> ClanWar {
        ClanWar {
            state,
            team_size: 15,
            attacks_per_member: Some(1),
            end_time: None,
            clan,
            opponent,
        }
    }

    #[test]
    fn counts_record_from_either_side() {
        let wars = vec![
            war(
                WarState::WarEnded,
                side("#2PP", 40, 95.0, vec![member("#A", "Alice", Some(3))]),
                side("#OTHER", 30, 80.0, vec![]),
            ),
            // The clan shows up as the opponent here and lost.
            war(
                WarState::WarEnded,
                side("#OTHER", 42, 97.0, vec![]),
                side("#2PP", 35, 85.0, vec![member("#A", "Alice", Some(2))]),
            ),
            war(
                WarState::InWar,
                side("#2PP", 10, 30.0, vec![member("#A", "Alice", None)]),
                side("#OTHER", 5, 20.0, vec![]),
            ),
            war(
                WarState::WarEnded,
                side("#X1", 1, 1.0, vec![]),
                side("#X2", 2, 2.0, vec![]),
            ),
        ];

        let summary = summarize_league("#2PP", wars);
        assert_eq!((summary.won, summary.lost, summary.tied), (1, 1, 0));
        assert_eq!(summary.rounds_played, 3);
        assert_eq!(summary.stars, 85);

        let alice = &summary.members[0];
        assert_eq!((alice.stars, alice.attacks, alice.rounds), (5, 2, 3));
    }

    #[test]
    fn ties_break_on_destruction() {
        let wars = vec![war(
            WarState::WarEnded,
            side("#2PP", 30, 90.0, vec![]),
            side("#OTHER", 30, 90.0, vec![]),
        )];

        let summary = summarize_league("#2PP", wars);
        assert_eq!(summary.tied, 1);
    }

    #[test]
    fn leaderboard_sorts_by_stars_then_destruction() {
        let wars = vec![war(
            WarState::WarEnded,
            side(
                "#2PP",
                6,
                100.0,
                vec![
                    member("#B", "Bob", Some(2)),
                    member("#A", "Alice", Some(3)),
                    member("#C", "Carol", None),
                ],
            ),
            side("#OTHER", 0, 0.0, vec![]),
        )];

        let summary = summarize_league("#2PP", wars);
        let names: Vec<_> = summary.members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["Alice", "Bob", "Carol"]);
        assert!(format_leaderboard(&summary.members, 2).lines().count() == 2);
    }
}
