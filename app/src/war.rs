use crate::coc::models::{ClanWar, WarMember};

/// A war member's progress in the current war.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberAttacks {
    pub map_position: u32,
    pub name: String,
    pub townhall_level: u32,
    pub attacks_used: u32,
    pub stars: u32,
    pub destruction: f64,
}

#[derive(Debug, Default)]
pub struct AttackSummary {
    pub attacked: Vec<MemberAttacks>,
    pub remaining: Vec<MemberAttacks>,
    pub attacks_per_member: u32,
}

fn member_attacks(member: &WarMember) -> MemberAttacks {
    MemberAttacks {
        map_position: member.map_position,
        name: member.name.clone(),
        townhall_level: member.townhall_level,
        attacks_used: member.attacks.len() as u32,
        stars: member.attacks.iter().map(|a| a.stars).sum(),
        destruction: member.attacks.iter().map(|a| a.destruction_percentage).sum(),
    }
}

/// Splits the clan's war roster into members who attacked and members with
/// attacks left, both in map-position order.
pub fn summarize_attacks(war: &ClanWar) -> AttackSummary {
    // Regular wars default to two attacks, league wars send one explicitly.
    let attacks_per_member = war.attacks_per_member.unwrap_or(2);

    let mut members: Vec<_> = war.clan.members.iter().map(member_attacks).collect();
    members.sort_by_key(|m| m.map_position);

    let mut summary = AttackSummary {
        attacks_per_member,
        ..Default::default()
    };

    for member in members {
        if member.attacks_used > 0 {
            summary.attacked.push(member.clone());
        }
        if member.attacks_used < attacks_per_member {
            summary.remaining.push(member);
        }
    }

    summary
}

pub fn format_attacked(members: &[MemberAttacks]) -> String {
    members
        .iter()
        .map(|m| {
            format!(
                "`{:>2}` ⭐ `{:>2}` `{:>5.1}%` {}",
                m.map_position, m.stars, m.destruction, m.name
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_remaining(members: &[MemberAttacks], attacks_per_member: u32) -> String {
    members
        .iter()
        .map(|m| {
            format!(
                "`{:>2}` TH{} {} ({} left)",
                m.map_position,
                m.townhall_level,
                m.name,
                attacks_per_member - m.attacks_used
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
