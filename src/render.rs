use std::collections::HashMap;

use prettytable::{row, Table};

use crate::database::models::{Match, Team};
use crate::engine::bracket::{round_name, AdvancementProposal, BracketSlot};
use crate::engine::standings::{PlayoffRace, StandingRow};

/// Team names keyed by id, for display.
pub fn team_names(teams: &[Team]) -> HashMap<i32, String> {
    teams.iter().map(|t| (t.id, t.name.clone())).collect()
}

fn team_label(team: Option<i32>, names: &HashMap<i32, String>) -> String {
    match team {
        Some(id) => names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("Team {}", id)),
        None => "TBD".to_string(),
    }
}

pub fn standings_table(rows: &[StandingRow]) -> Table {
    let mut table = Table::new();
    table.set_titles(row![
        "#", "Team", "P", "W", "L", "Pts", "PA", "PD", "Left", "Zone"
    ]);
    for row in rows {
        table.add_row(row![
            row.rank,
            &row.team_name,
            row.played,
            row.wins,
            row.losses,
            row.points,
            row.points_against,
            format!("{:+}", row.point_differential),
            row.remaining,
            &row.zone.to_string()
        ]);
    }

    table
}

pub fn matches_table(matches: &[Match], names: &HashMap<i32, String>) -> Table {
    let mut table = Table::new();
    table.set_titles(row!["ID", "Week", "Group", "Team 1", "Team 2", "Score", "Status"]);
    for game in matches {
        table.add_row(row![
            game.id,
            game.week.map_or("-".to_string(), |w| w.to_string()),
            game.group_name.as_deref().unwrap_or("-"),
            team_label(game.team1_id, names),
            team_label(game.team2_id, names),
            format!("{}-{}", game.score_t1, game.score_t2),
            &game.status.to_string()
        ]);
    }

    table
}

pub fn races_table(races: &[PlayoffRace]) -> Table {
    let mut table = Table::new();
    table.set_titles(row!["Group", "#", "Team", "Pts", "Cutoff"]);
    for race in races {
        table.add_row(row![
            &race.group_name,
            race.rank,
            &race.team_name,
            race.points,
            race.cutoff
        ]);
    }

    table
}

pub fn bracket_table(slots: &[BracketSlot], names: &HashMap<i32, String>) -> Table {
    let mut table = Table::new();
    table.set_titles(row![
        "Round", "Pos", "Match", "Team 1", "Team 2", "Score", "Winner", "State", "Label"
    ]);
    for slot in slots {
        let game = slot.game.as_ref();
        table.add_row(row![
            round_name(slot.id.round),
            slot.id.position,
            game.map_or("-".to_string(), |g| g.id.to_string()),
            team_label(game.and_then(|g| g.team1_id), names),
            team_label(game.and_then(|g| g.team2_id), names),
            game.map_or("-".to_string(), |g| format!("{}-{}", g.score_t1, g.score_t2)),
            game.and_then(|g| g.winner_id)
                .map_or("-".to_string(), |id| team_label(Some(id), names)),
            &slot.state.to_string(),
            game.and_then(|g| g.bracket_label.as_deref()).unwrap_or("")
        ]);
    }

    table
}

pub fn proposals_table(proposals: &[AdvancementProposal], names: &HashMap<i32, String>) -> Table {
    let mut table = Table::new();
    table.set_titles(row!["Kind", "Team", "Target", "Side", "Reason"]);
    for proposal in proposals {
        table.add_row(row![
            &proposal.kind.to_string(),
            team_label(Some(proposal.team_id), names),
            &proposal.target.to_string(),
            &proposal.side.to_string(),
            &proposal.reason
        ]);
    }

    table
}
