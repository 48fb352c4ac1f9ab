use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use strum::Display;
use tracing::debug;

use super::bracket::{SeedAssignment, ROUND_SLOTS};
use super::Engine;
use crate::database::models::{MapResult, Match, MatchFilter, MatchStatus, Team};
use crate::database::Database;
use crate::EngineError;

/// Points for a strict win.
pub const WIN_POINTS: i32 = 15;
/// A team that does not win keeps its own round count, up to this cap.
pub const LOSS_POINTS_CAP: i32 = 12;
/// Number of teams per group that reach the playoffs.
pub const PLAYOFF_SPOTS: usize = 6;
/// Number of teams per group seeded straight into round 2.
pub const BYE_SPOTS: usize = 2;

/// Where a team currently sits relative to the playoff cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Bye,
    Playoffs,
    Contending,
    Eliminated,
}

/// One team's line in its group table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StandingRow {
    pub team_id: i32,
    pub team_name: String,
    pub group_name: String,
    /// 1-based position inside the group.
    pub rank: usize,
    pub played: i32,
    pub wins: i32,
    pub losses: i32,
    pub points: i32,
    pub points_against: i32,
    pub point_differential: i32,
    pub remaining: i32,
    pub eliminated: bool,
    pub zone: Zone,
}

impl StandingRow {
    fn new(team: &Team) -> Self {
        Self {
            team_id: team.id,
            team_name: team.name.clone(),
            group_name: team.group_name.clone(),
            rank: 0,
            played: 0,
            wins: 0,
            losses: 0,
            points: 0,
            points_against: 0,
            point_differential: 0,
            remaining: 0,
            eliminated: false,
            zone: Zone::Contending,
        }
    }

    fn record(&mut self, own: i32, opponent: i32) {
        self.played += 1;
        self.points += match_points(own, opponent);
        self.points_against += opponent;
        self.point_differential += own - opponent;
        if own > opponent {
            self.wins += 1;
        } else if own < opponent {
            self.losses += 1;
        }
    }
}

/// Group tables keyed by group label, each ranked best first.
pub type Standings = BTreeMap<String, Vec<StandingRow>>;

/// A team outside the playoff spots that can still climb into them with its last match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayoffRace {
    pub group_name: String,
    pub team_id: i32,
    pub team_name: String,
    pub rank: usize,
    pub points: i32,
    /// Points of the team currently holding the last playoff spot.
    pub cutoff: i32,
}

/// The points a team earns from one played match.
pub fn match_points(own: i32, opponent: i32) -> i32 {
    if own > opponent {
        WIN_POINTS
    } else {
        own.min(LOSS_POINTS_CAP)
    }
}

/// The score used for standings: summed map rounds when maps exist, otherwise the stored score.
pub fn match_scores(game: &Match, maps: &[MapResult]) -> (i32, i32) {
    if maps.is_empty() {
        return (game.score_t1, game.score_t2);
    }

    maps.iter().fold((0, 0), |(t1, t2), map| {
        (t1 + map.team1_rounds, t2 + map.team2_rounds)
    })
}

/// Whether a match counts as played for the standings.
pub fn is_played(game: &Match, maps: &[MapResult]) -> bool {
    let (t1, t2) = match_scores(game, maps);

    game.status == MatchStatus::Completed
        || game.score_t1 + game.score_t2 > 0
        || t1 + t2 > 0
        || game.maps_played > 0
        || game.is_forfeit
}

/// A team is out once even winning every remaining match would not reach the last playoff spot.
pub fn is_eliminated(points: i32, remaining: i32, cutoff: i32) -> bool {
    points + remaining * WIN_POINTS < cutoff
}

/// Builds the group tables from scratch.
///
/// `teams` may come in any order; ties that survive points and point differential keep team id
/// order. Matches involving an unknown or excluded team are ignored.
pub fn compute_standings(
    teams: &[Team],
    matches: &[Match],
    maps: &HashMap<i32, Vec<MapResult>>,
    excluded: &[String],
) -> Standings {
    let is_excluded = |name: &str| excluded.iter().any(|e| e.eq_ignore_ascii_case(name));

    let mut teams: Vec<&Team> = teams.iter().filter(|t| !is_excluded(&t.name)).collect();
    teams.sort_by_key(|t| t.id);

    let mut rows: HashMap<i32, StandingRow> =
        teams.iter().map(|t| (t.id, StandingRow::new(t))).collect();

    for game in matches {
        let (Some(team1), Some(team2)) = (game.team1_id, game.team2_id) else {
            continue;
        };
        if !rows.contains_key(&team1) || !rows.contains_key(&team2) {
            debug!("Skipping match {} with a team outside the standings", game.id);
            continue;
        }

        let game_maps = maps.get(&game.id).map(Vec::as_slice).unwrap_or_default();
        if !is_played(game, game_maps) {
            for team in [team1, team2] {
                if let Some(row) = rows.get_mut(&team) {
                    row.remaining += 1;
                }
            }
            continue;
        }

        let (score1, score2) = match_scores(game, game_maps);
        if let Some(row) = rows.get_mut(&team1) {
            row.record(score1, score2);
        }
        if let Some(row) = rows.get_mut(&team2) {
            row.record(score2, score1);
        }
    }

    let mut standings = Standings::new();
    for team in teams {
        if let Some(row) = rows.remove(&team.id) {
            standings
                .entry(team.group_name.clone())
                .or_default()
                .push(row);
        }
    }

    for table in standings.values_mut() {
        // Stable, so equal teams stay in id order.
        table.sort_by(|a, b| {
            b.points
                .cmp(&a.points)
                .then(b.point_differential.cmp(&a.point_differential))
        });

        let cutoff = table
            .get(PLAYOFF_SPOTS - 1)
            .map(|row| row.points)
            .unwrap_or(0);

        for (index, row) in table.iter_mut().enumerate() {
            row.rank = index + 1;
            row.eliminated = is_eliminated(row.points, row.remaining, cutoff);
            row.zone = if row.rank <= BYE_SPOTS {
                Zone::Bye
            } else if row.rank <= PLAYOFF_SPOTS {
                Zone::Playoffs
            } else if row.eliminated {
                Zone::Eliminated
            } else {
                Zone::Contending
            };
        }
    }

    standings
}

/// Teams outside the playoff spots with one match left that would still qualify by winning it.
pub fn playoff_races(standings: &Standings) -> Vec<PlayoffRace> {
    let mut races = Vec::new();

    for (group, table) in standings {
        let cutoff = table
            .get(PLAYOFF_SPOTS - 1)
            .map(|row| row.points)
            .unwrap_or(0);

        races.extend(
            table
                .iter()
                .filter(|row| row.rank > PLAYOFF_SPOTS && row.remaining == 1)
                .filter(|row| row.points + WIN_POINTS >= cutoff)
                .map(|row| PlayoffRace {
                    group_name: group.clone(),
                    team_id: row.team_id,
                    team_name: row.team_name.clone(),
                    rank: row.rank,
                    points: row.points,
                    cutoff,
                }),
        );
    }

    races
}

/// Round-2 seeds for every group's top two, group winners first within each group.
pub fn bye_seeds(standings: &Standings) -> Vec<SeedAssignment> {
    let capacity = ROUND_SLOTS[1] as usize;

    standings
        .values()
        .flat_map(|table| table.iter().take(BYE_SPOTS))
        .take(capacity)
        .zip(1..)
        .map(|(row, position)| SeedAssignment {
            position,
            team_id: row.team_id,
        })
        .collect()
}

impl<DB> Engine<DB>
where
    DB: Database,
{
    /// Recomputes the group tables from the persisted regular-season matches.
    ///
    /// Every group is always computed, so a group's table is the same whether or not it was
    /// asked for alone. The filter only decides which tables are returned.
    pub async fn get_standings(&self, group: Option<&str>) -> Result<Standings, EngineError> {
        let teams = self.database.list_teams(None).await?;
        let matches = self.database.list_matches(&MatchFilter::regular()).await?;
        let maps = self.maps_by_match(&matches).await?;

        let mut standings =
            compute_standings(&teams, &matches, &maps, &self.settings.excluded_teams);
        if let Some(group) = group {
            standings.retain(|label, _| label.eq_ignore_ascii_case(group));
        }

        Ok(standings)
    }
}
