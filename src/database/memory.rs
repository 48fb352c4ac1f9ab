use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::models::{
    BracketPatch, MapResult, Match, MatchFilter, MatchOutcome, MatchType, NewBracketMatch, Side,
    Team,
};
use super::{BracketDatabase, MatchDatabase, TeamDatabase};
use crate::EngineError;

/// Every record the engine reads, as plain data.
///
/// Used to load and store the in-memory database as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub teams: Vec<Team>,
    #[serde(default)]
    pub matches: Vec<Match>,
    #[serde(default)]
    pub maps: Vec<MapResult>,
}

/// A database held in process memory.
///
/// Behaves like [`super::PgDatabase`], including the conditional bracket writes, so the engine
/// can be exercised without Postgres.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    state: RwLock<Snapshot>,
}

impl MemoryDatabase {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }

    /// A copy of everything currently stored.
    pub async fn snapshot(&self) -> Snapshot {
        self.state.read().await.clone()
    }

    pub async fn insert_team(&self, team: Team) {
        self.state.write().await.teams.push(team);
    }

    /// Inserts a match as-is. Ids are the caller's responsibility.
    pub async fn insert_match(&self, game: Match) {
        self.state.write().await.matches.push(game);
    }
}

fn playoff_slot(game: &Match, round: i32, position: i32) -> bool {
    game.match_type == MatchType::Playoff
        && game.playoff_round == Some(round)
        && game.bracket_pos == Some(position)
}

fn next_match_id(matches: &[Match]) -> i32 {
    matches.iter().map(|m| m.id).max().unwrap_or(0) + 1
}

impl TeamDatabase for MemoryDatabase {
    async fn list_teams(&self, group: Option<&str>) -> Result<Vec<Team>, EngineError> {
        let state = self.state.read().await;
        let mut teams: Vec<Team> = state
            .teams
            .iter()
            .filter(|t| group.map_or(true, |g| t.group_name.eq_ignore_ascii_case(g)))
            .cloned()
            .collect();
        teams.sort_by_key(|t| t.id);

        Ok(teams)
    }
}

impl MatchDatabase for MemoryDatabase {
    async fn get_match(&self, match_id: i32) -> Result<Option<Match>, EngineError> {
        let state = self.state.read().await;
        Ok(state.matches.iter().find(|m| m.id == match_id).cloned())
    }

    async fn list_matches(&self, filter: &MatchFilter) -> Result<Vec<Match>, EngineError> {
        let state = self.state.read().await;
        let mut matches: Vec<Match> = state
            .matches
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        // Same ordering as the Postgres query, where NULL rounds sort first.
        matches.sort_by_key(|m| (m.playoff_round, m.bracket_pos, m.id));

        Ok(matches)
    }

    async fn list_maps(&self, match_id: i32) -> Result<Vec<MapResult>, EngineError> {
        let state = self.state.read().await;
        let mut maps: Vec<MapResult> = state
            .maps
            .iter()
            .filter(|m| m.match_id == match_id)
            .cloned()
            .collect();
        maps.sort_by_key(|m| m.map_index);

        Ok(maps)
    }

    async fn upsert_map(&self, map: &MapResult) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        let existing = state
            .maps
            .iter()
            .position(|m| m.match_id == map.match_id && m.map_index == map.map_index);
        match existing {
            Some(index) => state.maps[index] = map.clone(),
            None => state.maps.push(map.clone()),
        }

        Ok(())
    }

    async fn clear_maps(&self, match_id: i32) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        state.maps.retain(|m| m.match_id != match_id);

        Ok(())
    }

    async fn save_match_outcome(
        &self,
        match_id: i32,
        outcome: &MatchOutcome,
    ) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if let Some(game) = state.matches.iter_mut().find(|m| m.id == match_id) {
            game.score_t1 = outcome.score_t1;
            game.score_t2 = outcome.score_t2;
            game.winner_id = outcome.winner_id;
            game.maps_played = outcome.maps_played;
            game.status = outcome.status;
            game.is_forfeit = outcome.is_forfeit;
        }

        Ok(())
    }
}

impl BracketDatabase for MemoryDatabase {
    async fn get_bracket_match(
        &self,
        round: i32,
        position: i32,
    ) -> Result<Option<Match>, EngineError> {
        let state = self.state.read().await;
        Ok(state
            .matches
            .iter()
            .find(|m| playoff_slot(m, round, position))
            .cloned())
    }

    async fn create_bracket_match(&self, new: &NewBracketMatch) -> Result<bool, EngineError> {
        let mut state = self.state.write().await;
        if state
            .matches
            .iter()
            .any(|m| playoff_slot(m, new.round, new.position))
        {
            return Ok(false);
        }

        let id = next_match_id(&state.matches);
        state.matches.push(Match {
            id,
            team1_id: new.team1_id,
            team2_id: new.team2_id,
            match_type: MatchType::Playoff,
            format: new.format.clone(),
            playoff_round: Some(new.round),
            bracket_pos: Some(new.position),
            bracket_label: new.bracket_label.clone(),
            ..Default::default()
        });

        Ok(true)
    }

    async fn upsert_bracket_match(
        &self,
        round: i32,
        position: i32,
        patch: &BracketPatch,
    ) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        let existing = state
            .matches
            .iter()
            .position(|m| playoff_slot(m, round, position));
        match existing {
            Some(index) => {
                let game = &mut state.matches[index];
                game.team1_id = patch.team1_id;
                game.team2_id = patch.team2_id;
                game.format = patch.format.clone();
                game.bracket_label = patch.bracket_label.clone();
            }
            None => {
                let id = next_match_id(&state.matches);
                state.matches.push(Match {
                    id,
                    team1_id: patch.team1_id,
                    team2_id: patch.team2_id,
                    match_type: MatchType::Playoff,
                    format: patch.format.clone(),
                    playoff_round: Some(round),
                    bracket_pos: Some(position),
                    bracket_label: patch.bracket_label.clone(),
                    ..Default::default()
                });
            }
        }

        Ok(())
    }

    async fn fill_slot_if_empty(
        &self,
        round: i32,
        position: i32,
        side: Side,
        team_id: i32,
    ) -> Result<bool, EngineError> {
        let mut state = self.state.write().await;
        let Some(game) = state
            .matches
            .iter_mut()
            .find(|m| playoff_slot(m, round, position))
        else {
            return Ok(false);
        };

        if game.team(side).is_some() || game.team(side.other()) == Some(team_id) {
            return Ok(false);
        }

        match side {
            Side::Team1 => game.team1_id = Some(team_id),
            Side::Team2 => game.team2_id = Some(team_id),
        }

        Ok(true)
    }

    async fn set_slot_team(
        &self,
        match_id: i32,
        side: Side,
        team_id: Option<i32>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if let Some(game) = state.matches.iter_mut().find(|m| m.id == match_id) {
            match side {
                Side::Team1 => game.team1_id = team_id,
                Side::Team2 => game.team2_id = team_id,
            }
        }

        Ok(())
    }
}
