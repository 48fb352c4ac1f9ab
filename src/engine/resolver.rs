use anyhow::anyhow;
use tracing::{info, warn};

use super::bracket::SlotId;
use super::Engine;
use crate::database::models::{MapResult, Match, MatchOutcome, MatchStatus, MatchType, Side};
use crate::database::Database;
use crate::utils::error::CommonError;
use crate::EngineError;

/// The score written for the winner of a forfeited match. The loser gets 0.
pub const FORFEIT_SCORE: i32 = 13;

/// Checks that every map winner is one of the match's two teams.
pub fn validate_maps(game: &Match, maps: &[MapResult]) -> Result<(), EngineError> {
    for map in maps {
        if map.match_id != game.id {
            return Err(anyhow!(
                "Map {} belongs to match {}, not to match {}",
                map.map_index,
                map.match_id,
                game.id
            ));
        }
        if let Some(winner) = map.winner_id {
            if !game.has_team(winner) {
                return Err(CommonError::TeamNotInMatch {
                    match_id: game.id,
                    team_id: winner,
                }
                .into());
            }
        }
    }

    Ok(())
}

/// Computes the authoritative outcome of a match from its maps.
///
/// Returns `None` when no map has been recorded yet, in which case the stored score stands.
/// Otherwise the maps fully replace whatever aggregate score the match carried before.
pub fn resolve_outcome(game: &Match, maps: &[MapResult]) -> Result<Option<MatchOutcome>, EngineError> {
    if maps.is_empty() {
        return Ok(None);
    }
    validate_maps(game, maps)?;

    let wins = |team: Option<i32>| {
        maps.iter()
            .filter(|m| m.winner_id.is_some() && m.winner_id == team)
            .count() as i32
    };
    let score_t1 = wins(game.team1_id);
    let score_t2 = wins(game.team2_id);

    let winner_id = if score_t1 > score_t2 {
        game.team1_id
    } else if score_t2 > score_t1 {
        game.team2_id
    } else {
        None
    };

    Ok(Some(MatchOutcome {
        score_t1,
        score_t2,
        winner_id,
        maps_played: maps.len() as i32,
        status: MatchStatus::Completed,
        is_forfeit: false,
    }))
}

/// The canonical outcome of a match decided by forfeit.
pub fn forfeit_outcome(game: &Match, winner_id: i32) -> Result<MatchOutcome, EngineError> {
    let side = game.side_of(winner_id).ok_or(CommonError::TeamNotInMatch {
        match_id: game.id,
        team_id: winner_id,
    })?;

    let (score_t1, score_t2) = match side {
        Side::Team1 => (FORFEIT_SCORE, 0),
        Side::Team2 => (0, FORFEIT_SCORE),
    };

    Ok(MatchOutcome {
        score_t1,
        score_t2,
        winner_id: Some(winner_id),
        maps_played: 0,
        status: MatchStatus::Completed,
        is_forfeit: true,
    })
}

impl<DB> Engine<DB>
where
    DB: Database,
{
    async fn load_match(&self, match_id: i32) -> Result<Match, EngineError> {
        self.database
            .get_match(match_id)
            .await?
            .ok_or(CommonError::MatchNotExists(match_id).into())
    }

    /// Recomputes a match's score from its maps and persists it.
    ///
    /// A playoff match whose winner changes as a result is immediately propagated into the next
    /// bracket round. Returns `None` if the match has no maps yet.
    pub async fn resolve_match(&self, match_id: i32) -> Result<Option<MatchOutcome>, EngineError> {
        let game = self.load_match(match_id).await?;
        let maps = self.database.list_maps(match_id).await?;

        let Some(outcome) = resolve_outcome(&game, &maps)? else {
            return Ok(None);
        };

        self.database.save_match_outcome(match_id, &outcome).await?;
        info!(
            "Resolved match {}: {}-{} over {} map(s), winner {:?}",
            match_id, outcome.score_t1, outcome.score_t2, outcome.maps_played, outcome.winner_id
        );

        if outcome.winner_id.is_none() {
            warn!("Match {} has maps but no map majority", match_id);
        }

        self.signal_bracket(&game, &outcome).await?;

        Ok(Some(outcome))
    }

    /// Saves per-map results for a match and resolves it.
    ///
    /// Every map is validated before anything is written, so a malformed map leaves the stored
    /// maps untouched.
    pub async fn save_maps(
        &self,
        match_id: i32,
        maps: &[MapResult],
    ) -> Result<Option<MatchOutcome>, EngineError> {
        let game = self.load_match(match_id).await?;
        validate_maps(&game, maps)?;

        for map in maps {
            self.database.upsert_map(map).await?;
        }

        self.resolve_match(match_id).await
    }

    /// Records a match-level forfeit, bypassing per-map results entirely.
    ///
    /// Any maps stored for the match are removed since the forfeit replaces them.
    pub async fn record_forfeit(
        &self,
        match_id: i32,
        winner_id: i32,
    ) -> Result<MatchOutcome, EngineError> {
        let game = self.load_match(match_id).await?;
        let outcome = forfeit_outcome(&game, winner_id)?;

        self.database.clear_maps(match_id).await?;
        self.database.save_match_outcome(match_id, &outcome).await?;
        info!("Recorded forfeit in match {}, winner {}", match_id, winner_id);

        self.signal_bracket(&game, &outcome).await?;

        Ok(outcome)
    }

    /// Propagates a newly established playoff winner into the next round.
    async fn signal_bracket(&self, before: &Match, outcome: &MatchOutcome) -> Result<(), EngineError> {
        if before.match_type != MatchType::Playoff {
            return Ok(());
        }
        let Some(winner_id) = outcome.winner_id else {
            return Ok(());
        };
        if before.winner_id == Some(winner_id) && before.status == MatchStatus::Completed {
            return Ok(());
        }

        let (Some(round), Some(position)) = (before.playoff_round, before.bracket_pos) else {
            warn!(
                "Playoff match {} has no bracket coordinates, not propagating winner {}",
                before.id, winner_id
            );
            return Ok(());
        };

        self.propagate_winner(SlotId::new(round, position), winner_id)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::{MemoryDatabase, Snapshot};
    use crate::database::models::BracketPatch;
    use crate::database::{BracketDatabase, MatchDatabase};
    use crate::engine::EngineSettings;

    fn regular(id: i32, team1: i32, team2: i32) -> Match {
        Match {
            id,
            team1_id: Some(team1),
            team2_id: Some(team2),
            ..Default::default()
        }
    }

    fn map(match_id: i32, index: i32, rounds: (i32, i32), winner: Option<i32>) -> MapResult {
        MapResult {
            match_id,
            map_index: index,
            map_name: Some(format!("Map {}", index + 1)),
            team1_rounds: rounds.0,
            team2_rounds: rounds.1,
            winner_id: winner,
            is_forfeit: false,
        }
    }

    fn engine_with(matches: Vec<Match>, maps: Vec<MapResult>) -> Engine<MemoryDatabase> {
        Engine::new(
            MemoryDatabase::new(Snapshot {
                teams: Vec::new(),
                matches,
                maps,
            }),
            EngineSettings::default(),
        )
    }

    #[test]
    fn no_maps_leaves_the_stored_score() {
        let game = regular(1, 10, 20);
        assert_eq!(resolve_outcome(&game, &[]).unwrap(), None);
    }

    #[test]
    fn counts_map_wins_per_team() {
        let game = regular(1, 10, 20);
        let maps = vec![
            map(1, 0, (13, 9), Some(10)),
            map(1, 1, (7, 13), Some(20)),
            map(1, 2, (13, 11), Some(10)),
        ];

        let outcome = resolve_outcome(&game, &maps).unwrap().unwrap();
        assert_eq!((outcome.score_t1, outcome.score_t2), (2, 1));
        assert_eq!(outcome.winner_id, Some(10));
        assert_eq!(outcome.maps_played, 3);
        assert_eq!(outcome.status, MatchStatus::Completed);
        assert!(!outcome.is_forfeit);
    }

    #[test]
    fn split_maps_have_no_winner_but_complete_the_match() {
        let game = regular(1, 10, 20);
        let maps = vec![map(1, 0, (13, 9), Some(10)), map(1, 1, (9, 13), Some(20))];

        let outcome = resolve_outcome(&game, &maps).unwrap().unwrap();
        assert_eq!(outcome.winner_id, None);
        assert_eq!(outcome.status, MatchStatus::Completed);
    }

    #[test]
    fn rejects_a_winner_outside_the_match() {
        let game = regular(1, 10, 20);
        let maps = vec![map(1, 0, (13, 9), Some(30))];

        let err = resolve_outcome(&game, &maps).unwrap_err();
        assert_eq!(
            err.downcast_ref::<CommonError>(),
            Some(&CommonError::TeamNotInMatch {
                match_id: 1,
                team_id: 30
            })
        );
    }

    #[test]
    fn forfeit_is_a_thirteen_nil_blowout() {
        let game = regular(1, 10, 20);

        let outcome = forfeit_outcome(&game, 20).unwrap();
        assert_eq!((outcome.score_t1, outcome.score_t2), (0, 13));
        assert_eq!(outcome.winner_id, Some(20));
        assert_eq!(outcome.maps_played, 0);
        assert!(outcome.is_forfeit);

        assert!(forfeit_outcome(&game, 99).is_err());
    }

    #[tokio::test]
    async fn maps_supersede_a_stale_aggregate() {
        let mut game = regular(1, 10, 20);
        game.score_t1 = 2;
        game.score_t2 = 0;
        game.winner_id = Some(10);
        let engine = engine_with(vec![game], vec![map(1, 0, (5, 13), Some(20))]);

        engine.resolve_match(1).await.unwrap();

        let stored = engine.database().get_match(1).await.unwrap().unwrap();
        assert_eq!((stored.score_t1, stored.score_t2), (0, 1));
        assert_eq!(stored.winner_id, Some(20));
        assert_eq!(stored.maps_played, 1);
        assert_eq!(stored.status, MatchStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_match_is_reported() {
        let engine = engine_with(Vec::new(), Vec::new());

        let err = engine.resolve_match(42).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<CommonError>(),
            Some(&CommonError::MatchNotExists(42))
        );
    }

    #[tokio::test]
    async fn malformed_maps_are_not_saved() {
        let engine = engine_with(vec![regular(1, 10, 20)], Vec::new());
        let maps = vec![map(1, 0, (13, 2), Some(10)), map(1, 1, (13, 2), Some(77))];

        assert!(engine.save_maps(1, &maps).await.is_err());
        assert!(engine.database().list_maps(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn forfeit_clears_recorded_maps() {
        let engine = engine_with(
            vec![regular(1, 10, 20)],
            vec![map(1, 0, (13, 4), Some(10))],
        );

        engine.record_forfeit(1, 20).await.unwrap();

        assert!(engine.database().list_maps(1).await.unwrap().is_empty());
        let stored = engine.database().get_match(1).await.unwrap().unwrap();
        assert!(stored.is_forfeit);
        assert_eq!(stored.winner_id, Some(20));
        assert_eq!((stored.score_t1, stored.score_t2), (0, 13));
    }

    #[tokio::test]
    async fn playoff_winner_is_pushed_into_the_next_round() {
        let engine = engine_with(Vec::new(), Vec::new());
        let db = engine.database();
        db.upsert_bracket_match(
            2,
            2,
            &BracketPatch {
                team1_id: Some(3),
                team2_id: Some(7),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let game = db.get_bracket_match(2, 2).await.unwrap().unwrap();

        engine
            .save_maps(game.id, &[map(game.id, 0, (8, 13), Some(7))])
            .await
            .unwrap();

        let next = db.get_bracket_match(3, 2).await.unwrap().unwrap();
        assert_eq!(next.team(Side::Team1), Some(7));
        assert_eq!(next.team2_id, None);

        // Re-resolving the same result does not advance the team a second time.
        engine.resolve_match(game.id).await.unwrap();
        let next = db.get_bracket_match(3, 2).await.unwrap().unwrap();
        assert_eq!((next.team1_id, next.team2_id), (Some(7), None));
    }
}
