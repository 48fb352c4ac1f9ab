use crate::EngineError;
use sqlx::PgPool;
use tracing::info;

use self::models::{
    BracketPatch, MapResult, Match, MatchFilter, MatchOutcome, NewBracketMatch, Side, Team,
};

/// Models for the database.
///
/// These models are specific to the current database design and schema.
/// Most if not all are directly mapped to a table in the database.
pub mod models;

/// A database kept entirely in memory.
pub mod memory;

/// Any database the engine can read teams from.
#[allow(async_fn_in_trait)]
pub trait TeamDatabase {
    /// Retrieves all teams ordered by id, optionally restricted to one group.
    async fn list_teams(&self, group: Option<&str>) -> Result<Vec<Team>, EngineError>;
}

/// Any database the engine can read and resolve matches in.
#[allow(async_fn_in_trait)]
pub trait MatchDatabase {
    /// Retrieves a match by its id.
    async fn get_match(&self, match_id: i32) -> Result<Option<Match>, EngineError>;

    /// Retrieves all matches accepted by the filter.
    ///
    /// Regular matches come first ordered by id, followed by playoff matches ordered by round and
    /// bracket position.
    async fn list_matches(&self, filter: &MatchFilter) -> Result<Vec<Match>, EngineError>;

    /// Retrieves all maps of a match ordered by map index.
    async fn list_maps(&self, match_id: i32) -> Result<Vec<MapResult>, EngineError>;

    /// Inserts a map, replacing any existing map with the same match and map index.
    async fn upsert_map(&self, map: &MapResult) -> Result<(), EngineError>;

    /// Removes every map of a match.
    async fn clear_maps(&self, match_id: i32) -> Result<(), EngineError>;

    /// Writes a resolved outcome onto the match record.
    async fn save_match_outcome(
        &self,
        match_id: i32,
        outcome: &MatchOutcome,
    ) -> Result<(), EngineError>;
}

/// Any database holding the playoff bracket.
///
/// A bracket slot is addressed by its round and position. The database is expected to hold at
/// most one playoff match per slot.
#[allow(async_fn_in_trait)]
pub trait BracketDatabase {
    /// Retrieves the playoff match occupying a slot.
    async fn get_bracket_match(
        &self,
        round: i32,
        position: i32,
    ) -> Result<Option<Match>, EngineError>;

    /// Creates a playoff match in a slot.
    ///
    /// Returns false without writing anything if the slot already holds a match.
    async fn create_bracket_match(&self, new: &NewBracketMatch) -> Result<bool, EngineError>;

    /// Creates or overwrites the playoff match in a slot.
    async fn upsert_bracket_match(
        &self,
        round: i32,
        position: i32,
        patch: &BracketPatch,
    ) -> Result<(), EngineError>;

    /// Writes a team into one side of a slot, but only if that side is still empty and the team
    /// is not already on the other side.
    ///
    /// Returns whether the write happened. This is the only write used to advance teams, so
    /// concurrent callers can never fill the same side twice.
    async fn fill_slot_if_empty(
        &self,
        round: i32,
        position: i32,
        side: Side,
        team_id: i32,
    ) -> Result<bool, EngineError>;

    /// Overwrites one side of a match unconditionally.
    async fn set_slot_team(
        &self,
        match_id: i32,
        side: Side,
        team_id: Option<i32>,
    ) -> Result<(), EngineError>;
}

/// Everything the engine needs from its storage.
pub trait Database: TeamDatabase + MatchDatabase + BracketDatabase {}

impl<T> Database for T where T: TeamDatabase + MatchDatabase + BracketDatabase {}

const MATCH_COLUMNS: &str = r#"
    id, week, group_name, team1_id, team2_id, winner_id, score_t1, score_t2,
    status, match_type, format, maps_played, is_forfeit,
    playoff_round, bracket_pos, bracket_label
"#;

/// The Postgres database used by the league portal.
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pub pool: PgPool,
}

impl PgDatabase {
    pub async fn connect(db_url: &str) -> Result<Self, EngineError> {
        let pool = PgPool::connect(db_url).await?;
        info!("Successfully connected to the database.");

        Ok(PgDatabase { pool })
    }

    pub async fn migrate(&self) -> Result<(), EngineError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

impl TeamDatabase for PgDatabase {
    async fn list_teams(&self, group: Option<&str>) -> Result<Vec<Team>, EngineError> {
        let teams = sqlx::query_as::<_, Team>(
            r#"
            SELECT id, name, group_name
            FROM teams
            WHERE $1::text IS NULL OR group_name ILIKE $1
            ORDER BY id
            "#,
        )
        .bind(group)
        .fetch_all(&self.pool)
        .await?;

        Ok(teams)
    }
}

impl MatchDatabase for PgDatabase {
    async fn get_match(&self, match_id: i32) -> Result<Option<Match>, EngineError> {
        let game = sqlx::query_as::<_, Match>(&format!(
            "SELECT {} FROM matches WHERE id = $1 LIMIT 1",
            MATCH_COLUMNS
        ))
        .bind(match_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(game)
    }

    async fn list_matches(&self, filter: &MatchFilter) -> Result<Vec<Match>, EngineError> {
        let matches = sqlx::query_as::<_, Match>(&format!(
            r#"
            SELECT {}
            FROM matches
            WHERE
                ($1::match_type IS NULL OR match_type = $1)
                AND ($2::match_status IS NULL OR status = $2)
                AND ($3::int IS NULL OR week = $3)
            ORDER BY
                playoff_round NULLS FIRST,
                bracket_pos NULLS FIRST,
                id
            "#,
            MATCH_COLUMNS
        ))
        .bind(filter.match_type)
        .bind(filter.status)
        .bind(filter.week)
        .fetch_all(&self.pool)
        .await?;

        Ok(matches)
    }

    async fn list_maps(&self, match_id: i32) -> Result<Vec<MapResult>, EngineError> {
        let maps = sqlx::query_as::<_, MapResult>(
            r#"
            SELECT match_id, map_index, map_name, team1_rounds, team2_rounds, winner_id, is_forfeit
            FROM match_maps
            WHERE match_id = $1
            ORDER BY map_index
            "#,
        )
        .bind(match_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(maps)
    }

    async fn upsert_map(&self, map: &MapResult) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO match_maps (match_id, map_index, map_name, team1_rounds, team2_rounds, winner_id, is_forfeit)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (match_id, map_index)
            DO UPDATE SET
                map_name = EXCLUDED.map_name,
                team1_rounds = EXCLUDED.team1_rounds,
                team2_rounds = EXCLUDED.team2_rounds,
                winner_id = EXCLUDED.winner_id,
                is_forfeit = EXCLUDED.is_forfeit
            "#,
        )
        .bind(map.match_id)
        .bind(map.map_index)
        .bind(&map.map_name)
        .bind(map.team1_rounds)
        .bind(map.team2_rounds)
        .bind(map.winner_id)
        .bind(map.is_forfeit)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_maps(&self, match_id: i32) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM match_maps WHERE match_id = $1")
            .bind(match_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn save_match_outcome(
        &self,
        match_id: i32,
        outcome: &MatchOutcome,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE matches
            SET
                score_t1 = $1,
                score_t2 = $2,
                winner_id = $3,
                maps_played = $4,
                status = $5,
                is_forfeit = $6
            WHERE id = $7
            "#,
        )
        .bind(outcome.score_t1)
        .bind(outcome.score_t2)
        .bind(outcome.winner_id)
        .bind(outcome.maps_played)
        .bind(outcome.status)
        .bind(outcome.is_forfeit)
        .bind(match_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl BracketDatabase for PgDatabase {
    async fn get_bracket_match(
        &self,
        round: i32,
        position: i32,
    ) -> Result<Option<Match>, EngineError> {
        let game = sqlx::query_as::<_, Match>(&format!(
            r#"
            SELECT {}
            FROM matches
            WHERE match_type = 'playoff' AND playoff_round = $1 AND bracket_pos = $2
            LIMIT 1
            "#,
            MATCH_COLUMNS
        ))
        .bind(round)
        .bind(position)
        .fetch_optional(&self.pool)
        .await?;

        Ok(game)
    }

    async fn create_bracket_match(&self, new: &NewBracketMatch) -> Result<bool, EngineError> {
        // The partial unique index on (playoff_round, bracket_pos) turns a concurrent create of
        // the same slot into a no-op.
        let result = sqlx::query(
            r#"
            INSERT INTO matches (match_type, playoff_round, bracket_pos, team1_id, team2_id, format, bracket_label, status, score_t1, score_t2)
            VALUES ('playoff', $1, $2, $3, $4, $5, $6, 'scheduled', 0, 0)
            ON CONFLICT (playoff_round, bracket_pos) WHERE match_type = 'playoff'
            DO NOTHING
            "#,
        )
        .bind(new.round)
        .bind(new.position)
        .bind(new.team1_id)
        .bind(new.team2_id)
        .bind(&new.format)
        .bind(&new.bracket_label)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_bracket_match(
        &self,
        round: i32,
        position: i32,
        patch: &BracketPatch,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO matches (match_type, playoff_round, bracket_pos, team1_id, team2_id, format, bracket_label, status, score_t1, score_t2)
            VALUES ('playoff', $1, $2, $3, $4, $5, $6, 'scheduled', 0, 0)
            ON CONFLICT (playoff_round, bracket_pos) WHERE match_type = 'playoff'
            DO UPDATE SET
                team1_id = EXCLUDED.team1_id,
                team2_id = EXCLUDED.team2_id,
                format = EXCLUDED.format,
                bracket_label = EXCLUDED.bracket_label
            "#,
        )
        .bind(round)
        .bind(position)
        .bind(patch.team1_id)
        .bind(patch.team2_id)
        .bind(&patch.format)
        .bind(&patch.bracket_label)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fill_slot_if_empty(
        &self,
        round: i32,
        position: i32,
        side: Side,
        team_id: i32,
    ) -> Result<bool, EngineError> {
        let query = match side {
            Side::Team1 => {
                r#"
                UPDATE matches
                SET team1_id = $1
                WHERE match_type = 'playoff' AND playoff_round = $2 AND bracket_pos = $3
                    AND team1_id IS NULL
                    AND team2_id IS DISTINCT FROM $1
                "#
            }
            Side::Team2 => {
                r#"
                UPDATE matches
                SET team2_id = $1
                WHERE match_type = 'playoff' AND playoff_round = $2 AND bracket_pos = $3
                    AND team2_id IS NULL
                    AND team1_id IS DISTINCT FROM $1
                "#
            }
        };

        let result = sqlx::query(query)
            .bind(team_id)
            .bind(round)
            .bind(position)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_slot_team(
        &self,
        match_id: i32,
        side: Side,
        team_id: Option<i32>,
    ) -> Result<(), EngineError> {
        let query = match side {
            Side::Team1 => "UPDATE matches SET team1_id = $1 WHERE id = $2",
            Side::Team2 => "UPDATE matches SET team2_id = $1 WHERE id = $2",
        };

        sqlx::query(query)
            .bind(team_id)
            .bind(match_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
