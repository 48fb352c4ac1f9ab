use std::collections::HashMap;

use futures::future::try_join_all;

use crate::database::models::{MapResult, Match};
use crate::database::Database;
use crate::EngineError;

/// Turns per-map results into match outcomes.
pub mod resolver;
/// Group tables, elimination and playoff qualification.
pub mod standings;
/// The fixed single-elimination playoff bracket.
pub mod bracket;

/// Knobs the engine reads on every call. Nothing here is mutated by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineSettings {
    /// Placeholder teams that never appear in standings, matched case-insensitively by name.
    pub excluded_teams: Vec<String>,
}

/// Entry point for every progression operation.
///
/// The engine holds no state of its own besides the database handle: every operation reads what
/// is persisted, computes, and writes back.
#[derive(Debug)]
pub struct Engine<DB> {
    database: DB,
    settings: EngineSettings,
}

impl<DB> Engine<DB>
where
    DB: Database,
{
    /// Create a new engine with a given database and settings.
    pub fn new(database: DB, settings: EngineSettings) -> Self {
        Self { database, settings }
    }

    pub fn database(&self) -> &DB {
        &self.database
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Loads the maps of every given match, keyed by match id.
    ///
    /// Matches without maps are left out of the map.
    async fn maps_by_match(
        &self,
        matches: &[Match],
    ) -> Result<HashMap<i32, Vec<MapResult>>, EngineError> {
        let maps = try_join_all(matches.iter().map(|m| self.database.list_maps(m.id))).await?;

        Ok(matches
            .iter()
            .zip(maps)
            .filter(|(_, maps)| !maps.is_empty())
            .map(|(m, maps)| (m.id, maps))
            .collect())
    }
}
