use crate::database::models::Side;

/// Failures caused by the caller's input rather than by the database.
///
/// These are raised into [`crate::EngineError`] and never retried by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    MatchNotExists(i32),
    TeamNotInMatch { match_id: i32, team_id: i32 },
    SlotNotExists { round: i32, position: i32 },
    NotAPlayoffMatch(i32),
    SideOccupied { match_id: i32, side: Side },
    MissingConfig(String),
    InvalidConfig { key: String, value: String },
}

impl std::fmt::Display for CommonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use CommonError::*;
        match self {
            MatchNotExists(id) => write!(f, "Match {} does not exist.", id),
            TeamNotInMatch { match_id, team_id } => {
                write!(f, "Team {} is not playing in match {}.", team_id, match_id)
            }
            SlotNotExists { round, position } => write!(
                f,
                "Bracket slot at round {} position {} does not exist.",
                round, position
            ),
            NotAPlayoffMatch(id) => write!(f, "Match {} is not a playoff match.", id),
            SideOccupied { match_id, side } => write!(
                f,
                "The other side of match {} already holds this team ({} requested).",
                match_id, side
            ),
            MissingConfig(key) => write!(f, "{} environment variable not found.", key),
            InvalidConfig { key, value } => write!(f, "Invalid value {:?} for {}.", value, key),
        }
    }
}

impl std::error::Error for CommonError {}
