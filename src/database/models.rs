use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A team within the database.
///
/// Teams are read-only as far as the engine is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Team {
    pub id: i32,
    pub name: String,
    pub group_name: String,
}

/// Whether a match belongs to the regular season or to the playoff bracket.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    sqlx::Type,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[sqlx(type_name = "match_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchType {
    #[default]
    Regular,
    Playoff,
}

/// The status of a match. A completed match is terminal.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    sqlx::Type,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[sqlx(type_name = "match_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchStatus {
    #[default]
    Scheduled,
    Live,
    Completed,
}

/// One of the two team slots of a match.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Side {
    Team1,
    Team2,
}

impl Side {
    pub fn other(self) -> Self {
        match self {
            Side::Team1 => Side::Team2,
            Side::Team2 => Side::Team1,
        }
    }
}

/// A match within the database.
///
/// Playoff matches additionally carry their bracket coordinates. Either team may be missing while
/// a bracket slot is still waiting for a winner to reach it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Match {
    pub id: i32,
    #[serde(default)]
    pub week: Option<i32>,
    #[serde(default)]
    pub group_name: Option<String>,
    pub team1_id: Option<i32>,
    pub team2_id: Option<i32>,
    #[serde(default)]
    pub winner_id: Option<i32>,
    #[serde(default)]
    pub score_t1: i32,
    #[serde(default)]
    pub score_t2: i32,
    #[serde(default)]
    pub status: MatchStatus,
    #[serde(default)]
    pub match_type: MatchType,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub maps_played: i32,
    #[serde(default)]
    pub is_forfeit: bool,
    #[serde(default)]
    pub playoff_round: Option<i32>,
    #[serde(default)]
    pub bracket_pos: Option<i32>,
    #[serde(default)]
    pub bracket_label: Option<String>,
}

impl Match {
    pub fn team(&self, side: Side) -> Option<i32> {
        match side {
            Side::Team1 => self.team1_id,
            Side::Team2 => self.team2_id,
        }
    }

    /// Which side the team plays on, if it plays in this match at all.
    pub fn side_of(&self, team_id: i32) -> Option<Side> {
        if self.team1_id == Some(team_id) {
            Some(Side::Team1)
        } else if self.team2_id == Some(team_id) {
            Some(Side::Team2)
        } else {
            None
        }
    }

    pub fn has_team(&self, team_id: i32) -> bool {
        self.side_of(team_id).is_some()
    }

    /// The participant that did not win, once a winner is known.
    pub fn loser_id(&self) -> Option<i32> {
        let winner = self.winner_id?;
        self.team(self.side_of(winner)?.other())
    }

    /// True once the match is completed with a resolved winner.
    pub fn is_decided(&self) -> bool {
        self.status == MatchStatus::Completed && self.winner_id.is_some()
    }

    /// Both team slots are still empty.
    pub fn is_vacant(&self) -> bool {
        self.team1_id.is_none() && self.team2_id.is_none()
    }
}

/// The result of a single map within a match.
///
/// `(match_id, map_index)` is unique. Once any map exists for a match, the maps are the only
/// source of truth for its score.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MapResult {
    pub match_id: i32,
    pub map_index: i32,
    #[serde(default)]
    pub map_name: Option<String>,
    pub team1_rounds: i32,
    pub team2_rounds: i32,
    pub winner_id: Option<i32>,
    #[serde(default)]
    pub is_forfeit: bool,
}

/// The authoritative score of a match as written back by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub score_t1: i32,
    pub score_t2: i32,
    pub winner_id: Option<i32>,
    pub maps_played: i32,
    pub status: MatchStatus,
    pub is_forfeit: bool,
}

/// Narrows down which matches are retrieved from the database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchFilter {
    pub match_type: Option<MatchType>,
    pub status: Option<MatchStatus>,
    pub week: Option<i32>,
}

impl MatchFilter {
    pub fn regular() -> Self {
        Self {
            match_type: Some(MatchType::Regular),
            ..Default::default()
        }
    }

    pub fn playoff() -> Self {
        Self {
            match_type: Some(MatchType::Playoff),
            ..Default::default()
        }
    }

    pub fn in_week(self, week: Option<i32>) -> Self {
        Self { week, ..self }
    }

    pub fn with_status(self, status: Option<MatchStatus>) -> Self {
        Self { status, ..self }
    }

    pub fn matches(&self, game: &Match) -> bool {
        self.match_type.map_or(true, |t| t == game.match_type)
            && self.status.map_or(true, |s| s == game.status)
            && self.week.map_or(true, |w| game.week == Some(w))
    }
}

/// The fields of a playoff match created directly into a bracket slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewBracketMatch {
    pub round: i32,
    pub position: i32,
    pub team1_id: Option<i32>,
    pub team2_id: Option<i32>,
    pub format: Option<String>,
    pub bracket_label: Option<String>,
}

impl NewBracketMatch {
    pub fn empty(round: i32, position: i32) -> Self {
        Self {
            round,
            position,
            ..Default::default()
        }
    }

    pub fn with_team1(round: i32, position: i32, team_id: i32) -> Self {
        Self {
            team1_id: Some(team_id),
            ..Self::empty(round, position)
        }
    }
}

/// An admin edit of a bracket slot. All fields overwrite the stored ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BracketPatch {
    pub team1_id: Option<i32>,
    pub team2_id: Option<i32>,
    pub format: Option<String>,
    pub bracket_label: Option<String>,
}
