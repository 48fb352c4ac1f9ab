use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{debug, info, warn};

use super::Engine;
use crate::database::models::{
    BracketPatch, Match, MatchFilter, MatchType, NewBracketMatch, Side,
};
use crate::database::Database;
use crate::utils::error::CommonError;
use crate::EngineError;

/// Number of slots in each round, round 1 first.
pub const ROUND_SLOTS: [i32; 5] = [8, 8, 4, 2, 1];
/// The round holding the single final match.
pub const FINAL_ROUND: i32 = ROUND_SLOTS.len() as i32;

const ROUND_NAMES: [&str; 5] = [
    "Round of 24",
    "Round of 16",
    "Quarter-finals",
    "Semi-finals",
    "Final",
];

/// How many slots a round has, or `None` for a round outside the bracket.
pub fn slot_count(round: i32) -> Option<i32> {
    let index = usize::try_from(round).ok()?.checked_sub(1)?;
    ROUND_SLOTS.get(index).copied()
}

pub fn round_name(round: i32) -> &'static str {
    usize::try_from(round)
        .ok()
        .and_then(|r| r.checked_sub(1))
        .and_then(|index| ROUND_NAMES.get(index))
        .copied()
        .unwrap_or("Unknown round")
}

/// Every slot of the bracket in round then position order.
fn slot_ids() -> impl Iterator<Item = SlotId> {
    ROUND_SLOTS
        .into_iter()
        .zip(1..)
        .flat_map(|(count, round)| (1..=count).map(move |position| SlotId::new(round, position)))
}

/// The address of a slot in the bracket.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SlotId {
    pub round: i32,
    pub position: i32,
}

impl SlotId {
    pub fn new(round: i32, position: i32) -> Self {
        Self { round, position }
    }

    /// Whether the slot exists in the fixed bracket.
    pub fn is_valid(&self) -> bool {
        slot_count(self.round).is_some_and(|count| (1..=count).contains(&self.position))
    }

    /// The slot the winner of this one moves on to.
    ///
    /// Round 1 feeds round 2 position by position. From round 2 on, positions fold into the
    /// smaller successor round, so positions p and p + 4 of round 2 meet in round 3 position p.
    /// The final has no successor.
    pub fn successor(&self) -> Option<SlotId> {
        if !self.is_valid() {
            return None;
        }
        let next_round = self.round + 1;
        let next_count = slot_count(next_round)?;

        Some(SlotId::new(
            next_round,
            (self.position - 1).rem_euclid(next_count) + 1,
        ))
    }

    fn index(&self) -> Option<(usize, usize)> {
        if !self.is_valid() {
            return None;
        }
        Some((self.round as usize - 1, self.position as usize - 1))
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} #{}", round_name(self.round), self.position)
    }
}

/// Lifecycle of a bracket slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// No match exists yet, or it has no team in either side.
    Empty,
    /// At least one team is in place and no winner is known.
    Assigned,
    /// A winner is known but has not reached the successor slot.
    Completed,
    /// The winner sits in the successor slot, or this is a decided final.
    Propagated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BracketSlot {
    pub id: SlotId,
    pub state: SlotState,
    pub game: Option<Match>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AdvancementKind {
    /// A top group finisher seeded straight into round 2.
    Bye,
    /// The winner of the previous round.
    Winner,
}

/// A proposed write of one team into one side of a slot.
///
/// Proposals are computed from a read of the bracket and may be stale by the time they are
/// applied. Applying re-checks the target, so a stale proposal is skipped rather than
/// overwriting anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvancementProposal {
    pub target: SlotId,
    pub team_id: i32,
    pub side: Side,
    pub kind: AdvancementKind,
    /// The slot whose winner is advancing. Byes have none.
    #[serde(default)]
    pub source: Option<SlotId>,
    pub title: String,
    pub reason: String,
}

/// Which proposals were written and which were already overtaken.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub applied: Vec<AdvancementProposal>,
    pub skipped: Vec<AdvancementProposal>,
}

impl ApplyReport {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.skipped.is_empty()
    }
}

/// A team seeded into a round-2 position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedAssignment {
    pub position: i32,
    pub team_id: i32,
}

/// Team occupancy of a slot while planning a pass, including writes planned earlier in it.
#[derive(Debug, Clone, Copy, Default)]
struct Occupancy {
    team1: Option<i32>,
    team2: Option<i32>,
}

impl Occupancy {
    fn of(game: Option<&Match>) -> Self {
        game.map(|g| Self {
            team1: g.team1_id,
            team2: g.team2_id,
        })
        .unwrap_or_default()
    }

    fn contains(&self, team_id: i32) -> bool {
        self.team1 == Some(team_id) || self.team2 == Some(team_id)
    }

    /// Claims the first free side for the team.
    fn claim(&mut self, team_id: i32) -> Option<Side> {
        if self.team1.is_none() {
            self.team1 = Some(team_id);
            Some(Side::Team1)
        } else if self.team2.is_none() {
            self.team2 = Some(team_id);
            Some(Side::Team2)
        } else {
            None
        }
    }
}

/// The playoff bracket as a fixed arena of slots, indexed by round then position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bracket {
    rounds: Vec<Vec<Option<Match>>>,
}

impl Default for Bracket {
    fn default() -> Self {
        Self {
            rounds: ROUND_SLOTS
                .iter()
                .map(|&count| vec![None; count as usize])
                .collect(),
        }
    }
}

impl Bracket {
    /// Places playoff matches into their slots.
    ///
    /// Matches without valid coordinates are ignored. Should two matches claim the same slot,
    /// the older one wins.
    pub fn from_matches(matches: impl IntoIterator<Item = Match>) -> Self {
        let mut bracket = Self::default();

        for game in matches {
            if game.match_type != MatchType::Playoff {
                continue;
            }
            let (Some(round), Some(position)) = (game.playoff_round, game.bracket_pos) else {
                warn!("Playoff match {} has no bracket coordinates", game.id);
                continue;
            };
            let Some((r, p)) = SlotId::new(round, position).index() else {
                warn!(
                    "Playoff match {} is outside the bracket at round {} position {}",
                    game.id, round, position
                );
                continue;
            };

            let slot = &mut bracket.rounds[r][p];
            if let Some(existing) = slot {
                warn!(
                    "Matches {} and {} share round {} position {}, keeping {}",
                    existing.id,
                    game.id,
                    round,
                    position,
                    existing.id.min(game.id)
                );
                if game.id < existing.id {
                    *existing = game;
                }
            } else {
                *slot = Some(game);
            }
        }

        bracket
    }

    pub fn get(&self, slot: SlotId) -> Option<&Match> {
        let (r, p) = slot.index()?;
        self.rounds[r][p].as_ref()
    }

    pub fn state(&self, slot: SlotId) -> SlotState {
        let Some(game) = self.get(slot) else {
            return SlotState::Empty;
        };
        if game.is_vacant() {
            return SlotState::Empty;
        }
        let Some(winner) = game.winner_id.filter(|_| game.is_decided()) else {
            return SlotState::Assigned;
        };

        match slot.successor() {
            None => SlotState::Propagated,
            Some(next) if self.get(next).is_some_and(|n| n.has_team(winner)) => {
                SlotState::Propagated
            }
            Some(_) => SlotState::Completed,
        }
    }

    /// Every slot in round then position order.
    pub fn slots(&self) -> Vec<BracketSlot> {
        slot_ids()
            .map(|id| BracketSlot {
                id,
                state: self.state(id),
                game: self.get(id).cloned(),
            })
            .collect()
    }

    /// The winner of the final once it is decided.
    pub fn champion(&self) -> Option<i32> {
        self.get(SlotId::new(FINAL_ROUND, 1))
            .filter(|game| game.is_decided())
            .and_then(|game| game.winner_id)
    }

    /// Proposes moving every decided winner into its successor slot.
    ///
    /// Sides are filled team1 first. When several winners target the same empty slot in one pass
    /// they are given sides in bracket order. A winner already in its successor slot is not
    /// proposed again.
    pub fn compute_advancements(&self) -> Vec<AdvancementProposal> {
        let mut planned: HashMap<SlotId, Occupancy> = HashMap::new();
        let mut proposals = Vec::new();

        for source in slot_ids() {
            let Some(game) = self.get(source).filter(|g| g.is_decided()) else {
                continue;
            };
            let (Some(winner), Some(target)) = (game.winner_id, source.successor()) else {
                continue;
            };

            let occupancy = planned
                .entry(target)
                .or_insert_with(|| Occupancy::of(self.get(target)));

            if occupancy.contains(winner) {
                continue;
            }
            if let Some(loser) = game.loser_id().filter(|&l| occupancy.contains(l)) {
                warn!(
                    "Team {} already advanced from {} although team {} won it, leaving {} untouched",
                    loser, source, winner, target
                );
                continue;
            }

            let Some(side) = occupancy.claim(winner) else {
                debug!("{} is full, team {} from {} cannot advance", target, winner, source);
                continue;
            };

            proposals.push(AdvancementProposal {
                target,
                team_id: winner,
                side,
                kind: AdvancementKind::Winner,
                source: Some(source),
                title: format!("Winner of {} to {}", source, target),
                reason: format!(
                    "Team {} won match {} and moves into {} as {}",
                    winner, game.id, target, side
                ),
            });
        }

        proposals
    }

    /// Proposes seeding bye teams into round 2.
    ///
    /// Seeds are only ever placed in a free side, and a team already in its slot is left alone.
    pub fn bye_proposals(&self, seeds: &[SeedAssignment]) -> Vec<AdvancementProposal> {
        let mut planned: HashMap<SlotId, Occupancy> = HashMap::new();
        let mut proposals = Vec::new();

        for seed in seeds {
            let target = SlotId::new(2, seed.position);
            let occupancy = planned
                .entry(target)
                .or_insert_with(|| Occupancy::of(self.get(target)));

            if occupancy.contains(seed.team_id) {
                continue;
            }
            let Some(side) = occupancy.claim(seed.team_id) else {
                warn!("{} is full, cannot seed team {}", target, seed.team_id);
                continue;
            };

            proposals.push(AdvancementProposal {
                target,
                team_id: seed.team_id,
                side,
                kind: AdvancementKind::Bye,
                source: None,
                title: format!("Bye into {}", target),
                reason: format!(
                    "Team {} finished in the top two of its group and is seeded into {} as {}",
                    seed.team_id, target, side
                ),
            });
        }

        proposals
    }
}

impl<DB> Engine<DB>
where
    DB: Database,
{
    /// Reads every playoff match into a bracket.
    pub async fn load_bracket(&self) -> Result<Bracket, EngineError> {
        let matches = self.database.list_matches(&MatchFilter::playoff()).await?;
        Ok(Bracket::from_matches(matches))
    }

    /// All slots of the bracket with their state and match.
    pub async fn get_playoff_bracket(&self) -> Result<Vec<BracketSlot>, EngineError> {
        Ok(self.load_bracket().await?.slots())
    }

    /// Makes sure every round-1 slot has a match, creating the missing ones.
    ///
    /// Returns how many matches were created.
    pub async fn create_round1_slots(&self) -> Result<usize, EngineError> {
        let mut created = 0;
        for position in 1..=ROUND_SLOTS[0] {
            if self
                .database
                .create_bracket_match(&NewBracketMatch::empty(1, position))
                .await?
            {
                created += 1;
            }
        }

        if created > 0 {
            info!("Created {} round 1 playoff match(es)", created);
        }
        Ok(created)
    }

    /// Seeds bye teams into round 2 without overwriting any team already in place.
    pub async fn seed_round2_byes(
        &self,
        seeds: &[SeedAssignment],
    ) -> Result<ApplyReport, EngineError> {
        for seed in seeds {
            let target = SlotId::new(2, seed.position);
            if !target.is_valid() {
                return Err(CommonError::SlotNotExists {
                    round: target.round,
                    position: target.position,
                }
                .into());
            }
        }

        let proposals = self.load_bracket().await?.bye_proposals(seeds);
        self.apply_advancements(&proposals).await
    }

    /// Overwrites one side of a playoff match, or clears it with `None`.
    pub async fn assign_slot(
        &self,
        match_id: i32,
        side: Side,
        team_id: Option<i32>,
    ) -> Result<Match, EngineError> {
        let game = self
            .database
            .get_match(match_id)
            .await?
            .ok_or(CommonError::MatchNotExists(match_id))?;

        if game.match_type != MatchType::Playoff {
            return Err(CommonError::NotAPlayoffMatch(match_id).into());
        }
        if team_id.is_some() && game.team(side.other()) == team_id {
            return Err(CommonError::SideOccupied { match_id, side }.into());
        }

        self.database.set_slot_team(match_id, side, team_id).await?;
        info!("Set {} of match {} to {:?}", side, match_id, team_id);

        self.database
            .get_match(match_id)
            .await?
            .ok_or(CommonError::MatchNotExists(match_id).into())
    }

    /// Creates or overwrites the match in a slot, as an admin edit.
    pub async fn upsert_bracket_match(
        &self,
        slot: SlotId,
        patch: &BracketPatch,
    ) -> Result<(), EngineError> {
        if !slot.is_valid() {
            return Err(CommonError::SlotNotExists {
                round: slot.round,
                position: slot.position,
            }
            .into());
        }

        self.database
            .upsert_bracket_match(slot.round, slot.position, patch)
            .await?;
        info!("Updated {}", slot);
        Ok(())
    }

    /// Proposes every pending winner advancement without writing anything.
    pub async fn propose_advancements(&self) -> Result<Vec<AdvancementProposal>, EngineError> {
        Ok(self.load_bracket().await?.compute_advancements())
    }

    /// Applies proposals as conditional writes.
    ///
    /// Every target is validated before anything is written. A proposal whose target side is no
    /// longer free is skipped, so applying the same list twice is the same as applying it once.
    pub async fn apply_advancements(
        &self,
        proposals: &[AdvancementProposal],
    ) -> Result<ApplyReport, EngineError> {
        if let Some(invalid) = proposals.iter().find(|p| !p.target.is_valid()) {
            return Err(CommonError::SlotNotExists {
                round: invalid.target.round,
                position: invalid.target.position,
            }
            .into());
        }

        let mut report = ApplyReport::default();
        for proposal in proposals {
            if self.write_advancement(proposal).await? {
                info!("{}: {}", proposal.title, proposal.reason);
                report.applied.push(proposal.clone());
            } else {
                debug!("Skipped stale proposal: {}", proposal.title);
                report.skipped.push(proposal.clone());
            }
        }

        Ok(report)
    }

    async fn write_advancement(&self, proposal: &AdvancementProposal) -> Result<bool, EngineError> {
        let SlotId { round, position } = proposal.target;
        let team_id = proposal.team_id;

        if self.database.get_bracket_match(round, position).await?.is_none() {
            let created = self
                .database
                .create_bracket_match(&NewBracketMatch::with_team1(round, position, team_id))
                .await?;
            if created {
                return Ok(true);
            }
            // Someone else created the slot in the meantime.
        }

        self.database
            .fill_slot_if_empty(round, position, proposal.side, team_id)
            .await
    }

    /// Moves the winner of one slot into its successor, if it is not there yet.
    pub async fn propagate_winner(
        &self,
        source: SlotId,
        winner_id: i32,
    ) -> Result<ApplyReport, EngineError> {
        if source.round == FINAL_ROUND {
            info!("Team {} won the final", winner_id);
            return Ok(ApplyReport::default());
        }

        let proposals: Vec<AdvancementProposal> = self
            .load_bracket()
            .await?
            .compute_advancements()
            .into_iter()
            .filter(|p| p.source == Some(source) && p.team_id == winner_id)
            .collect();

        self.apply_advancements(&proposals).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryDatabase;
    use crate::database::models::MatchStatus;
    use crate::database::{BracketDatabase, MatchDatabase};
    use crate::engine::EngineSettings;

    fn slot(id: i32, round: i32, position: i32, teams: (Option<i32>, Option<i32>)) -> Match {
        Match {
            id,
            match_type: MatchType::Playoff,
            playoff_round: Some(round),
            bracket_pos: Some(position),
            team1_id: teams.0,
            team2_id: teams.1,
            ..Default::default()
        }
    }

    fn decided(id: i32, round: i32, position: i32, teams: (i32, i32), winner: i32) -> Match {
        Match {
            winner_id: Some(winner),
            status: MatchStatus::Completed,
            ..slot(id, round, position, (Some(teams.0), Some(teams.1)))
        }
    }

    async fn engine_with(matches: Vec<Match>) -> Engine<MemoryDatabase> {
        let db = MemoryDatabase::default();
        for game in matches {
            db.insert_match(game).await;
        }
        Engine::new(db, EngineSettings::default())
    }

    #[test]
    fn topology() {
        assert_eq!(slot_count(1), Some(8));
        assert_eq!(slot_count(3), Some(4));
        assert_eq!(slot_count(6), None);
        assert_eq!(slot_count(0), None);
        assert_eq!(round_name(4), "Semi-finals");
        assert_eq!(Bracket::default().slots().len(), 23);
    }

    #[test]
    fn successor_slots() {
        let next = |r, p| SlotId::new(r, p).successor();

        assert_eq!(next(1, 6), Some(SlotId::new(2, 6)));
        assert_eq!(next(2, 2), Some(SlotId::new(3, 2)));
        assert_eq!(next(2, 6), Some(SlotId::new(3, 2)));
        assert_eq!(next(3, 3), Some(SlotId::new(4, 1)));
        assert_eq!(next(4, 2), Some(SlotId::new(5, 1)));
        assert_eq!(next(5, 1), None);
        assert_eq!(next(3, 5), None);
    }

    #[test]
    fn slot_states() {
        let bracket = Bracket::from_matches(vec![
            slot(1, 1, 1, (None, None)),
            slot(2, 1, 2, (Some(3), None)),
            decided(3, 1, 3, (4, 5), 4),
            decided(4, 1, 4, (6, 7), 7),
            slot(5, 2, 4, (Some(7), None)),
        ]);

        assert_eq!(bracket.state(SlotId::new(1, 1)), SlotState::Empty);
        assert_eq!(bracket.state(SlotId::new(1, 2)), SlotState::Assigned);
        assert_eq!(bracket.state(SlotId::new(1, 3)), SlotState::Completed);
        assert_eq!(bracket.state(SlotId::new(1, 4)), SlotState::Propagated);
        assert_eq!(bracket.state(SlotId::new(1, 5)), SlotState::Empty);
    }

    #[test]
    fn duplicate_slots_keep_the_oldest_match() {
        let bracket = Bracket::from_matches(vec![
            slot(9, 3, 1, (Some(1), None)),
            slot(4, 3, 1, (Some(2), None)),
            slot(12, 7, 1, (Some(3), None)),
        ]);

        assert_eq!(bracket.get(SlotId::new(3, 1)).map(|m| m.id), Some(4));
        assert!(bracket.slots().iter().all(|s| s.game.as_ref().map_or(true, |g| g.id == 4)));
    }

    #[test]
    fn champion_is_the_winner_of_the_final() {
        let mut final_match = slot(1, 5, 1, (Some(3), Some(8)));
        assert_eq!(Bracket::from_matches(vec![final_match.clone()]).champion(), None);

        final_match.winner_id = Some(8);
        final_match.status = MatchStatus::Completed;
        let bracket = Bracket::from_matches(vec![final_match]);
        assert_eq!(bracket.champion(), Some(8));
        assert_eq!(bracket.state(SlotId::new(5, 1)), SlotState::Propagated);
    }

    #[test]
    fn feeders_of_one_slot_fill_team1_then_team2_in_a_single_pass() {
        let bracket = Bracket::from_matches(vec![
            decided(1, 2, 6, (20, 9), 9),
            decided(2, 2, 2, (7, 3), 7),
        ]);

        let proposals = bracket.compute_advancements();

        let placed: Vec<(SlotId, i32, Side)> = proposals
            .iter()
            .map(|p| (p.target, p.team_id, p.side))
            .collect();
        assert_eq!(
            placed,
            vec![
                (SlotId::new(3, 2), 7, Side::Team1),
                (SlotId::new(3, 2), 9, Side::Team2),
            ]
        );
        assert!(proposals.iter().all(|p| p.kind == AdvancementKind::Winner));
    }

    #[test]
    fn a_corrected_result_does_not_double_advance() {
        // Team 3 was advanced before the result was corrected in favour of team 7.
        let bracket = Bracket::from_matches(vec![
            decided(1, 2, 2, (7, 3), 7),
            slot(2, 3, 2, (Some(3), None)),
        ]);

        assert!(bracket.compute_advancements().is_empty());
    }

    #[test]
    fn byes_only_take_free_sides() {
        let bracket = Bracket::from_matches(vec![
            slot(1, 2, 1, (Some(40), None)),
            slot(2, 2, 2, (Some(41), Some(42))),
            slot(3, 2, 3, (None, Some(5))),
        ]);
        let seeds = [
            SeedAssignment { position: 1, team_id: 1 },
            SeedAssignment { position: 2, team_id: 2 },
            SeedAssignment { position: 3, team_id: 5 },
            SeedAssignment { position: 4, team_id: 6 },
        ];

        let proposals = bracket.bye_proposals(&seeds);

        let placed: Vec<(SlotId, i32, Side)> = proposals
            .iter()
            .map(|p| (p.target, p.team_id, p.side))
            .collect();
        assert_eq!(
            placed,
            vec![
                (SlotId::new(2, 1), 1, Side::Team2),
                (SlotId::new(2, 4), 6, Side::Team1),
            ]
        );
    }

    #[tokio::test]
    async fn winner_fills_team1_then_the_next_feeder_fills_team2() {
        let engine = engine_with(vec![
            decided(1, 2, 2, (7, 3), 7),
            slot(2, 3, 2, (None, None)),
        ])
        .await;

        let proposals = engine.propose_advancements().await.unwrap();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].target, SlotId::new(3, 2));
        assert_eq!(proposals[0].team_id, 7);
        assert_eq!(proposals[0].side, Side::Team1);
        engine.apply_advancements(&proposals).await.unwrap();

        engine
            .database()
            .insert_match(decided(3, 2, 6, (9, 11), 9))
            .await;

        let proposals = engine.propose_advancements().await.unwrap();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].team_id, 9);
        assert_eq!(proposals[0].side, Side::Team2);
    }

    #[tokio::test]
    async fn applying_twice_is_the_same_as_once() {
        let engine = engine_with(vec![
            decided(1, 1, 1, (1, 2), 1),
            decided(2, 1, 2, (3, 4), 4),
            decided(3, 2, 3, (5, 6), 6),
        ])
        .await;

        let proposals = engine.propose_advancements().await.unwrap();
        assert_eq!(proposals.len(), 3);

        let first = engine.apply_advancements(&proposals).await.unwrap();
        assert_eq!(first.applied.len(), 3);
        let after_once = engine.database().snapshot().await;

        let second = engine.apply_advancements(&proposals).await.unwrap();
        assert!(second.applied.is_empty());
        assert_eq!(second.skipped.len(), 3);
        assert_eq!(engine.database().snapshot().await, after_once);

        assert!(engine.propose_advancements().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_applies_fill_each_side_once() {
        let engine = engine_with(vec![
            decided(1, 2, 2, (7, 3), 7),
            decided(2, 2, 6, (9, 11), 9),
        ])
        .await;
        let proposals = engine.propose_advancements().await.unwrap();
        assert_eq!(proposals.len(), 2);
        assert!(proposals.iter().all(|p| p.target == SlotId::new(3, 2)));

        // A manual apply racing the auto-advancer on the same proposals.
        let (a, b) = tokio::join!(
            engine.apply_advancements(&proposals),
            engine.apply_advancements(&proposals)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.applied.len() + b.applied.len(), 2);
        assert_eq!(a.skipped.len() + b.skipped.len(), 2);
        let target = engine.database().get_bracket_match(3, 2).await.unwrap().unwrap();
        assert_eq!((target.team1_id, target.team2_id), (Some(7), Some(9)));
        assert_eq!(engine.database().snapshot().await.matches.len(), 3);
    }

    #[tokio::test]
    async fn invalid_targets_fail_before_any_write() {
        let engine = engine_with(vec![decided(1, 1, 1, (1, 2), 1)]).await;
        let mut proposals = engine.propose_advancements().await.unwrap();
        let mut bogus = proposals[0].clone();
        bogus.target = SlotId::new(6, 1);
        proposals.push(bogus);

        let err = engine.apply_advancements(&proposals).await.unwrap_err();

        assert_eq!(
            err.downcast_ref::<CommonError>(),
            Some(&CommonError::SlotNotExists {
                round: 6,
                position: 1
            })
        );
        assert!(engine.database().get_bracket_match(2, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_proposals_are_skipped() {
        let engine = engine_with(vec![
            decided(1, 3, 1, (1, 2), 1),
            slot(2, 4, 1, (None, None)),
        ])
        .await;
        let proposals = engine.propose_advancements().await.unwrap();

        // An admin fills the slot between compute and apply.
        engine
            .database()
            .fill_slot_if_empty(4, 1, Side::Team1, 30)
            .await
            .unwrap();
        let report = engine.apply_advancements(&proposals).await.unwrap();

        assert!(report.applied.is_empty());
        let target = engine.database().get_bracket_match(4, 1).await.unwrap().unwrap();
        assert_eq!((target.team1_id, target.team2_id), (Some(30), None));
    }

    #[tokio::test]
    async fn round1_slots_are_created_once() {
        let engine = engine_with(vec![slot(1, 1, 3, (Some(5), Some(6)))]).await;

        assert_eq!(engine.create_round1_slots().await.unwrap(), 7);
        assert_eq!(engine.create_round1_slots().await.unwrap(), 0);

        let bracket = engine.load_bracket().await.unwrap();
        let kept = bracket.get(SlotId::new(1, 3)).unwrap();
        assert_eq!((kept.team1_id, kept.team2_id), (Some(5), Some(6)));
    }

    #[tokio::test]
    async fn byes_are_seeded_without_overwriting() {
        let engine = engine_with(vec![slot(1, 2, 1, (Some(100), None))]).await;
        let seeds = [
            SeedAssignment { position: 1, team_id: 1 },
            SeedAssignment { position: 2, team_id: 2 },
        ];

        let report = engine.seed_round2_byes(&seeds).await.unwrap();
        assert_eq!(report.applied.len(), 2);

        let db = engine.database();
        let first = db.get_bracket_match(2, 1).await.unwrap().unwrap();
        assert_eq!((first.team1_id, first.team2_id), (Some(100), Some(1)));
        let second = db.get_bracket_match(2, 2).await.unwrap().unwrap();
        assert_eq!((second.team1_id, second.team2_id), (Some(2), None));

        assert!(engine.seed_round2_byes(&seeds).await.unwrap().is_empty());

        let out_of_range = [SeedAssignment { position: 9, team_id: 3 }];
        assert!(engine.seed_round2_byes(&out_of_range).await.is_err());
    }

    #[tokio::test]
    async fn assign_slot_checks_the_match() {
        let mut regular = slot(2, 1, 1, (Some(1), Some(2)));
        regular.match_type = MatchType::Regular;
        let engine = engine_with(vec![slot(1, 3, 1, (Some(5), None)), regular]).await;

        let updated = engine.assign_slot(1, Side::Team2, Some(8)).await.unwrap();
        assert_eq!((updated.team1_id, updated.team2_id), (Some(5), Some(8)));

        let cleared = engine.assign_slot(1, Side::Team1, None).await.unwrap();
        assert_eq!(cleared.team1_id, None);

        let errors = [
            engine.assign_slot(99, Side::Team1, Some(3)).await.unwrap_err(),
            engine.assign_slot(2, Side::Team1, Some(3)).await.unwrap_err(),
            engine.assign_slot(1, Side::Team1, Some(8)).await.unwrap_err(),
        ];
        let errors: Vec<Option<&CommonError>> =
            errors.iter().map(|e| e.downcast_ref::<CommonError>()).collect();
        assert_eq!(
            errors,
            vec![
                Some(&CommonError::MatchNotExists(99)),
                Some(&CommonError::NotAPlayoffMatch(2)),
                Some(&CommonError::SideOccupied {
                    match_id: 1,
                    side: Side::Team1
                }),
            ]
        );
    }

    #[tokio::test]
    async fn admin_upsert_overwrites_the_slot() {
        let engine = engine_with(vec![slot(1, 4, 2, (Some(1), Some(2)))]).await;
        let patch = BracketPatch {
            team1_id: Some(3),
            team2_id: None,
            format: Some("BO5".to_string()),
            bracket_label: Some("SF2".to_string()),
        };

        engine.upsert_bracket_match(SlotId::new(4, 2), &patch).await.unwrap();
        assert!(engine
            .upsert_bracket_match(SlotId::new(4, 3), &patch)
            .await
            .is_err());

        let game = engine.database().get_match(1).await.unwrap().unwrap();
        assert_eq!((game.team1_id, game.team2_id), (Some(3), None));
        assert_eq!(game.format.as_deref(), Some("BO5"));
    }

    #[tokio::test]
    async fn winners_reach_the_final() {
        let engine = engine_with(vec![
            decided(1, 4, 1, (1, 2), 1),
            decided(2, 4, 2, (3, 4), 4),
        ])
        .await;

        let report = engine.propagate_winner(SlotId::new(4, 2), 4).await.unwrap();
        assert_eq!(report.applied.len(), 1);

        let final_match = engine.database().get_bracket_match(5, 1).await.unwrap().unwrap();
        assert_eq!((final_match.team1_id, final_match.team2_id), (Some(4), None));

        // Only the signalled slot moves, and its winner cannot land twice.
        let report = engine.propagate_winner(SlotId::new(4, 2), 4).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(engine.propose_advancements().await.unwrap().len(), 1);
    }
}
