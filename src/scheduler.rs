use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::database::Database;
use crate::engine::bracket::ApplyReport;
use crate::engine::Engine;
use crate::EngineError;

/// When and how often winners are advanced without an admin in the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoAdvanceConfig {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for AutoAdvanceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(30),
        }
    }
}

/// The outcome of one compute-then-apply pass.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub ran_at: DateTime<Utc>,
    pub proposed: usize,
    pub report: ApplyReport,
}

/// Periodically proposes and applies bracket advancements.
///
/// Every pass is a full recomputation, so once the bracket has caught up further passes write
/// nothing.
pub struct AutoAdvancer<'a, DB> {
    engine: &'a Engine<DB>,
    config: AutoAdvanceConfig,
}

impl<'a, DB> AutoAdvancer<'a, DB>
where
    DB: Database,
{
    pub fn new(engine: &'a Engine<DB>, config: AutoAdvanceConfig) -> Self {
        Self { engine, config }
    }

    /// Runs a single pass.
    pub async fn tick(&self) -> Result<TickReport, EngineError> {
        let ran_at = Utc::now();
        let proposals = self.engine.propose_advancements().await?;
        let report = self.engine.apply_advancements(&proposals).await?;

        if !report.applied.is_empty() {
            info!(
                "Auto-advance applied {} of {} proposal(s)",
                report.applied.len(),
                proposals.len()
            );
        }

        Ok(TickReport {
            ran_at,
            proposed: proposals.len(),
            report,
        })
    }

    /// Runs passes on the configured interval until the token is cancelled.
    ///
    /// A failed pass is logged and the next one runs as usual. Returns how many passes ran.
    pub async fn run(&self, shutdown: CancellationToken) -> usize {
        if !self.config.enabled {
            info!("Auto-advance is disabled");
            return 0;
        }

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut passes = 0;

        info!("Auto-advancing every {:?}", self.config.interval);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    passes += 1;
                    let span = info_span!("auto_advance", pass = passes);
                    if let Err(e) = self.tick().instrument(span).await {
                        error!("Auto-advance pass {} failed: {}", passes, e);
                    }
                }
            }
        }

        info!("Auto-advance stopped after {} pass(es)", passes);
        passes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryDatabase;
    use crate::database::models::{Match, MatchStatus, MatchType};
    use crate::database::BracketDatabase;
    use crate::engine::EngineSettings;

    fn decided(id: i32, round: i32, position: i32, winner: i32, loser: i32) -> Match {
        Match {
            id,
            match_type: MatchType::Playoff,
            playoff_round: Some(round),
            bracket_pos: Some(position),
            team1_id: Some(winner),
            team2_id: Some(loser),
            winner_id: Some(winner),
            status: MatchStatus::Completed,
            ..Default::default()
        }
    }

    async fn engine() -> Engine<MemoryDatabase> {
        let db = MemoryDatabase::default();
        db.insert_match(decided(1, 3, 1, 10, 11)).await;
        db.insert_match(decided(2, 3, 3, 12, 13)).await;
        Engine::new(db, EngineSettings::default())
    }

    #[tokio::test]
    async fn passes_converge() {
        let engine = engine().await;
        let advancer = AutoAdvancer::new(&engine, AutoAdvanceConfig::default());

        let first = advancer.tick().await.unwrap();
        assert_eq!(first.proposed, 2);
        assert_eq!(first.report.applied.len(), 2);

        let second = advancer.tick().await.unwrap();
        assert_eq!(second.proposed, 0);
        assert!(second.report.is_empty());
        assert!(second.ran_at >= first.ran_at);

        let semi = engine.database().get_bracket_match(4, 1).await.unwrap().unwrap();
        assert_eq!((semi.team1_id, semi.team2_id), (Some(10), Some(12)));
    }

    #[tokio::test]
    async fn disabled_config_returns_immediately() {
        let engine = engine().await;
        let advancer = AutoAdvancer::new(&engine, AutoAdvanceConfig::default());

        assert_eq!(advancer.run(CancellationToken::new()).await, 0);
        assert!(engine.database().get_bracket_match(4, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_loop() {
        let engine = engine().await;
        let config = AutoAdvanceConfig {
            enabled: true,
            interval: Duration::from_millis(10),
        };
        let advancer = AutoAdvancer::new(&engine, config);

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        assert_eq!(advancer.run(shutdown).await, 0);
    }

    #[tokio::test]
    async fn runs_until_cancelled() {
        let engine = engine().await;
        let config = AutoAdvanceConfig {
            enabled: true,
            interval: Duration::from_millis(10),
        };
        let advancer = AutoAdvancer::new(&engine, config);
        let shutdown = CancellationToken::new();

        let stop = {
            let shutdown = shutdown.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                shutdown.cancel();
            }
        };
        let (passes, ()) = tokio::join!(advancer.run(shutdown), stop);

        assert!(passes >= 1);
        let semi = engine.database().get_bracket_match(4, 1).await.unwrap().unwrap();
        assert_eq!((semi.team1_id, semi.team2_id), (Some(10), Some(12)));
    }
}
