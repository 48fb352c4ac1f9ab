use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, level_filters::LevelFilter, warn};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use league_engine::config::Settings;
use league_engine::database::memory::{MemoryDatabase, Snapshot};
use league_engine::database::models::{BracketPatch, MapResult, MatchFilter, MatchStatus, Side};
use league_engine::database::{Database, PgDatabase};
use league_engine::engine::bracket::{AdvancementProposal, SlotId};
use league_engine::engine::standings::{bye_seeds, playoff_races};
use league_engine::render;
use league_engine::scheduler::AutoAdvancer;
use league_engine::{Engine, EngineError};

#[derive(clap::Parser)]
#[clap(version, about = "Match resolution, standings and playoff progression for the league")]
struct Args {
    /// Work on a JSON snapshot instead of Postgres. Mutating commands write it back.
    #[clap(long, global = true)]
    snapshot: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Apply pending database migrations.
    Migrate,
    /// Recompute a match's score from its saved maps.
    Resolve { match_id: i32 },
    /// Save per-map results from a JSON file and resolve the match.
    SaveMaps { match_id: i32, file: PathBuf },
    /// Record a forfeit in favour of the given team.
    Forfeit { match_id: i32, winner_id: i32 },
    /// Show the group tables.
    Standings {
        #[clap(long)]
        group: Option<String>,
    },
    /// Show teams that can still reach the playoffs with their last match.
    Races,
    /// List matches, regular season unless `--playoff` is given.
    Matches {
        #[clap(long)]
        week: Option<i32>,
        #[clap(long)]
        status: Option<MatchStatus>,
        #[clap(long)]
        playoff: bool,
    },
    /// Show every bracket slot.
    Bracket,
    /// Create the missing round 1 matches.
    InitBracket,
    /// Seed every group's top two into round 2.
    SeedByes,
    /// Set or clear one side of a playoff match.
    Assign {
        match_id: i32,
        side: Side,
        team_id: Option<i32>,
    },
    /// Create or overwrite the match in a bracket slot.
    EditSlot {
        round: i32,
        position: i32,
        #[clap(long)]
        team1: Option<i32>,
        #[clap(long)]
        team2: Option<i32>,
        #[clap(long)]
        format: Option<String>,
        #[clap(long)]
        label: Option<String>,
    },
    /// List pending winner advancements without applying them.
    Propose {
        #[clap(long)]
        json: bool,
    },
    /// Apply advancements, either freshly computed or read from a JSON file.
    Apply {
        #[clap(long)]
        file: Option<PathBuf>,
    },
    /// Keep advancing winners on the configured interval until interrupted.
    AutoAdvance {
        /// Run a single pass and exit.
        #[clap(long)]
        once: bool,
        #[clap(long)]
        interval_secs: Option<u64>,
    },
}

impl Command {
    fn mutates(&self) -> bool {
        !matches!(
            self,
            Command::Migrate
                | Command::Standings { .. }
                | Command::Races
                | Command::Matches { .. }
                | Command::Bracket
                | Command::Propose { .. }
        )
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => panic!("Error trying to load settings: {}", e),
    };

    if let Err(e) = setup_tracing(&settings.log_file) {
        panic!("Error trying to setup tracing: {}", e);
    }

    if let Err(e) = run(args, settings).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Picks the backend and runs the command against it.
async fn run(args: Args, settings: Settings) -> Result<(), EngineError> {
    let setup_span = info_span!("engine_setup");
    let guard = setup_span.enter();

    if let Some(path) = args.snapshot {
        let database = MemoryDatabase::new(load_snapshot(&path)?);
        let engine = Engine::new(database, settings.engine_settings());
        drop(guard);

        if matches!(args.command, Command::Migrate) {
            warn!("Snapshots have no schema to migrate");
            return Ok(());
        }
        let mutates = args.command.mutates();
        execute(&engine, &settings, args.command).await?;

        if mutates {
            let snapshot = engine.database().snapshot().await;
            std::fs::write(&path, serde_json::to_string_pretty(&snapshot)?)?;
            info!("Wrote snapshot to {}", path.display());
        }
        return Ok(());
    }

    let database = PgDatabase::connect(settings.database_url()?).await?;
    if matches!(args.command, Command::Migrate) {
        database.migrate().await?;
        info!("Migrations applied");
        return Ok(());
    }
    let engine = Engine::new(database, settings.engine_settings());
    drop(guard);

    execute(&engine, &settings, args.command).await
}

fn load_snapshot(path: &Path) -> Result<Snapshot, EngineError> {
    if !path.exists() {
        info!("{} does not exist yet, starting from an empty snapshot", path.display());
        return Ok(Snapshot::default());
    }

    Ok(serde_json::from_reader(File::open(path)?)?)
}

async fn execute<DB>(
    engine: &Engine<DB>,
    settings: &Settings,
    command: Command,
) -> Result<(), EngineError>
where
    DB: Database,
{
    let names = render::team_names(&engine.database().list_teams(None).await?);

    match command {
        Command::Migrate => {}
        Command::Resolve { match_id } => match engine.resolve_match(match_id).await? {
            Some(outcome) => println!(
                "Match {}: {}-{}, winner {}",
                match_id,
                outcome.score_t1,
                outcome.score_t2,
                outcome
                    .winner_id
                    .map_or("none".to_string(), |id| id.to_string())
            ),
            None => println!("Match {} has no maps, stored score kept", match_id),
        },
        Command::SaveMaps { match_id, file } => {
            let mut maps: Vec<MapResult> = serde_json::from_reader(File::open(file)?)?;
            for map in &mut maps {
                map.match_id = match_id;
            }
            engine.save_maps(match_id, &maps).await?;
            println!("Saved {} map(s) for match {}", maps.len(), match_id);
        }
        Command::Forfeit {
            match_id,
            winner_id,
        } => {
            engine.record_forfeit(match_id, winner_id).await?;
            println!("Match {} forfeited to team {}", match_id, winner_id);
        }
        Command::Standings { group } => {
            for (group, rows) in engine.get_standings(group.as_deref()).await? {
                println!("Group {}", group);
                render::standings_table(&rows).printstd();
            }
        }
        Command::Races => {
            let races = playoff_races(&engine.get_standings(None).await?);
            if races.is_empty() {
                println!("No playoff races");
            } else {
                render::races_table(&races).printstd();
            }
        }
        Command::Matches {
            week,
            status,
            playoff,
        } => {
            let filter = if playoff {
                MatchFilter::playoff()
            } else {
                MatchFilter::regular()
            }
            .in_week(week)
            .with_status(status);
            let matches = engine.database().list_matches(&filter).await?;
            if matches.is_empty() {
                println!("No matches");
            } else {
                render::matches_table(&matches, &names).printstd();
            }
        }
        Command::Bracket => {
            let bracket = engine.load_bracket().await?;
            render::bracket_table(&bracket.slots(), &names).printstd();
            if let Some(champion) = bracket.champion() {
                println!(
                    "Champion: {}",
                    names.get(&champion).cloned().unwrap_or(champion.to_string())
                );
            }
        }
        Command::InitBracket => {
            let created = engine.create_round1_slots().await?;
            println!("Created {} round 1 match(es)", created);
        }
        Command::SeedByes => {
            let seeds = bye_seeds(&engine.get_standings(None).await?);
            let report = engine.seed_round2_byes(&seeds).await?;
            render::proposals_table(&report.applied, &names).printstd();
            println!(
                "Seeded {} team(s), {} already in place",
                report.applied.len(),
                seeds.len() - report.applied.len()
            );
        }
        Command::Assign {
            match_id,
            side,
            team_id,
        } => {
            let game = engine.assign_slot(match_id, side, team_id).await?;
            println!(
                "Match {}: {} vs {}",
                game.id,
                game.team1_id.map_or("TBD".to_string(), |id| id.to_string()),
                game.team2_id.map_or("TBD".to_string(), |id| id.to_string())
            );
        }
        Command::EditSlot {
            round,
            position,
            team1,
            team2,
            format,
            label,
        } => {
            let slot = SlotId::new(round, position);
            let patch = BracketPatch {
                team1_id: team1,
                team2_id: team2,
                format,
                bracket_label: label,
            };
            engine.upsert_bracket_match(slot, &patch).await?;
            println!("Updated {}", slot);
        }
        Command::Propose { json } => {
            let proposals = engine.propose_advancements().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&proposals)?);
            } else if proposals.is_empty() {
                println!("Nothing to advance");
            } else {
                render::proposals_table(&proposals, &names).printstd();
            }
        }
        Command::Apply { file } => {
            let proposals: Vec<AdvancementProposal> = match file {
                Some(file) => serde_json::from_reader(File::open(file)?)?,
                None => engine.propose_advancements().await?,
            };
            let report = engine.apply_advancements(&proposals).await?;
            render::proposals_table(&report.applied, &names).printstd();
            println!(
                "Applied {}, skipped {}",
                report.applied.len(),
                report.skipped.len()
            );
        }
        Command::AutoAdvance {
            once,
            interval_secs,
        } => {
            let mut config = settings.auto_advance;
            if let Some(secs) = interval_secs {
                config.interval = Duration::from_secs(secs.max(1));
            }
            let advancer = AutoAdvancer::new(engine, config);

            if once {
                let tick = advancer.tick().await?;
                println!(
                    "{}: applied {} of {} proposal(s)",
                    tick.ran_at.to_rfc3339(),
                    tick.report.applied.len(),
                    tick.proposed
                );
                return Ok(());
            }

            let shutdown = CancellationToken::new();
            let ctrl_c = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Error waiting for Ctrl-C: {}", e);
                }
                ctrl_c.cancel();
            });
            advancer.run(shutdown).await;
        }
    }

    Ok(())
}

/// Sets up the tracing subscriber for the engine.
fn setup_tracing(log_file: &str) -> Result<(), EngineError> {
    if cfg!(debug_assertions) {
        let filter = EnvFilter::from_default_env()
            .add_directive("none".parse()?)
            .add_directive("league_engine=info".parse()?);

        tracing_subscriber::fmt::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::NONE)
            .pretty()
            .init();

        return Ok(());
    }

    let log_file = File::create(log_file)?;

    // Only errors are logged in production
    tracing_subscriber::fmt::fmt()
        .with_span_events(FmtSpan::NONE)
        .with_max_level(LevelFilter::ERROR)
        .with_writer(log_file)
        .pretty()
        .init();

    Ok(())
}
