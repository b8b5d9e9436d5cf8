//! Binary entrypoint for the Veramon quest engine CLI.
//!
//! Commands:
//! - `init` - create a starter `config.toml` and seed definition directories
//! - `start [--no-stdin]` - run background sweeps and read gameplay events from stdin
//! - `status` - print catalog, event and counter summaries
//! - `validate` - load all definitions and report broken cross references
//! - `progress --user <id> [--quest <id>]` - show a user's quests
//! - `emit --user <id> --kind <kind> [--amount n] [--target t]` - dispatch one gameplay event
//! - `activate` / `claim` / `abandon --user <id> --quest <id>` - quest lifecycle
//! - `contribute --user <id> --event <id> --amount n [--kind k]` - community goal contribution
//! - `event <id> [--top n]` - one event's status, goal and leading contributors
//! - `reset --user <id>` - wipe a user's quest progress
//! - `define quest|event <file>` / `undefine quest|event <id>` - edit definitions on disk
//!
//! See the library crate docs for module-level details: `veramon::`.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use veramon::config::Config;
use veramon::metrics;
use veramon::quests::{
    cross_reference_problems, format_claim, format_community_progress, format_dispatch_report,
    format_event_line, format_quest_list, format_quest_progress, AbandonOutcome,
    ActivateOutcome, ClaimOutcome, ContributionOutcome, EventCatalog, EventDefinition,
    EventSweeper, GameplayEvent, QuestCatalog, QuestDefinition, QuestService, RefreshScheduler,
    RequirementKind,
};

#[derive(Parser)]
#[command(name = "veramon")]
#[command(about = "Quest and event progress engine for Veramon Reunited")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and seed definition directories
    Init,
    /// Run background sweeps and process gameplay events from stdin
    Start {
        /// Only run sweeps; ignore stdin
        #[arg(long)]
        no_stdin: bool,
    },
    /// Show catalog, event and counter summaries
    Status,
    /// Load every definition and report problems
    Validate,
    /// Show a user's quest progress
    Progress {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        quest: Option<String>,
    },
    /// Dispatch one gameplay event for a user
    Emit {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        kind: RequirementKind,
        #[arg(short, long, default_value_t = 1)]
        amount: u32,
        #[arg(short, long)]
        target: Option<String>,
    },
    /// Start a quest for a user
    Activate {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        quest: String,
    },
    /// Claim a completed quest's rewards
    Claim {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        quest: String,
    },
    /// Give up on an active quest
    Abandon {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        quest: String,
    },
    /// Contribute directly to an event's community goal
    Contribute {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        event: String,
        #[arg(short, long)]
        amount: u64,
        /// Defaults to the goal's own kind
        #[arg(short, long)]
        kind: Option<RequirementKind>,
    },
    /// Show one event's status, community goal and top contributors
    Event {
        id: String,
        #[arg(short, long, default_value_t = 10)]
        top: usize,
    },
    /// Wipe a user's quest progress
    Reset {
        #[arg(short, long)]
        user: String,
    },
    /// Add or replace a definition from a JSON file
    Define {
        #[arg(value_enum)]
        what: DefinitionKind,
        file: PathBuf,
    },
    /// Remove a definition from disk
    Undefine {
        #[arg(value_enum)]
        what: DefinitionKind,
        id: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DefinitionKind {
    Quest,
    Event,
}

/// Definitions written by `init` when the target file does not exist yet.
const SEED_FILES: &[(&str, &str)] = &[
    ("quests/daily/daily.json", include_str!("../seeds/quests/daily/daily.json")),
    ("quests/weekly/weekly.json", include_str!("../seeds/quests/weekly/weekly.json")),
    ("quests/story/chapter1.json", include_str!("../seeds/quests/story/chapter1.json")),
    (
        "quests/achievement/collector.json",
        include_str!("../seeds/quests/achievement/collector.json"),
    ),
    ("quests/event/harvest.json", include_str!("../seeds/quests/event/harvest.json")),
    (
        "events/harvest_festival.json",
        include_str!("../seeds/events/harvest_festival.json"),
    ),
    ("events/winter_lights.json", include_str!("../seeds/events/winter_lights.json")),
];

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Init => {
            info!("Initializing new Veramon configuration");
            let cfg = Config::default();
            if Path::new(&cli.config).exists() {
                warn!("{} already exists; leaving it untouched", cli.config);
            } else {
                Config::create_default(&cli.config).await?;
                info!("Configuration file created at {}", cli.config);
            }
            seed_definitions(&cfg).await?;
            tokio::fs::create_dir_all(&cfg.storage.data_dir).await?;
            info!("Initialized data directory at {}", cfg.storage.data_dir);
        }
        Commands::Start { no_stdin } => {
            let config = match pre_config {
                Some(cfg) => cfg,
                None => Config::load(&cli.config).await?,
            };
            info!("Starting Veramon quest engine v{}", env!("CARGO_PKG_VERSION"));
            let service = Arc::new(QuestService::open(&config)?);
            run(service, config, no_stdin).await?;
        }
        Commands::Status => {
            let config = load_config(pre_config, &cli.config).await?;
            let service = QuestService::open(&config)?;
            show_status(&service, &config).await?;
        }
        Commands::Validate => {
            let config = load_config(pre_config, &cli.config).await?;
            let quests = QuestCatalog::load(&config.quests.definitions_dir)?;
            let events = EventCatalog::load(&config.events.definitions_dir)?;
            println!(
                "Loaded {} quest(s) from {} and {} event(s) from {}",
                quests.len(),
                config.quests.definitions_dir,
                events.len(),
                config.events.definitions_dir
            );
            let problems = cross_reference_problems(&quests, &events);
            if problems.is_empty() {
                println!("No problems found.");
            } else {
                for problem in &problems {
                    println!("  {}", problem);
                }
                println!("{} problem(s) found.", problems.len());
                std::process::exit(1);
            }
        }
        Commands::Progress { user, quest } => {
            let config = load_config(pre_config, &cli.config).await?;
            let service = QuestService::open(&config)?;
            let now = Utc::now();
            match quest {
                Some(quest_id) => match service.quest_progress_at(&user, &quest_id, now).await? {
                    Some(view) => println!("{}", format_quest_progress(&view)),
                    None => println!("Unknown quest: {}", quest_id),
                },
                None => {
                    let active = service.active_quests_at(&user, now).await?;
                    if active.is_empty() {
                        println!("No active quests.");
                    }
                    for view in &active {
                        println!("{}", format_quest_progress(view));
                    }
                    let available = service.available_quests_at(&user, now).await?;
                    if !available.is_empty() {
                        for message in format_quest_list("AVAILABLE QUESTS", &available) {
                            println!("{}", message);
                        }
                    }
                }
            }
        }
        Commands::Emit {
            user,
            kind,
            amount,
            target,
        } => {
            let config = load_config(pre_config, &cli.config).await?;
            let service = QuestService::open(&config)?;
            let mut event = GameplayEvent::new(kind).with_amount(amount);
            if let Some(target) = &target {
                event = event.with_target(target);
            }
            let report = service.on_gameplay_event(&user, event).await?;
            let lines = format_dispatch_report(&report);
            if lines.is_empty() {
                println!("No quest progress.");
            }
            for line in lines {
                println!("{}", line);
            }
        }
        Commands::Activate { user, quest } => {
            let config = load_config(pre_config, &cli.config).await?;
            let service = QuestService::open(&config)?;
            match service.activate(&user, &quest).await? {
                ActivateOutcome::Activated => println!("Quest {} started.", quest),
                ActivateOutcome::QuestNotFound => println!("Unknown quest: {}", quest),
                ActivateOutcome::EventNotActive => {
                    println!("Quest {} belongs to an event that is not running.", quest)
                }
                ActivateOutcome::Rejected(status) => {
                    println!("Quest {} cannot be started right now ({}).", quest, status)
                }
            }
        }
        Commands::Claim { user, quest } => {
            let config = load_config(pre_config, &cli.config).await?;
            let service = QuestService::open(&config)?;
            match service.claim(&user, &quest).await? {
                ClaimOutcome::Claimed(receipt) => println!("{}", format_claim(&receipt)),
                ClaimOutcome::QuestNotFound => println!("Unknown quest: {}", quest),
                ClaimOutcome::NotCompleted(status) => {
                    println!("Quest {} is not ready to claim ({}).", quest, status)
                }
            }
        }
        Commands::Abandon { user, quest } => {
            let config = load_config(pre_config, &cli.config).await?;
            let service = QuestService::open(&config)?;
            match service.abandon(&user, &quest).await? {
                AbandonOutcome::Abandoned => println!("Quest {} abandoned.", quest),
                AbandonOutcome::QuestNotFound => println!("Unknown quest: {}", quest),
                AbandonOutcome::NotActive(status) => {
                    println!("Quest {} is not active ({}).", quest, status)
                }
            }
        }
        Commands::Contribute {
            user,
            event,
            amount,
            kind,
        } => {
            let config = load_config(pre_config, &cli.config).await?;
            let service = QuestService::open(&config)?;
            let kind = match kind {
                Some(kind) => kind,
                None => service
                    .events()
                    .get(&event)
                    .await
                    .and_then(|e| e.community_goal.map(|g| g.kind))
                    .unwrap_or(RequirementKind::Catch),
            };
            match service.events().contribute(&user, &event, amount, kind).await? {
                ContributionOutcome::Recorded {
                    total,
                    target,
                    goal_reached,
                } => {
                    println!("Contributed {} to {} ({}/{}).", amount, event, total, target);
                    if goal_reached {
                        println!("Community goal reached!");
                    }
                }
                ContributionOutcome::EventNotFound => println!("Unknown event: {}", event),
                ContributionOutcome::EventNotActive(status) => {
                    println!("Event {} is {}.", event, status)
                }
                ContributionOutcome::NoCommunityGoal => {
                    println!("Event {} has no community goal.", event)
                }
            }
        }
        Commands::Event { id, top } => {
            let config = load_config(pre_config, &cli.config).await?;
            let service = QuestService::open(&config)?;
            show_event(&service, &id, top).await?;
        }
        Commands::Reset { user } => {
            let config = load_config(pre_config, &cli.config).await?;
            let service = QuestService::open(&config)?;
            if service.reset_user(&user).await? {
                println!("Progress for {} wiped.", user);
            } else {
                println!("No stored progress for {}.", user);
            }
        }
        Commands::Define { what, file } => {
            let config = load_config(pre_config, &cli.config).await?;
            let service = QuestService::open(&config)?;
            let text = tokio::fs::read_to_string(&file).await?;
            match what {
                DefinitionKind::Quest => {
                    let definition: QuestDefinition = serde_json::from_str(&text)?;
                    let id = definition.id.clone();
                    service.upsert_quest(definition).await?;
                    println!("Quest {} saved.", id);
                }
                DefinitionKind::Event => {
                    let definition: EventDefinition = serde_json::from_str(&text)?;
                    let id = definition.id.clone();
                    service.events().upsert(definition).await?;
                    println!("Event {} saved.", id);
                }
            }
        }
        Commands::Undefine { what, id } => {
            let config = load_config(pre_config, &cli.config).await?;
            let service = QuestService::open(&config)?;
            let removed = match what {
                DefinitionKind::Quest => service.remove_quest(&id).await?,
                DefinitionKind::Event => service.remove_event(&id).await?,
            };
            if removed {
                println!("{} removed.", id);
            } else {
                println!("Unknown definition: {}", id);
            }
        }
    }

    Ok(())
}

async fn load_config(pre_config: Option<Config>, path: &str) -> Result<Config> {
    match pre_config {
        Some(cfg) => Ok(cfg),
        None => Config::load(path).await,
    }
}

async fn seed_definitions(config: &Config) -> Result<()> {
    for (relative, body) in SEED_FILES {
        let (root, rest) = match relative.split_once('/') {
            Some(("quests", rest)) => (&config.quests.definitions_dir, rest),
            Some((_, rest)) => (&config.events.definitions_dir, rest),
            None => continue,
        };
        let path = Path::new(root).join(rest);
        if path.exists() {
            continue;
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, body).await?;
        info!("Seeded {}", path.display());
    }
    Ok(())
}

async fn show_status(service: &QuestService, config: &Config) -> Result<()> {
    let now = Utc::now();
    println!("{} quest engine v{}", config.bot.name, env!("CARGO_PKG_VERSION"));
    println!(
        "Definitions: {} quest(s), {} event(s)",
        service.quest_count().await,
        service.events().len().await
    );
    println!("Tracked users: {}", service.store().list_user_ids()?.len());

    let active = service.events().active_at(now).await;
    println!("Active events: {}", active.len());
    for event in &active {
        println!("  {}", format_event_line(event, now));
        if let Some(progress) = service.events().community_progress(&event.id).await? {
            println!("    {}", format_community_progress(&progress));
        }
    }
    let upcoming = service.events().upcoming_at(now).await;
    println!("Upcoming events: {}", upcoming.len());
    for event in &upcoming {
        println!("  {}", format_event_line(event, now));
    }
    let ended = service
        .events()
        .recently_ended_at(config.events.recently_ended_window(), now)
        .await;
    println!("Recently ended: {}", ended.len());
    for event in &ended {
        println!("  {}", format_event_line(event, now));
    }

    let counters = metrics::snapshot();
    println!(
        "Counters: events={} updates={} completed={} claimed={} expired={} failures={}",
        counters.gameplay_events,
        counters.progress_updates,
        counters.quests_completed,
        counters.quests_claimed,
        counters.quests_expired,
        counters.dispatch_failures
    );
    let mut per_event: Vec<_> = metrics::event_counters_snapshot().into_iter().collect();
    per_event.sort_by(|a, b| a.0.cmp(&b.0));
    for (event_id, counter) in per_event {
        println!(
            "  {}: {} contribution(s), {} total",
            event_id, counter.contributions, counter.amount
        );
    }
    Ok(())
}

async fn show_event(service: &QuestService, event_id: &str, top: usize) -> Result<()> {
    let now = Utc::now();
    let Some(event) = service.events().get(event_id).await else {
        println!("Unknown event: {}", event_id);
        return Ok(());
    };
    println!("{}", format_event_line(&event, now));
    if let Some(status) = service.events().get_status(event_id).await {
        println!("Status: {}", status);
    }
    match service.events().community_progress(event_id).await? {
        Some(progress) => println!("{}", format_community_progress(&progress)),
        None => println!("No community goal."),
    }
    let leaders = service.events().top_contributors(event_id, top).await?;
    for (rank, (user, amount)) in leaders.iter().enumerate() {
        println!("  {}. {} ({})", rank + 1, user, amount);
    }
    Ok(())
}

/// Sweeps plus the stdin event loop, until EOF (unless `no_stdin`) or ctrl-c.
async fn run(service: Arc<QuestService>, config: Config, no_stdin: bool) -> Result<()> {
    let bot_name = config.bot.name.clone();

    let event_service = service.clone();
    let reminder_window = config.events.ending_soon_window();
    let event_interval = config.sweeps.event_interval();
    let event_task = tokio::spawn(async move {
        let mut sweeper = EventSweeper::new(reminder_window);
        let mut ticker = tokio::time::interval(event_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let catalog = event_service.events().catalog_snapshot().await;
            for note in sweeper.sweep(&catalog, Utc::now()) {
                info!("[{}] {}", bot_name, note.message());
            }
        }
    });

    let refresh_service = service.clone();
    let refresh_interval = config.sweeps.refresh_interval();
    let refresh_task = tokio::spawn(async move {
        let mut scheduler = RefreshScheduler::new();
        let mut ticker = tokio::time::interval(refresh_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let now = Utc::now();
            for class in scheduler.due(now) {
                if let Err(e) = refresh_service.refresh_all_users(class, now).await {
                    error!("{} refresh sweep failed: {}", class, e);
                }
            }
            match refresh_service.expire_all_users(now).await {
                Ok(0) => {}
                Ok(n) => info!("Expired {} overdue quest(s)", n),
                Err(e) => error!("Expiry sweep failed: {}", e),
            }
        }
    });

    info!("Quest engine running; press Ctrl-C to stop");
    if no_stdin {
        tokio::signal::ctrl_c().await?;
    } else {
        tokio::select! {
            res = read_gameplay_events(service.clone()) => res?,
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    event_task.abort();
    refresh_task.abort();
    info!("Shutting down");
    Ok(())
}

/// Each stdin line is `<user_id> <kind> [amount] [target]`.
async fn read_gameplay_events(service: Arc<QuestService>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(user), Some(kind)) = (parts.next(), parts.next()) else {
            warn!("Ignoring malformed line: {}", line);
            continue;
        };
        let kind: RequirementKind = match kind.parse() {
            Ok(kind) => kind,
            Err(e) => {
                warn!("Ignoring line '{}': {}", line, e);
                continue;
            }
        };
        let mut event = GameplayEvent::new(kind);
        if let Some(amount) = parts.next() {
            match amount.parse::<u32>() {
                Ok(n) => event = event.with_amount(n),
                Err(_) => {
                    warn!("Ignoring line '{}': bad amount", line);
                    continue;
                }
            }
        }
        if let Some(target) = parts.next() {
            event = event.with_target(target);
        }
        match service.on_gameplay_event(user, event).await {
            Ok(report) => {
                for message in format_dispatch_report(&report) {
                    info!("[{}] {}", user, message);
                }
            }
            Err(e) => error!("Dispatch failed for user {}: {}", user, e),
        }
    }
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|cfg| cfg.logging.level.parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Foreground runs also echo to the console
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
