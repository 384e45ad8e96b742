// World Alarm - world clocks and timezone-aware alarms
// Runs as a terminal daemon; one-shot subcommands manage the alarm file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use world_alarm::{
    alarm::parse_timezone,
    clock::ClockBoard,
    config::Config,
    error::AppError,
    next_occurrence,
    store::{AlarmBook, AlarmStore, TomlAlarmStore},
    time::{sync::sync_once, TimeSource},
    Alarm, AlarmId, AlarmTime, Repeat, Runtime,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the alarm daemon (default)
    Run {
        /// Print the world clocks every time they change
        #[arg(long)]
        clocks: bool,
    },
    /// Add an alarm
    Add {
        /// Time as HH:MM
        time: String,
        /// IANA timezone, e.g. America/Mexico_City
        timezone: String,
        /// once, daily, weekdays or weekends
        #[arg(long, short, default_value = "once")]
        repeat: String,
        /// Alarm name
        #[arg(required = true, trailing_var_arg = true)]
        name: Vec<String>,
    },
    /// List alarms with their next occurrence
    List,
    /// Remove an alarm by id
    Remove { id: String },
    /// Print the configured world clocks once
    Clocks,
    /// Query the time server once and report the clock offset
    Sync,
    /// Write a default config file
    Init {
        #[arg(long, short)]
        force: bool,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config_path = match args.config {
        Some(path) => path,
        None => Config::config_path()?,
    };

    match args.command.unwrap_or(Cmd::Run { clocks: false }) {
        // Must not go through Config::load_from, which writes defaults
        Cmd::Init { force } => init(&config_path, force),
        command => {
            let config = Config::load_from(&config_path)?;
            tracing::debug!(?config, "Configuration loaded");
            execute(command, config, config_path)
        }
    }
}

fn execute(command: Cmd, config: Config, config_path: PathBuf) -> Result<()> {
    match command {
        Cmd::Run { clocks } => {
            tracing::info!("Starting World Alarm");
            Runtime::from_config(config, Some(config_path), clocks)?.run()
        }
        Cmd::Add {
            time,
            timezone,
            repeat,
            name,
        } => {
            let mut store = open_store(&config)?;
            let alarm = parse_alarm(&time, &timezone, &repeat, &name.join(" "))?;
            store.put(&alarm).context("Failed to save alarm")?;
            println!("{}  {} {} ({})", alarm.id, alarm.time, alarm.timezone, alarm.name);
            Ok(())
        }
        Cmd::List => {
            let book = AlarmBook::load(Box::new(open_store(&config)?));
            let now = TimeSource::new().now();
            if book.is_empty() {
                println!("no alarms");
            }
            for alarm in book.alarms() {
                let next = next_occurrence(alarm, now)
                    .map(|at| at.with_timezone(&alarm.timezone).to_rfc2822())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {}  {}  {}  {}  next: {}  {}",
                    alarm.id,
                    alarm.time,
                    alarm.timezone,
                    alarm.repeat,
                    if alarm.enabled { "on" } else { "off" },
                    next,
                    alarm.name
                );
            }
            Ok(())
        }
        Cmd::Remove { id } => {
            let mut store = open_store(&config)?;
            let id = AlarmId::from(id.as_str());
            let alarm = store
                .get_all()?
                .into_iter()
                .find(|a| a.id == id)
                .with_context(|| format!("No alarm with id {}", id))?;
            store.delete(&id).context("Failed to remove alarm")?;
            println!("removed {} {}", alarm.id, alarm.name);
            Ok(())
        }
        Cmd::Clocks => {
            let board = ClockBoard::new(
                config.clock_zones(),
                config.hour_format.is_12h(),
                config.show_seconds,
            );
            println!("{}", board.render(TimeSource::new().now()));
            Ok(())
        }
        Cmd::Sync => {
            let source = TimeSource::new();
            let status = sync_once(&source, &config.sync_url, config.sync_timeout())
                .map_err(AppError::from)
                .context("Time sync failed")?;
            println!("{} (offset {} ms)", status.label(), source.offset_ms());
            Ok(())
        }
        Cmd::Init { force } => init(&config_path, force),
    }
}

fn init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists, use --force to overwrite",
            config_path.display()
        );
    }
    Config::default().save_to(config_path)?;
    println!("wrote {}", config_path.display());
    Ok(())
}

fn open_store(config: &Config) -> Result<TomlAlarmStore> {
    let path = TomlAlarmStore::default_path(&config.data_dir()?);
    TomlAlarmStore::open(&path)
        .with_context(|| format!("Failed to open alarm file {}", path.display()))
}

fn parse_alarm(time: &str, timezone: &str, repeat: &str, name: &str) -> world_alarm::error::Result<Alarm> {
    let time: AlarmTime = time.parse()?;
    let timezone = parse_timezone(timezone)?;
    let repeat: Repeat = repeat.parse()?;
    Ok(Alarm::new(name, time, timezone, repeat, TimeSource::new().now())?)
}
