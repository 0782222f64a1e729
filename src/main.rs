//! Anti-Theft Agent CLI
//!
//! Runs the detection pipeline in the foreground and inspects its evidence.

use anyhow::{Context, Result};
use antitheft_agent::{
    capture::{CaptureSource, PlaceholderSource, SourceId},
    detection::{LockStats, MotionDetector},
    evidence::EvidenceStore,
    notify::LogSink,
    sensor::{SensorFeed, SensorInput, SensorSender},
    Agent, ActivityLog, ArmState, Config, JsonFileStore, MemoryStore, NotificationConfig,
    SharedStore,
    BREAK_IN_HEURISTIC_NOTICE, VERSION,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "antitheft-agent")]
#[command(version = VERSION)]
#[command(about = "Intrusion detection and evidence capture agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Arm protection and run in the foreground
    Arm {
        /// Newline-delimited JSON sensor inputs to read ("-" for stdin)
        #[arg(long, short, default_value = "-")]
        input: String,

        /// Motion sensitivity, 0 (hard to trigger) to 100 (easy to trigger)
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        sensitivity: Option<u8>,

        /// Treat the device as locked at arming time
        #[arg(long)]
        locked: bool,

        /// Comma-separated addresses to email evidence to (enables email alerts)
        #[arg(long, value_name = "ADDRESSES")]
        email: Option<String>,
    },

    /// Disarm a running agent
    Disarm,

    /// Show protection status and statistics
    Status,

    /// List recorded evidence sessions
    Sessions,

    /// Delete an evidence session and its files
    Delete {
        /// Session id, as shown by `sessions`
        id: String,
    },

    /// Delete sessions older than the retention window
    Sweep,

    /// Display how break-ins are classified
    Notice,

    /// Show configuration
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("antitheft_agent=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Arm {
            input,
            sensitivity,
            locked,
            email,
        } => cmd_arm(&input, sensitivity, locked, email.as_deref()),
        Commands::Disarm => cmd_disarm(),
        Commands::Status => cmd_status(),
        Commands::Sessions => cmd_sessions(),
        Commands::Delete { id } => cmd_delete(&id),
        Commands::Sweep => cmd_sweep(),
        Commands::Notice => {
            println!("{BREAK_IN_HEURISTIC_NOTICE}");
            Ok(())
        }
        Commands::Config => cmd_config(),
    }
}

fn cmd_arm(
    input: &str,
    sensitivity: Option<u8>,
    locked: bool,
    email: Option<&str>,
) -> Result<()> {
    println!("Anti-Theft Agent v{VERSION}");
    println!();

    let mut config = load_config();
    if let Some(s) = sensitivity {
        config.detector.sensitivity = s;
    }
    if let Some(list) = email {
        let recipients = NotificationConfig::parse_recipients(list);
        if recipients.is_empty() {
            eprintln!("Warning: no email addresses given, email alerts stay disabled");
        }
        config.notifications.email_enabled = !recipients.is_empty();
        config.notifications.email_recipients = recipients;
    }
    if !config.detector.any_sensor() {
        eprintln!("Warning: no motion sensor available, only break-ins will be detected");
    }

    // A running agent polls this flag so `antitheft-agent disarm` can stop it.
    config.armed = true;
    config.save().context("Could not save configuration")?;
    config
        .ensure_directories()
        .context("Could not create agent directories")?;

    println!("Arming protection...");
    println!("  Sensitivity: {}", config.detector.sensitivity);
    println!(
        "  Photos per source: {} every {}ms",
        config.capture.photos_per_source,
        config.capture.photo_interval.as_millis()
    );
    println!(
        "  Video: {}",
        if config.capture.video_enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    if config.notifications.email_enabled {
        println!(
            "  Email: {} after {}s",
            config.notifications.email_recipients.join(", "),
            config.notifications.email_delay.as_secs()
        );
    }
    println!("  Evidence: {:?}", config.evidence_path);
    println!();
    println!("Press Ctrl+C to disarm");
    println!();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Could not start async runtime")?;
    let _enter = runtime.enter();

    let captures = config.evidence_path.join("captures");
    let sources: Vec<Arc<dyn CaptureSource>> = [SourceId::Front, SourceId::Back, SourceId::Screen]
        .into_iter()
        .map(|id| Arc::new(PlaceholderSource::new(id, &captures)) as Arc<dyn CaptureSource>)
        .collect();

    let agent = Agent::new(
        config.clone(),
        Arc::new(ArmState::new()),
        open_state(&config),
        sources,
        Arc::new(LogSink),
    )?;
    let session = agent.arm(locked)?;
    println!("Arm session {session} started");

    let mut feed = SensorFeed::new();
    feed.start()?;
    spawn_reader(input, feed.sender())?;

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    let receiver = feed.receiver().clone();
    let mut last_config_check = std::time::Instant::now();

    while running.load(Ordering::SeqCst) {
        // Periodically reload config so `antitheft-agent disarm` can stop a running agent.
        if last_config_check.elapsed() >= Duration::from_secs(1) {
            if let Ok(cfg) = Config::load() {
                if !cfg.armed {
                    println!();
                    println!("Disarm requested.");
                    break;
                }
            }
            last_config_check = std::time::Instant::now();
        }

        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(input) => {
                if !agent.submit(input) {
                    debug!("Input not accepted by the agent");
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                eprintln!("Sensor feed disconnected unexpectedly");
                break;
            }
        }
    }

    println!();
    println!("Disarming...");
    feed.stop();
    runtime.block_on(agent.disarm())?;

    let mut config = load_config();
    if config.armed {
        config.armed = false;
        if let Err(e) = config.save() {
            eprintln!("Warning: Could not save configuration: {e}");
        }
    }

    let dropped = feed.dropped_count();
    if dropped > 0 {
        println!("Dropped {dropped} sensor inputs");
    }
    println!();
    println!("{}", agent.activity().summary());
    Ok(())
}

/// Read NDJSON inputs from a file or stdin into the feed on its own thread.
fn spawn_reader(input: &str, sender: SensorSender) -> Result<()> {
    let source: Box<dyn Read + Send> = if input == "-" {
        Box::new(std::io::stdin())
    } else {
        let path = PathBuf::from(input);
        Box::new(
            std::fs::File::open(&path).with_context(|| format!("Could not open {path:?}"))?,
        )
    };

    thread::Builder::new()
        .name("sensor-reader".to_string())
        .spawn(move || {
            for (number, line) in BufReader::new(source).lines().enumerate() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "Input read failed");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<SensorInput>(&line) {
                    Ok(input) => {
                        sender.push(input);
                    }
                    Err(e) => warn!(line = number + 1, error = %e, "Skipping malformed input"),
                }
            }
            debug!("Input exhausted");
        })
        .context("Could not start input reader")?;
    Ok(())
}

fn cmd_disarm() -> Result<()> {
    let mut config = load_config();
    config.armed = false;
    config.save().context("Could not save configuration")?;
    println!("Protection disarmed. A running agent stops within a second.");
    Ok(())
}

fn cmd_status() -> Result<()> {
    let config = load_config();
    let kv = open_state(&config);

    println!("Anti-Theft Agent Status");
    println!("=======================");
    println!();
    println!("Armed: {}", config.armed);
    println!("Sensitivity: {}", config.detector.sensitivity);
    println!(
        "Break-in threshold: {} failed attempts",
        config.lock.break_in_threshold
    );
    println!("Retention: {} days", config.retention.retention_days);
    println!();

    let motion = MotionDetector::new(config.detector.clone()).summary(Utc::now());
    println!("Motion Detection:");
    println!(
        "  Sensors: {}",
        if motion.active { "available" } else { "none" }
    );
    println!("  Threshold: {:.2}", motion.threshold);
    println!();

    let lock = LockStats::from_store(&kv);
    println!("Lock Screen:");
    println!("  Unlock attempts: {}", lock.total_unlock_attempts);
    println!("  Break-ins: {}", lock.total_break_ins);
    if let Some(at) = lock.last_unlock_attempt {
        println!("  Last attempt: {}", at.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(at) = lock.last_break_in {
        println!(
            "  Last break-in: {} after {} attempts",
            at.format("%Y-%m-%d %H:%M:%S"),
            lock.last_break_in_failed_attempts
        );
    }
    println!();

    match open_evidence(&config, kv.clone()).and_then(|store| Ok(store.stats()?)) {
        Ok(stats) => {
            println!("Evidence:");
            println!("  Stored sessions: {}", stats.stored_sessions);
            println!("  Sessions ever recorded: {}", stats.total_recorded);
            println!(
                "  Artifacts: {} ({} bytes)",
                stats.total_artifacts, stats.total_artifact_bytes
            );
        }
        Err(e) => println!("Evidence: unavailable ({e})"),
    }
    println!();

    println!("{}", ActivityLog::with_store(kv).summary());
    Ok(())
}

fn cmd_sessions() -> Result<()> {
    let config = load_config();
    let store = open_evidence(&config, open_state(&config))?;
    let sessions = store.list()?;

    if sessions.is_empty() {
        println!("No evidence sessions found in {:?}", store.root());
        return Ok(());
    }

    println!("Found {} session(s)", sessions.len());
    println!();
    for session in &sessions {
        let types = session.file_types();
        println!(
            "{}  {}  {:<20} {} photos, {} videos, {} screenshots",
            session.session_id(),
            session.timestamp().format("%Y-%m-%d %H:%M:%S"),
            session.trigger_reason(),
            types.photos,
            types.videos,
            types.screenshots
        );
        if !session.failed_sources().is_empty() {
            println!("    failed sources: {}", session.failed_sources().join(", "));
        }
    }
    Ok(())
}

fn cmd_delete(id: &str) -> Result<()> {
    let config = load_config();
    let store = open_evidence(&config, open_state(&config))?;
    store.delete(id)?;
    println!("Deleted session {id}");
    Ok(())
}

fn cmd_sweep() -> Result<()> {
    let config = load_config();
    let store = open_evidence(&config, open_state(&config))?;
    let report = store.sweep(Utc::now())?;

    println!(
        "Retention sweep ({} days): {} deleted, {} failed",
        config.retention.retention_days,
        report.deleted.len(),
        report.failed.len()
    );
    for id in &report.failed {
        eprintln!("  Could not delete {id}");
    }
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load configuration, using defaults: {e}");
        Config::default()
    })
}

/// Persistent state store, falling back to memory when the file is unusable.
fn open_state(config: &Config) -> SharedStore {
    match JsonFileStore::open(config.state_file()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!(error = %e, "State file unavailable, counters will not persist");
            MemoryStore::shared()
        }
    }
}

fn open_evidence(config: &Config, kv: SharedStore) -> Result<EvidenceStore> {
    EvidenceStore::open(&config.evidence_path, kv, config.retention.clone())
        .with_context(|| format!("Could not open evidence store at {:?}", config.evidence_path))
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");
}
