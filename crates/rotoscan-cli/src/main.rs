//! `rotoscan` – command line front end for the rotating scanner pipeline.
//!
//! Subcommands:
//!
//! - `replay <file>` – feed a recorded JSON-lines stream of start/stop
//!   commands and frames through the pipeline, writing session logs.
//! - `inspect <log>` – summarise a session log.
//! - `schema` – print the JSON schema of one replay record.
//! - `log-name` – print the session log file name for the active configuration.
//! - `config` – print the effective configuration, optionally saving it.
//!
//! **Ctrl-C** stops a replay between records; the pipeline is dropped, which
//! closes any open session log.

mod config;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, Subcommand};
use colored::Colorize;
use rotoscan_memory::SessionLog;
use rotoscan_middleware::{EventBus, Topic};
use rotoscan_runtime::ScanPipeline;
use rotoscan_types::{EventPayload, InputRecord};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rotoscan", version, about = "Rotating 2-D scanner to 3-D point cloud sweeps")]
struct Cli {
    /// Config file to use instead of ~/.rotoscan/config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Replay a JSON-lines stream of commands and frames
    Replay {
        input: PathBuf,
        /// Override the configured output directory.
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Start a session before the first record.
        #[arg(long)]
        auto_start: bool,
    },

    /// Summarise a session log
    Inspect {
        log: PathBuf,
        /// Print one line per logged frame.
        #[arg(long)]
        frames: bool,
    },

    /// Print the JSON schema of a replay record
    Schema,

    /// Print the session log file name for the active configuration
    LogName {
        /// Model counter, for multi-model captures.
        #[arg(long)]
        model: Option<u32>,
    },

    /// Print the effective configuration
    Config {
        /// Write it to the config file.
        #[arg(long)]
        save: bool,
    },
}

fn main() -> ExitCode {
    let _guard = rotoscan_runtime::init_tracing("rotoscan");
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Dispatch one subcommand.  Only commands that use the configuration load it.
fn run(cli: Cli) -> Result<(), String> {
    let load = || config::resolve(cli.config.as_deref()).map_err(|e| format!("{}: {}", "Config error".red(), e));

    match cli.cmd {
        Cmd::Replay {
            ref input,
            ref output_dir,
            auto_start,
        } => {
            let mut cfg = load()?;
            if let Some(dir) = output_dir {
                cfg.output_dir = dir.clone();
            }
            replay(&cfg, input, auto_start)
        }
        Cmd::Inspect { ref log, frames } => inspect(log, frames),
        Cmd::Schema => print_schema(),
        Cmd::LogName { model } => {
            let cfg = load()?;
            println!("{}", cfg.to_pipeline_config().log_name().file_name(model));
            Ok(())
        }
        Cmd::Config { save } => show_config(&load()?, cli.config.as_deref(), save),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// replay
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ReplayStats {
    records: usize,
    frames: usize,
    accepted: usize,
    skipped_lines: usize,
    models: Vec<String>,
}

fn replay(cfg: &config::Config, input: &Path, auto_start: bool) -> Result<(), String> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\n{}", "Ctrl-C received – stopping replay …".yellow().bold());
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    let file = File::open(input).map_err(|e| format!("cannot open {}: {}", input.display(), e))?;

    let bus = EventBus::default();
    let mut sessions = bus.subscribe_to(Topic::Session);
    let mut pipeline = ScanPipeline::new(cfg.to_pipeline_config(), bus).map_err(|e| e.to_string())?;
    if auto_start {
        pipeline.start().map_err(|e| e.to_string())?;
    }

    let mut stats = ReplayStats::default();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        if shutdown.load(Ordering::SeqCst) {
            info!(line = n + 1, "replay interrupted");
            break;
        }
        let line = line.map_err(|e| format!("read error at line {}: {}", n + 1, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: InputRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = n + 1, error = %e, "skipping malformed record");
                stats.skipped_lines += 1;
                continue;
            }
        };

        stats.records += 1;
        if matches!(record, InputRecord::Frame(_)) {
            stats.frames += 1;
        }
        if let Some(outcome) = pipeline.handle(&record).map_err(|e| e.to_string())?
            && outcome.accepted
        {
            stats.accepted += 1;
        }

        while let Ok(event) = sessions.try_recv() {
            if let EventPayload::SessionFinalized(model) = event.payload {
                stats.models.push(format!(
                    "model {}: {} frames, {:.1}°, {} points",
                    model.model_index,
                    model.scan_count,
                    model.angle_rad.to_degrees(),
                    model.point_count
                ));
            }
        }
    }

    let state = pipeline.state();
    let scan_count = pipeline.machine().session().scan_count();
    let open_log = pipeline.machine().sink_id().map(str::to_string);
    drop(pipeline);

    println!("{}", "Replay finished".bold().green());
    println!("  records:   {}", stats.records);
    println!("  frames:    {} ({} accepted)", stats.frames, stats.accepted);
    if stats.skipped_lines > 0 {
        println!("  {} {}", "skipped:".yellow(), stats.skipped_lines);
    }
    for model in &stats.models {
        println!("  {} {}", "✓".green(), model);
    }
    if let Some(log) = open_log {
        println!(
            "  {} session still {} after {} frames, log closed at {}",
            "!".yellow(),
            state,
            scan_count,
            log.bold()
        );
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// inspect
// ─────────────────────────────────────────────────────────────────────────────

fn inspect(log: &Path, per_frame: bool) -> Result<(), String> {
    let frames = SessionLog::read_frames(log).map_err(|e| format!("{}: {}", log.display(), e))?;
    let points: usize = frames.iter().map(|f| f.cloud.points.len()).sum();

    println!("{}", log.display().to_string().bold());
    println!("  frames: {}", frames.len());
    println!("  points: {}", points);
    if let (Some(first), Some(last)) = (frames.first(), frames.last()) {
        println!(
            "  sweep:  {:.2}° → {:.2}°",
            first.angle_rad.to_degrees(),
            last.angle_rad.to_degrees()
        );
    }
    if per_frame {
        for frame in &frames {
            println!(
                "  {:>6}  {:>8.3}°  {:>6} pts  {}",
                frame.scan_index,
                frame.angle_rad.to_degrees(),
                frame.cloud.points.len(),
                frame.cloud.header.stamp.to_rfc3339().dimmed()
            );
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// schema / config
// ─────────────────────────────────────────────────────────────────────────────

fn print_schema() -> Result<(), String> {
    let schema = schemars::schema_for!(InputRecord);
    let json = serde_json::to_string_pretty(&schema).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}

fn show_config(cfg: &config::Config, path: Option<&Path>, save: bool) -> Result<(), String> {
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    print!("{raw}");
    if save {
        let path = path.map(Path::to_path_buf).unwrap_or_else(config::config_path);
        config::save_to(cfg, &path)?;
        println!("\n  {} Config saved to {}", "✓".green().bold(), path.display().to_string().bold());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["rotoscan", "inspect", "a.db", "--config", "c.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
        assert!(matches!(cli.cmd, Cmd::Inspect { frames: false, .. }));
    }

    #[test]
    fn replay_writes_session_log() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let input = dir.path().join("stream.jsonl");
        let frame = r#"{"frame":{"header":{"seq":0,"stamp":"2024-05-01T12:00:00Z","frame_id":"laser"},"points":[{"x":1.0,"y":2.0,"extra":[0.0,0.0]}]}}"#;
        let stream = [r#"{"command":"start"}"#, frame, frame, "not json", r#"{"command":"stop"}"#, frame];
        std::fs::write(&input, stream.join("\n")).expect("write");

        let cfg = config::Config {
            output_dir: dir.path().join("out"),
            ..config::Config::default()
        };
        replay(&cfg, &input, false).expect("replay");

        let log = cfg.output_dir.join(cfg.to_pipeline_config().log_name().file_name(None));
        let frames = SessionLog::read_frames(&log).expect("log");
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn broken_config_only_blocks_commands_that_use_it() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let config = dir.path().join("config.toml");
        std::fs::write(&config, "auto_stop_deg = nan").expect("write");
        let config = config.to_string_lossy().into_owned();

        let schema = Cli::try_parse_from(["rotoscan", "--config", &config, "schema"]).unwrap();
        assert!(run(schema).is_ok());

        let missing = dir.path().join("missing.db").to_string_lossy().into_owned();
        let inspect = Cli::try_parse_from(["rotoscan", "--config", &config, "inspect", &missing]).unwrap();
        let err = run(inspect).expect_err("missing log");
        assert!(!err.contains("Config error"), "{err}");

        let log_name = Cli::try_parse_from(["rotoscan", "--config", &config, "log-name"]).unwrap();
        let err = run(log_name).expect_err("invalid config");
        assert!(err.contains("auto_stop_deg"), "{err}");
    }

    #[test]
    fn schema_mentions_both_record_kinds() {
        let schema = serde_json::to_string(&schemars::schema_for!(InputRecord)).unwrap();
        assert!(schema.contains("command"));
        assert!(schema.contains("frame"));
    }
}
