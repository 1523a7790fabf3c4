//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use storage_tier_balancer::core::config::Config;
use storage_tier_balancer::core::errors::StbError;
use storage_tier_balancer::core::topology::{Role, Topology};
use storage_tier_balancer::daemon::loop_main::{Orchestrator, RoundReport};
use storage_tier_balancer::daemon::signals::SignalHandler;
use storage_tier_balancer::logger::{LogOptions, init_tracing};
use storage_tier_balancer::platform::probe::{CommandDiskProbe, DiskSpaceProbe};
use storage_tier_balancer::scanner::release::{DatedPolicy, Release};
use storage_tier_balancer::scanner::release_scanner::ReleaseScanner;

/// Storage Tier Balancer: keeps incoming volumes clear by migrating or
/// deleting their oldest releases, and archive volumes clear by evicting.
#[derive(Debug, Parser)]
#[command(
    name = "stb",
    author,
    version,
    about = "Storage Tier Balancer - incoming/archive release rotation",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (warnings and errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run rounds forever, sleeping `wait_time_minutes` between them.
    Daemon,
    /// Run exactly one round and print its report.
    Round(RoundArgs),
    /// Show the globally oldest release of a tier.
    Oldest(OldestArgs),
    /// Probe every configured device and compare against its threshold.
    Status,
    /// Validate configuration and print its hash.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct RoundArgs {
    /// Log every mutating step instead of performing it.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Args, Default)]
struct OldestArgs {
    /// Look at the archive tier (honouring `dated`) instead of incoming.
    #[arg(long)]
    archive: bool,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Print the effective configuration as TOML.
    #[arg(long)]
    show: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration or domain failure.
    #[error("{0}")]
    Stb(#[from] StbError),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Daemon => run_daemon(cli),
        Command::Round(args) => run_round(cli, args),
        Command::Oldest(args) => run_oldest(cli, args),
        Command::Status => run_status(cli),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn init_logging(cli: &Cli, log_file: Option<PathBuf>) {
    init_tracing(&LogOptions {
        default_level: LogOptions::level_for(cli.verbose, cli.quiet),
        log_file,
        color: !cli.no_color,
    });
}

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    Ok(Config::load(cli.config.as_deref())?)
}

fn run_daemon(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    init_logging(cli, config.paths.log_file.clone());
    let hash = config.stable_hash()?;
    tracing::info!(
        config = %config.paths.config_file.display(),
        config_hash = %hash,
        "configuration loaded"
    );

    let orchestrator = Orchestrator::from_config(&config, false)?;
    let signals = SignalHandler::new();
    orchestrator.run(&signals);
    Ok(())
}

fn run_round(cli: &Cli, args: &RoundArgs) -> Result<(), CliError> {
    let config = load_config(cli)?;
    init_logging(cli, config.paths.log_file.clone());
    let orchestrator = Orchestrator::from_config(&config, args.dry_run)?;
    let report = orchestrator.run_round();

    match output_mode(cli) {
        OutputMode::Human => print_round_report(&report),
        OutputMode::Json => {
            let payload = json!({
                "command": "round",
                "report": serde_json::to_value(&report)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn print_round_report(report: &RoundReport) {
    let mode = if report.dry_run { " (dry run)" } else { "" };
    println!("Round complete{mode}");
    println!("  Sections visited: {}", report.sections_visited);
    println!("  Actions taken:    {}", report.actions_taken);
    println!("  Probe failures:   {}", report.probe_failures);
    println!("  Section errors:   {}", report.section_errors);
    println!(
        "  Archive cleanup:  {}",
        if report.archive_cleanup { "yes" } else { "no" }
    );
    println!("  Duration:         {} ms", report.duration_ms);
}

fn run_oldest(cli: &Cli, args: &OldestArgs) -> Result<(), CliError> {
    init_logging(cli, None);
    let config = load_config(cli)?;
    let topology = Topology::from_config(&config)?;
    let scanner = ReleaseScanner::new(&config.scanner)?;
    let (tier, found) = if args.archive {
        (
            "archive",
            scanner.find_oldest(topology.archive(), DatedPolicy::Respect),
        )
    } else {
        (
            "incoming",
            scanner.find_oldest(topology.incoming(), DatedPolicy::Ignore),
        )
    };

    match output_mode(cli) {
        OutputMode::Human => match &found {
            Some(release) => print_release(release),
            None => println!("No eligible {tier} release."),
        },
        OutputMode::Json => {
            let payload = json!({
                "command": "oldest",
                "tier": tier,
                "release": found.as_ref().map(serde_json::to_value).transpose()?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn print_release(release: &Release) {
    println!("{}", release.name.bold());
    println!("  Path:     {}", release.path.display());
    println!("  Label:    {}", release.owner_label);
    println!("  Modified: {}", release.modified_at().to_rfc3339());
    println!(
        "  Size:     {} MB ({} GB rounded up)",
        release.size_mb(),
        release.size_gb_ceil()
    );
}

fn run_status(cli: &Cli) -> Result<(), CliError> {
    init_logging(cli, None);
    let config = load_config(cli)?;
    let topology = Topology::from_config(&config)?;
    let probe = CommandDiskProbe::new(&config.probe);
    let mode = output_mode(cli);

    let mut rows: Vec<Value> = Vec::new();
    if mode == OutputMode::Human {
        println!(
            "{:<24} {:<9} {:>9} {:>9}  STATE",
            "DEVICE", "ROLE", "FREE GB", "LIMIT GB"
        );
    }
    for (device, role) in topology.all_devices() {
        let (role_name, limit) = match role {
            Role::Incoming => ("incoming", config.free_space_limit_gb_race),
            Role::Archive => ("archive", config.free_space_limit_gb_archive),
        };
        match probe.free_space(device) {
            Ok(reading) => {
                let ok = reading.meets(limit);
                if mode == OutputMode::Human {
                    let state = if ok { "ok".green() } else { "below".red() };
                    println!(
                        "{:<24} {:<9} {:>9} {:>9}  {state}",
                        device.as_str(),
                        role_name,
                        reading.free_gb,
                        limit
                    );
                }
                rows.push(json!({
                    "device": device.as_str(),
                    "role": role_name,
                    "free_gb": reading.free_gb,
                    "limit_gb": limit,
                    "ok": ok,
                    "observed_at": reading.observed_at.to_rfc3339(),
                }));
            }
            Err(err) => {
                if mode == OutputMode::Human {
                    println!(
                        "{:<24} {:<9} {:>9} {:>9}  {}",
                        device.as_str(),
                        role_name,
                        "?",
                        limit,
                        format!("error: {err}").yellow()
                    );
                }
                rows.push(json!({
                    "device": device.as_str(),
                    "role": role_name,
                    "limit_gb": limit,
                    "error": err.to_string(),
                    "code": err.code(),
                }));
            }
        }
    }

    if mode == OutputMode::Json {
        write_json_line(&json!({
            "command": "status",
            "devices": rows,
        }))?;
    }
    Ok(())
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    init_logging(cli, None);
    let config = load_config(cli)?;
    let hash = config.stable_hash()?;
    let topology = Topology::from_config(&config)?;

    match output_mode(cli) {
        OutputMode::Human => {
            println!("Configuration is valid.");
            println!("  Source: {}", config.paths.config_file.display());
            println!("  Hash: {hash}");
            println!(
                "  Sections: {} incoming, {} archive on {} archive device(s)",
                topology.incoming().len(),
                topology.archive().len(),
                topology.archive_devices().len()
            );
            if args.show {
                println!();
                println!("{}", config.to_toml_string()?);
            }
        }
        OutputMode::Json => {
            let mut payload = json!({
                "command": "config",
                "valid": true,
                "path": config.paths.config_file.to_string_lossy(),
                "hash": hash,
            });
            if args.show {
                payload["config"] = serde_json::to_value(&config)?;
            }
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("STB_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
