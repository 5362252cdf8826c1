//! cryorunner CLI Entry Point
//!
//! Provides command-line interface for batch classification.
//!
//! # Usage
//!
//! ```bash
//! # Classify micrographs
//! cryorunner micrographs /data/mics/*.mrc
//!
//! # Classify 2D class averages with a stricter threshold
//! cryorunner classes /data/class2d/*.mrcs --threshold 0.7
//!
//! # Preview the command without running it
//! cryorunner micrographs /data/mics/*.mrc --dry-run
//!
//! # Check the installation
//! cryorunner check
//!
//! # Print the installation script
//! cryorunner install-script 1.0.0
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info};

use cryorunner::assess::{ClassificationParams, ClassificationReport, InputItem, Runner};
use cryorunner::environment::{self, conda, Settings};
use cryorunner::{AssessKind, APP_NAME, VERSION};

/// Default parent of the numbered run directories.
const DEFAULT_WORK_DIR: &str = "cryoassess";

/// What to do once arguments are parsed.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Classify(AssessKind),
    Check,
    InstallScript(Option<String>),
}

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    command: Option<Command>,
    inputs: Vec<String>,
    work_dir: PathBuf,
    config_path: Option<PathBuf>,
    options: BTreeMap<String, String>,
    dry_run: bool,
    json: bool,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: None,
            inputs: Vec::new(),
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            config_path: None,
            options: BTreeMap::new(),
            dry_run: false,
            json: false,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Batch Runner for cryoassess");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: {} [OPTIONS] <micrographs|classes> <INPUT>...", APP_NAME);
    println!("       {} check", APP_NAME);
    println!("       {} install-script [VERSION]", APP_NAME);
    println!();
    println!("Arguments:");
    println!("  <INPUT>...          Micrograph or class average files (.mrc/.mrcs)");
    println!();
    println!("Options:");
    println!("  --work-dir PATH     Parent of the run directories (default: {})", DEFAULT_WORK_DIR);
    println!("  --config PATH       Settings file (default: {})", environment::CONFIG_PATH.display());
    println!("  --dry-run           Stage inputs and print the command without running it");
    println!("  --json              Print the report as JSON");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Classification options:");
    println!("  --threshold T       Acceptance threshold in [0, 1]");
    println!("  --batch-size N      Images per prediction batch (default: 32)");
    println!("  --gpus LIST         GPU ids, e.g. \"0 1\" (micrographs)");
    println!("  --threads N         Preprocessing threads (micrographs)");
    println!("  --detector K2|K3    Camera the micrographs were taken with");
    println!("  --dims WxH          Micrograph size, used to infer the detector");
    println!("  --box-size N        Box size of the class averages (classes)");
    println!();
    println!("Examples:");
    println!("  {} micrographs mics/*.mrc --threshold 0.2 --gpus 0,1", APP_NAME);
    println!("  {} classes run_it025_classes.mrcs --json", APP_NAME);
    println!("  {} install-script > install_cryoassess.sh", APP_NAME);
}

/// Parses command-line arguments into a Config struct.
///
/// Unrecognized `--key value` pairs are kept as classification options and
/// validated later against the selected kind.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--dry-run" => {
                config.dry_run = true;
            }
            "--json" => {
                config.json = true;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--work-dir" => {
                i += 1;
                if i >= args.len() {
                    return Err("--work-dir requires a path argument".to_string());
                }
                config.work_dir = PathBuf::from(&args[i]);
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    return Err("--config requires a path argument".to_string());
                }
                config.config_path = Some(PathBuf::from(&args[i]));
            }
            arg if arg.starts_with("--") => {
                let (key, value) = match arg[2..].split_once('=') {
                    Some((key, value)) => (key.to_string(), value.to_string()),
                    None => {
                        i += 1;
                        if i >= args.len() {
                            return Err(format!("{} requires a value", arg));
                        }
                        (arg[2..].to_string(), args[i].clone())
                    }
                };
                if key.is_empty() {
                    return Err(format!("Unknown option: {}", arg));
                }
                config.options.insert(key, value);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                // Positional argument
                match config.command {
                    None => config.command = Some(parse_command(arg)?),
                    Some(Command::Classify(_)) => config.inputs.push(arg.clone()),
                    Some(Command::InstallScript(None)) => {
                        config.command = Some(Command::InstallScript(Some(arg.clone())))
                    }
                    Some(_) => return Err(format!("Unexpected argument: {}", arg)),
                }
            }
        }
        i += 1;
    }

    Ok(config)
}

fn parse_command(arg: &str) -> Result<Command, String> {
    match arg {
        "check" => Ok(Command::Check),
        "install-script" => Ok(Command::InstallScript(None)),
        other => other
            .parse::<AssessKind>()
            .map(Command::Classify)
            .map_err(|_| format!("Unknown command: {}", other)),
    }
}

/// Prints the partition in color.
fn print_report(report: &ClassificationReport) {
    println!();
    println!("{}", format!("Results for {}", report.kind.label()).bold());

    for result in &report.results {
        let score = result
            .score
            .map(|s| format!(" ({:.3})", s))
            .unwrap_or_default();
        if report.accepted.contains(&result.id) {
            println!("  {} {}{}", "good".green(), result.id, score);
        } else {
            println!("  {} {}{}", "bad ".red(), result.id, score);
        }
    }

    println!();
    println!(
        "{} accepted, {} rejected of {}",
        report.accepted.len().to_string().green().bold(),
        report.rejected.len().to_string().red().bold(),
        report.total()
    );
    if let Some(ref dir) = report.run_dir {
        println!("Run directory: {}", dir.display());
    }
}

/// Resolves every model and reports what was found.
fn run_check(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let env = environment::resolve_all(settings)?;

    println!("{}", "Environment OK".green().bold());
    println!(
        "  Activation:   {}",
        env.activation_prefix().unwrap_or("(none, using PATH)")
    );
    println!("  Install root: {}", env.install_root().display());
    for kind in AssessKind::ALL {
        println!("  {:<13} {}", format!("{}:", kind), env.model_path(kind)?.display());
    }
    Ok(())
}

fn run_classify(
    config: &Config,
    settings: &Settings,
    kind: AssessKind,
) -> Result<(), Box<dyn std::error::Error>> {
    let params = ClassificationParams::from_options(kind, &config.options)?;
    let inputs: Vec<InputItem> = config.inputs.iter().map(InputItem::new).collect();

    let env = environment::resolve(settings, &[kind])?;
    let runner = Runner::new(env, &config.work_dir);
    info!("Work directory: {}", runner.work_root().display());

    if config.dry_run {
        info!("Mode: DRY RUN (command will not execute)");
        if inputs.is_empty() {
            info!("No {} given; nothing to stage", kind.label());
            return Ok(());
        }
        let job = runner.prepare(&inputs, &params)?;
        if config.json {
            println!("{}", serde_json::to_string_pretty(&job.invocation)?);
        } else {
            println!("{}", job.invocation.command_line());
        }
        return Ok(());
    }

    let report = runner.classify(kind, &inputs, &params).map_err(|e| {
        error!("Classification of {} failed", kind.label());
        e
    })?;

    if config.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    let Some(command) = config.command.clone() else {
        print_usage();
        return Err("No command given".into());
    };

    // Setup logging
    setup_logging(config.verbose);

    if let Command::InstallScript(version) = command {
        let settings = Settings::load_from(config.config_path.as_deref())?;
        let version = version.as_deref().unwrap_or(conda::DEFAULT_VERSION);
        print!("{}", conda::install_script(version, &settings)?);
        return Ok(());
    }

    if !config.json {
        print_banner();
    }

    let settings = Settings::load_from(config.config_path.as_deref())?;

    match command {
        Command::Check => run_check(&settings),
        Command::Classify(kind) => run_classify(&config, &settings, kind),
        Command::InstallScript(_) => Ok(()),
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
