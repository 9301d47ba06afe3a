//! ioproc - drive an interactive child process from a line-mode console
//!
//! Starts the given command with piped stdin/stdout/stderr, shows its output
//! as it arrives and forwards each typed line to it. Typing the exit command
//! (default `EXIT`) forwards it and then collects the child.
//!
//! # Quick Start
//!
//! ```text
//! ioproc ./bin/sokoban_test -p astar -w 10
//! ioproc -m -- ./bin/npuzzle_test -p astar -n 5
//! ioproc -x quit python3 -i
//! ```

use std::env;
use std::io::{self, Write};
use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::FmtSubscriber;

use ioproc::{CommandLine, Config as IoprocConfig, Console, ConsoleError, ProcessController};

/// Command line options
struct Config {
    /// Child command and arguments
    command: Vec<String>,
    /// Separate stderr capture (`None` keeps the config file value)
    capture_stderr: Option<bool>,
    /// Prompt override
    prompt: Option<String>,
    /// Exit command override
    exit_command: Option<String>,
    /// Log file override
    log_file: Option<PathBuf>,
    /// Disable colours
    no_color: bool,
    /// Write the effective configuration to the config file
    save_config: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            capture_stderr: None,
            prompt: None,
            exit_command: None,
            log_file: None,
            no_color: false,
            save_config: false,
        }
    }
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding a tracing filter directive
const LOG_ENV: &str = "IOPROC_LOG";

fn print_version() {
    eprintln!("ioproc {}", VERSION);
}

fn print_help() {
    eprintln!("ioproc {} - Interactive subprocess I/O multiplexer", VERSION);
    eprintln!();
    eprintln!("Usage: ioproc [OPTIONS] [--] <COMMAND> [ARGS...]");
    eprintln!();
    eprintln!("Stream options:");
    eprintln!("  (default)             From config.toml, else separate stderr");
    eprintln!("  -e, --stderr          Capture stderr separately");
    eprintln!("  -m, --merge           Merge stderr into stdout");
    eprintln!();
    eprintln!("Console options:");
    eprintln!("  -p, --prompt <TEXT>   Prompt shown before reading input");
    eprintln!("  -x, --exit <WORD>     Input line that ends the session (default: EXIT)");
    eprintln!("      --no-color        Disable coloured prompt and stderr");
    eprintln!();
    eprintln!("Other options:");
    eprintln!("  -l, --log <FILE>      Log file (default: ~/.ioproc/ioproc.log)");
    eprintln!("      --save-config     Write the effective settings to config.toml");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("The command may also come from `command` in the config file.");
    eprintln!("Configuration: ~/.ioproc/config.toml");
    eprintln!("Log level: `log_level` in config.toml or the {} variable", LOG_ENV);
}

fn parse_args(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-e" | "--stderr" => {
                config.capture_stderr = Some(true);
            }
            "-m" | "--merge" => {
                config.capture_stderr = Some(false);
            }
            "-p" | "--prompt" => {
                i += 1;
                let value = args.get(i).ok_or("Missing prompt argument")?;
                config.prompt = Some(value.clone());
            }
            "-x" | "--exit" => {
                i += 1;
                let value = args.get(i).ok_or("Missing exit command argument")?;
                config.exit_command = Some(value.clone());
            }
            "-l" | "--log" => {
                i += 1;
                let value = args.get(i).ok_or("Missing log file argument")?;
                config.log_file = Some(PathBuf::from(value));
            }
            "--no-color" => {
                config.no_color = true;
            }
            "--save-config" => {
                config.save_config = true;
            }
            "--" => {
                config.command = args[i + 1..].to_vec();
                break;
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
            _ => {
                // First positional starts the child command line
                config.command = args[i..].to_vec();
                break;
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Merge command line options over the config file
fn merge_config(cli: &Config, mut file: IoprocConfig) -> IoprocConfig {
    if let Some(capture) = cli.capture_stderr {
        file.capture_stderr = capture;
    }
    if let Some(ref prompt) = cli.prompt {
        file.console.prompt = prompt.clone();
    }
    if let Some(ref exit_command) = cli.exit_command {
        file.console.exit_command = exit_command.clone();
    }
    if cli.no_color {
        file.console.color = false;
    }
    if !cli.command.is_empty() {
        file.command = Some(cli.command.join(" "));
    }
    file
}

/// Route tracing output to a log file; the terminal belongs to the console
fn init_logging(log_file: Option<PathBuf>, level: &str) {
    let Some(log_path) = log_file.or_else(|| IoprocConfig::config_dir().map(|d| d.join("ioproc.log"))) else {
        return;
    };
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    // Open log file (append mode)
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_new(level))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let config = merge_config(&cli, IoprocConfig::load());
    init_logging(cli.log_file.clone(), &config.log_level);
    info!("ioproc {} starting...", VERSION);

    if cli.save_config {
        config.save().map_err(anyhow::Error::msg)?;
        info!("Configuration saved");
    }

    // An argv from the command line is used as-is, the config string is split
    let command = if cli.command.is_empty() {
        match config.command.as_deref() {
            Some(command) => CommandLine::parse(command),
            None => {
                eprintln!("Error: no command given. Use -h for help.");
                std::process::exit(2);
            }
        }
    } else {
        CommandLine::new(cli.command[0].clone(), cli.command[1..].iter().cloned())
    };

    info!("Command: {}", command);
    info!("Separate stderr: {}", config.capture_stderr);

    let mut proc = ProcessController::new(command, config.capture_stderr);
    let mut console = Console::new(config, io::stdout(), io::stderr());
    let result = console.run(&mut proc, io::stdin().lock());
    let _ = io::stdout().flush();

    match result {
        Ok(report) => {
            info!(
                "Session ended: {} inputs, {} stdout lines, {} stderr lines, exit code {:?}",
                report.inputs, report.stdout_lines, report.stderr_lines, report.exit_code
            );
            if let Some(code) = report.exit_code {
                if code != 0 {
                    std::process::exit(code);
                }
            }
            Ok(())
        }
        Err(ConsoleError::Spawn { command, reason }) => {
            error!("Failed to start {}: {}", command, reason);
            eprintln!("Failed to start {}: {}", command, reason);
            std::process::exit(127);
        }
        Err(e) => {
            error!("{}", e);
            Err(e.into())
        }
    }
}
