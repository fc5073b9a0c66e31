// Slitcam - slit lamp camera recorder
// Main library entry point

pub mod button;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod recording;
pub mod storage;

use clap::Parser;
use cli::CliArgs;
use config::Config;

/// Parse the command line, run the chosen command and return the process exit code
pub fn run() -> i32 {
    let args = CliArgs::parse();
    init_logging(args.verbose);

    let config_path = config::resolve_config_path(args.config.as_deref());
    log::debug!("Loading config from {}", config_path.display());
    let mut config = Config::load_or_default(&config_path);
    config.apply_env_overrides();
    commands::apply_cli_overrides(&mut config, &args.command);

    let result = commands::dispatch(&config, &args.command);
    if let Err(e) = &result {
        log::debug!("Command failed: {:?}", e);
        eprintln!("{}", e);
    }
    commands::exit_code(&result)
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}
