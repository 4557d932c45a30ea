use clap::Parser;

mod cli;

use cli::args::Cli;
use cli::commands::dispatch;
use ventifact_core::config::Config;

use tracing_subscriber::{fmt, EnvFilter};

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("fatal: {e:?}");
            std::process::exit(2);
        }
    };
    init_logging(&cfg.log_level);

    let code = match dispatch(cli, cfg) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal: {e:?}");
            1
        }
    };
    std::process::exit(code);
}
