mod error;
mod logging;
mod mail_forwarder;
mod mail_reader;
mod relay;
mod scheduler;
mod settings;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use log::info;

use crate::relay::NetworkSessions;

fn cli() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .about("Polls mailboxes and forwards unseen mail behind a \"forwarded\" banner")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .default_value("config.json"),
        )
        .arg(
            Arg::new("once")
                .long("once")
                .action(ArgAction::SetTrue)
                .help("Run a single cycle and exit"),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config_path = matches
        .get_one::<PathBuf>("config")
        .context("missing --config")?;

    let config = settings::load_settings(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    logging::setup_logging(config.log_file.as_deref()).context("setting up logging")?;

    info!(
        "Relaying {} of {} accounts every {}s",
        config.enabled_accounts().count(),
        config.accounts.len(),
        config.check_interval
    );

    let sessions = NetworkSessions::new(config.timeout());
    if matches.get_flag("once") {
        let summaries = scheduler::run_cycle(&sessions, &config).await;
        scheduler::log_totals(&summaries);
        info!("{}", logging::check_finished_line(chrono::Local::now()));
    } else {
        scheduler::run_forever(&sessions, &config).await;
    }
    Ok(())
}
