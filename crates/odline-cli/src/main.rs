//! odline - parallel extraction of OData entity sets
//!
//! Counts the records of an entity set, splits the range into balanced
//! `$skip`/`$top` ranges and pages through them on parallel workers.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;
use odline_core::{AssertionMode, AuthType};

#[derive(Parser)]
#[command(name = "odline")]
#[command(about = "Parallel extraction of OData entity sets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./odline.toml or ~/.config/odline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Show how a record range would be split (no network)
    Plan(cmd::plan::PlanArgs),
    /// Count the records matching the configured filter
    Count(cmd::count::CountArgs),
    /// Check credentials and base URL
    Check(cmd::check::CheckArgs),
    /// List the entity sets the service exposes
    Entities(cmd::entities::EntitiesArgs),
    /// Extract an entity set to JSON page files
    Fetch(cmd::fetch::FetchArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let progress = Arc::new(odline_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug; progress bars show activity
    //   non-TTY: info unless --debug; logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    odline_core::init_logging(quiet, cli.debug, multi);

    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    odline_core::install_signal_handlers().context("Failed to install signal handlers")?;

    match cli.command {
        Command::Plan(args) => cmd::plan::run(args, &config),
        Command::Count(args) => cmd::count::run(args, config, &progress),
        Command::Check(args) => cmd::check::run(args, config, &progress),
        Command::Entities(args) => cmd::entities::run(args, config, &progress),
        Command::Fetch(args) => cmd::fetch::run(args, config, &progress),
        Command::Config => {
            show_config(&config);
            Ok(())
        }
    }
}

fn show_config(config: &Config) {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let set = |value: &Option<String>| {
        if value.as_deref().is_some_and(|s| !s.is_empty()) {
            "configured"
        } else {
            "not set"
        }
    };
    let or_dash = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let conn = &config.connection;
    table.add_row(vec!["Base URL", &conn.base_url]);
    match conn.auth_type {
        AuthType::Basic => {
            table.add_row(vec!["Auth", "basicAuth"]);
            table.add_row(vec!["Username", &or_dash(&conn.username)]);
            table.add_row(vec!["Password", set(&conn.password)]);
        }
        AuthType::OAuth2 => {
            table.add_row(vec!["Auth", "oAuth2"]);
            table.add_row(vec!["Token URL", &or_dash(&conn.token_url)]);
            table.add_row(vec!["Client ID", set(&conn.client_id)]);
            table.add_row(vec!["Company ID", &or_dash(&conn.company_id)]);
            match conn.assertion_mode {
                AssertionMode::Enter => {
                    table.add_row(vec!["Assertion", set(&conn.assertion_token)]);
                }
                AssertionMode::Create => {
                    table.add_row(vec!["User ID", &or_dash(&conn.user_id)]);
                    table.add_row(vec!["Private key", set(&conn.private_key)]);
                    table.add_row(vec![
                        "Assertion expiry",
                        &format!("{}m", conn.expire_in_minutes),
                    ]);
                }
            }
        }
    }
    table.add_row(vec!["Proxy", &or_dash(&conn.proxy_url)]);

    let extract = &config.extract;
    table.add_row(vec!["Entity", &extract.entity]);
    table.add_row(vec!["Filter", &or_dash(&extract.filter)]);
    table.add_row(vec!["Select", &or_dash(&extract.select)]);
    table.add_row(vec!["Expand", &or_dash(&extract.expand)]);

    let retry = &config.retry;
    table.add_row(vec![
        "Retry",
        &format!(
            "{} retries, {}s..{}s x{}",
            retry.max_retries, retry.initial_delay_secs, retry.max_delay_secs, retry.multiplier
        ),
    ]);
    let limits = &config.planner;
    table.add_row(vec![
        "Splits",
        &format!(
            "{} (max: {})",
            limits.default_split_count, limits.max_split_count
        ),
    ]);
    table.add_row(vec![
        "Batch size",
        &format!(
            "{} (max: {})",
            limits.default_batch_size, limits.max_batch_size
        ),
    ]);
    table.add_row(vec![
        "Output directory",
        &config.output.dir.display().to_string(),
    ]);
    table.add_row(vec![
        "Workers",
        &format!("{} (max: {})", config.workers.default, config.workers.max),
    ]);

    eprintln!("\n{table}");
}
