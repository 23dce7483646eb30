pub mod check;
pub mod count;
pub mod entities;
pub mod fetch;
pub mod plan;

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use odline_core::{AuthenticatedTransport, HttpClient, ODataService, ServiceUrls};

use crate::config::Config;

pub type Service = ODataService<AuthenticatedTransport<HttpClient>>;

/// Entity selection flags shared by the commands that talk to the service.
#[derive(Args, Debug, Default)]
pub struct QueryArgs {
    /// Entity set to query (overrides `extract.entity`)
    #[arg(short, long)]
    pub entity: Option<String>,

    /// `$filter` expression (overrides `extract.filter`)
    #[arg(long)]
    pub filter: Option<String>,
}

impl QueryArgs {
    pub fn apply(self, config: &mut Config) {
        if let Some(entity) = self.entity {
            config.extract.entity = entity;
        }
        if let Some(filter) = self.filter {
            config.extract.filter = Some(filter);
        }
    }
}

/// Validated service handle for the configured connection and entity.
pub fn connect(config: &Config) -> Result<Service> {
    config.validate()?;
    open(config)
}

/// Service handle without validation; callers validate what they need.
pub fn open(config: &Config) -> Result<Service> {
    let transport = config
        .connection
        .connect()
        .context("Failed to set up the HTTP client")?;
    let urls = ServiceUrls::new(&config.connection.base_url, config.extract.query())
        .context("Invalid base URL")?;
    Ok(ODataService::new(urls, transport, config.retry.policy()))
}

/// Print a key-value summary table on stderr
pub fn print_summary(title: &str, rows: &[(&str, String)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(title).fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    for (label, value) in rows {
        table.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    eprintln!("\n{table}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_args_override_config() {
        let mut config = Config::default();
        config.extract.entity = "User".to_string();
        config.extract.filter = Some("old".to_string());

        QueryArgs {
            entity: None,
            filter: Some("status eq 't'".to_string()),
        }
        .apply(&mut config);
        assert_eq!(config.extract.entity, "User");
        assert_eq!(config.extract.filter.as_deref(), Some("status eq 't'"));

        QueryArgs {
            entity: Some("PerPerson".to_string()),
            filter: None,
        }
        .apply(&mut config);
        assert_eq!(config.extract.entity, "PerPerson");
        assert_eq!(config.extract.filter.as_deref(), Some("status eq 't'"));
    }

    #[test]
    fn connect_rejects_invalid_config() {
        let err = connect(&Config::default()).unwrap_err();
        assert!(err.to_string().contains("connection.base_url"));
    }
}
