//! Plan subcommand - show how a record range would be split, without a service

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, CellAlignment, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use odline_core::progress::fmt_num;
use odline_core::{PlanRequest, Planner, Split};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Number of records the service reports as available
    #[arg(short, long)]
    pub available: u64,

    /// Records to skip from the start
    #[arg(long)]
    pub skip: Option<u64>,

    /// Records to fetch (0 = everything after the skipped ones)
    #[arg(long)]
    pub fetch: Option<u64>,

    /// Requested number of splits (0 = default)
    #[arg(long)]
    pub splits: Option<u64>,

    /// Requested page size (0 = default)
    #[arg(short, long)]
    pub batch_size: Option<u64>,
}

impl PlanArgs {
    pub fn request(&self, config: &Config) -> PlanRequest {
        let base = config.extract.plan_request(self.available);
        PlanRequest {
            skip: self.skip.unwrap_or(base.skip),
            fetch: self.fetch.unwrap_or(base.fetch),
            split_count: self.splits.unwrap_or(base.split_count),
            batch_size: self.batch_size.unwrap_or(base.batch_size),
            ..base
        }
    }
}

pub fn run(args: PlanArgs, config: &Config) -> Result<()> {
    let splits = Planner::new(config.planner).plan(&args.request(config))?;
    eprintln!("\n{}", split_table(&splits));
    Ok(())
}

fn split_table(splits: &[Split]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(
            ["Split", "Start", "End", "Records", "Batch", "Pages"]
                .into_iter()
                .map(|h| Cell::new(h).fg(Color::Cyan)),
        );
    for (i, split) in splits.iter().enumerate() {
        let row = [
            i as u64,
            split.start(),
            split.end(),
            split.record_count(),
            split.batch_size(),
            split.pages().count() as u64,
        ];
        table.add_row(
            row.into_iter()
                .map(|v| Cell::new(fmt_num(v)).set_alignment(CellAlignment::Right)),
        );
    }
    let records: u64 = splits.iter().map(Split::record_count).sum();
    table.add_row(vec![
        Cell::new("total"),
        Cell::new(""),
        Cell::new(""),
        Cell::new(fmt_num(records)).set_alignment(CellAlignment::Right),
    ]);
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(available: u64) -> PlanArgs {
        PlanArgs {
            available,
            skip: None,
            fetch: None,
            splits: None,
            batch_size: None,
        }
    }

    #[test]
    fn flags_override_config() {
        let mut config = Config::default();
        config.extract.skip = 10;
        config.extract.split_count = 4;

        let req = PlanArgs {
            splits: Some(2),
            ..args(500)
        }
        .request(&config);
        assert_eq!(req.available, 500);
        assert_eq!(req.skip, 10);
        assert_eq!(req.split_count, 2);
        assert_eq!(req.batch_size, 0);
    }

    #[test]
    fn table_has_row_per_split_plus_total() {
        let config = Config::default();
        let req = PlanArgs {
            splits: Some(3),
            batch_size: Some(100),
            ..args(10_000)
        }
        .request(&config);
        let splits = Planner::new(config.planner).plan(&req).unwrap();
        let table = split_table(&splits);
        assert_eq!(table.row_iter().count(), 4);
        assert!(table.to_string().contains("3,334"));
    }

    #[test]
    fn empty_range_is_an_error() {
        let config = Config::default();
        assert!(run(args(0), &config).is_err());
    }
}
