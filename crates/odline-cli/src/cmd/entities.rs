//! Entities subcommand - list the entity sets a service exposes

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use odline_core::SharedProgress;

use crate::cmd::open;
use crate::config::Config;

#[derive(Args, Debug)]
pub struct EntitiesArgs {
    /// Only show entity sets whose name contains this text (case-insensitive)
    #[arg(short, long)]
    pub contains: Option<String>,
}

pub fn run(args: EntitiesArgs, config: Config, progress: &SharedProgress) -> Result<()> {
    config.validate_connection()?;
    let service = open(&config)?;

    let pb = progress.stage_line("entities");
    pb.set_message(service.urls().base().to_string());
    let names = service.list_entities();
    pb.finish_and_clear();
    let names = matching(names?, args.contains.as_deref());

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("Entity set").fg(Color::Cyan),
        ]);
    for (i, name) in names.iter().enumerate() {
        table.add_row(vec![Cell::new(i + 1), Cell::new(name)]);
    }
    println!("{table}");
    eprintln!("{} entity sets", names.len());
    Ok(())
}

fn matching(mut names: Vec<String>, contains: Option<&str>) -> Vec<String> {
    if let Some(needle) = contains.map(str::to_lowercase) {
        names.retain(|n| n.to_lowercase().contains(&needle));
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        ["User", "PerPerson", "FOCompany", "UserAccount"]
            .map(String::from)
            .to_vec()
    }

    #[test]
    fn no_filter_keeps_service_order() {
        assert_eq!(matching(names(), None), names());
    }

    #[test]
    fn filter_is_case_insensitive() {
        assert_eq!(matching(names(), Some("user")), vec!["User", "UserAccount"]);
        assert!(matching(names(), Some("Position")).is_empty());
    }
}
