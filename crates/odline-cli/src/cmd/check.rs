//! Check subcommand - verify credentials and base URL

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use odline_core::progress::fmt_bytes;
use odline_core::SharedProgress;

use crate::cmd::{QueryArgs, connect, open, print_summary};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub query: QueryArgs,

    /// Also request one record of the entity with every query option applied
    #[arg(long)]
    pub probe: bool,

    /// Save the entity's `$metadata` document to this file
    #[arg(long)]
    pub metadata: Option<PathBuf>,
}

impl CheckArgs {
    fn needs_entity(&self) -> bool {
        self.probe || self.metadata.is_some()
    }
}

pub fn run(args: CheckArgs, mut config: Config, progress: &SharedProgress) -> Result<()> {
    let needs_entity = args.needs_entity();
    args.query.apply(&mut config);

    // A plain connection check does not need an entity.
    let service = if needs_entity {
        connect(&config)?
    } else {
        config.validate_connection()?;
        open(&config)?
    };

    let pb = progress.stage_line("check");
    pb.set_message(service.urls().base().to_string());
    let response = service.check_connection();
    pb.finish_and_clear();
    let response = response?;

    let mut rows = vec![
        ("Base URL", service.urls().base().to_string()),
        ("HTTP status", response.status_code.to_string()),
        (
            "Service version",
            response
                .service_version
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        ),
    ];

    if args.probe {
        let probe = service.probe()?;
        let size = fmt_bytes(probe.body.len() as u64);
        rows.push(("Probe", format!("HTTP {}, {size}", probe.status_code)));
    }

    if let Some(path) = &args.metadata {
        let metadata = service.metadata()?;
        std::fs::write(path, &metadata.body)
            .with_context(|| format!("Failed to write metadata to {}", path.display()))?;
        rows.push(("Metadata", path.display().to_string()));
    }

    print_summary("Connection", &rows);
    Ok(())
}
