//! Count subcommand - ask the service how many records match

use anyhow::Result;
use clap::Args;

use odline_core::SharedProgress;
use odline_core::progress::fmt_num;

use crate::cmd::{QueryArgs, connect, print_summary};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct CountArgs {
    #[command(flatten)]
    pub query: QueryArgs,
}

pub fn run(args: CountArgs, mut config: Config, progress: &SharedProgress) -> Result<()> {
    args.query.apply(&mut config);
    let service = connect(&config)?;

    let pb = progress.stage_line("count");
    pb.set_message(service.urls().count().to_string());
    let available = service.available_record_count();
    pb.finish_and_clear();
    let available = available?;

    print_summary(
        "Count",
        &[
            ("Entity", config.extract.entity.clone()),
            (
                "Filter",
                config.extract.filter.clone().unwrap_or_else(|| "-".to_string()),
            ),
            ("Available records", fmt_num(available)),
        ],
    );
    Ok(())
}
