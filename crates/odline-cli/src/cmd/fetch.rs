//! Fetch subcommand - count, plan and extract an entity set

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Result, bail};
use clap::Args;

use odline_core::extract::{self, ExtractOptions};
use odline_core::progress::{fmt_bytes, fmt_num};
use odline_core::{
    ExtractManifest, Planner, SharedProgress, SplitOutcome, is_shutdown_requested, shutdown_flag,
};

use crate::cmd::{QueryArgs, connect, print_summary};
use crate::config::Config;

#[derive(Args, Debug)]
pub struct FetchArgs {
    #[command(flatten)]
    pub query: QueryArgs,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

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

    /// Number of parallel workers
    #[arg(short, long)]
    pub workers: Option<usize>,
}

impl FetchArgs {
    /// Fold flags into the config, returning output dir and worker count.
    fn apply(self, config: &mut Config) -> (PathBuf, usize) {
        self.query.apply(config);
        let extract = &mut config.extract;
        if let Some(skip) = self.skip {
            extract.skip = skip;
        }
        if let Some(fetch) = self.fetch {
            extract.fetch = fetch;
        }
        if let Some(splits) = self.splits {
            extract.split_count = splits;
        }
        if let Some(batch_size) = self.batch_size {
            extract.batch_size = batch_size;
        }
        let output = self.output.unwrap_or_else(|| config.output.dir.clone());
        (output, config.workers.resolve(self.workers))
    }
}

pub fn run(args: FetchArgs, mut config: Config, progress: &SharedProgress) -> Result<()> {
    let (output_dir, workers) = args.apply(&mut config);
    let service = connect(&config)?;
    let start = Instant::now();

    let pb = progress.stage_line("count");
    pb.set_message(config.extract.entity.clone());
    let available = service.available_record_count();
    pb.finish_and_clear();
    let available = available?;

    let splits = Planner::new(config.planner).plan(&config.extract.plan_request(available))?;
    if is_shutdown_requested() {
        bail!("Interrupted before extraction started");
    }
    let options = ExtractOptions {
        output_dir,
        workers,
    };
    let manifest = extract::run(
        &service,
        available,
        splits,
        &options,
        progress,
        shutdown_flag(),
    )?;

    print_summary("Fetch", &summary_rows(&manifest, &options, start.elapsed().as_secs_f64()));

    let failed = manifest.failed();
    if failed > 0 {
        bail!("{failed} of {} splits failed", manifest.splits.len());
    }
    if !manifest.is_complete() {
        bail!("Extraction interrupted; {} pages written", manifest.total_pages());
    }
    Ok(())
}

fn summary_rows(
    manifest: &ExtractManifest,
    options: &ExtractOptions,
    elapsed: f64,
) -> Vec<(&'static str, String)> {
    let completed = manifest.count(|o| *o == SplitOutcome::Completed);
    let interrupted = manifest.count(|o| *o == SplitOutcome::Interrupted);
    vec![
        ("Entity", manifest.entity.clone()),
        ("Available", fmt_num(manifest.available)),
        (
            "Splits",
            format!(
                "{completed} completed, {} failed, {interrupted} interrupted",
                manifest.failed()
            ),
        ),
        ("Pages", fmt_num(manifest.total_pages())),
        ("Bytes", fmt_bytes(manifest.total_bytes())),
        ("Workers", options.workers.to_string()),
        (
            "Output",
            options.output_dir.join(&manifest.entity).display().to_string(),
        ),
        ("Elapsed", format!("{elapsed:.1}s")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkersConfig;

    #[test]
    fn flags_override_config() {
        let mut config = Config::default();
        config.extract.entity = "User".to_string();
        config.extract.batch_size = 500;
        config.workers = WorkersConfig { default: 2, max: 4 };

        let args = FetchArgs {
            query: QueryArgs::default(),
            output: None,
            skip: Some(100),
            fetch: None,
            splits: Some(3),
            batch_size: None,
            workers: Some(10),
        };
        let (output, workers) = args.apply(&mut config);
        assert_eq!(output, PathBuf::from("./data"));
        assert_eq!(workers, 4);
        assert_eq!(config.extract.skip, 100);
        assert_eq!(config.extract.split_count, 3);
        assert_eq!(config.extract.batch_size, 500);
    }
}
