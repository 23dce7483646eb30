//! Parallel extraction: page every split and write each page body to disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use indicatif::ProgressBar;

use crate::error::ServiceError;
use crate::manifest::{ExtractManifest, SplitOutcome, SplitRecord};
use crate::partition::Split;
use crate::progress::{ProgressContext, fmt_bytes, fmt_num};
use crate::service::ODataService;
use crate::transport::Transport;
use crate::work_queue::WorkQueue;

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Pages land in `<output_dir>/<entity>/`
    pub output_dir: PathBuf,
    pub workers: usize,
}

/// File name for page `page` of split `split`
pub fn page_file_name(split: usize, page: usize) -> String {
    format!("split_{split}_page_{page}.json")
}

/// Fetch every split with `options.workers` workers and write the manifest.
///
/// A failing split is recorded and the remaining splits carry on. `stop`
/// is polled between pages; once set, in-flight splits end as interrupted
/// and unclaimed splits are not started.
pub fn run<T: Transport>(
    service: &ODataService<T>,
    available: u64,
    splits: Vec<Split>,
    options: &ExtractOptions,
    progress: &ProgressContext,
    stop: &AtomicBool,
) -> Result<ExtractManifest, ServiceError> {
    let entity = service.urls().query().entity.clone();
    let entity_dir = options.output_dir.join(&entity);
    fs::create_dir_all(&entity_dir)?;

    let started_at = Utc::now();
    let queue = WorkQueue::new(splits);
    let records: Mutex<Vec<SplitRecord>> = Mutex::new(Vec::with_capacity(queue.total()));
    let workers = options.workers.clamp(1, queue.total().max(1));
    log::info!(
        "Extracting {} splits of {entity} with {workers} workers into {}",
        queue.total(),
        entity_dir.display()
    );

    // Own pool so the worker count does not depend on the global pool size.
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("odline-worker-{i}"))
        .build()?;

    pool.install(|| {
        rayon::scope(|s| {
            for _ in 0..workers {
                s.spawn(|_| {
                    while let Some((index, split)) = queue.next() {
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }
                        let pb =
                            progress.split_bar(&format!("split {index}"), split.record_count());
                        let record = fetch_split(service, index, split, &entity_dir, &pb, stop);
                        pb.finish_and_clear();
                        records
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .push(record);
                    }
                });
            }
        })
    });

    let mut splits = records.into_inner().unwrap_or_else(|e| e.into_inner());
    splits.sort_by_key(|r| r.index);

    let manifest = ExtractManifest {
        entity,
        base_url: service.urls().base().to_string(),
        available,
        splits,
        started_at,
        finished_at: Utc::now(),
    };
    manifest.write_to(&entity_dir)?;
    log::info!(
        "Wrote {} pages ({}) for {}; {} split(s) failed",
        fmt_num(manifest.total_pages()),
        fmt_bytes(manifest.total_bytes()),
        manifest.entity,
        manifest.failed()
    );
    Ok(manifest)
}

fn fetch_split<T: Transport>(
    service: &ODataService<T>,
    index: usize,
    split: &Split,
    dir: &Path,
    pb: &ProgressBar,
    stop: &AtomicBool,
) -> SplitRecord {
    let mut record = SplitRecord {
        index,
        start: split.start(),
        end: split.end(),
        batch_size: split.batch_size(),
        pages: 0,
        bytes: 0,
        outcome: SplitOutcome::Completed,
    };
    log::debug!(
        "split {index}: records {}..={} in pages of {}",
        split.start(),
        split.end(),
        split.batch_size()
    );

    for (n, page) in split.pages().enumerate() {
        if stop.load(Ordering::Relaxed) {
            log::warn!("split {index}: shutdown requested after {} pages", record.pages);
            record.outcome = SplitOutcome::Interrupted;
            return record;
        }
        pb.set_message(format!("page {n}"));
        let written = service
            .fetch_page(page)
            .and_then(|response| write_page(dir, index, n, &response.body));
        match written {
            Ok(bytes) => {
                record.pages += 1;
                record.bytes += bytes;
                pb.inc(page.top);
            }
            Err(e) => {
                log::error!("split {index}: page {n} (skip {}) failed: {e}", page.skip);
                record.outcome = SplitOutcome::Failed {
                    error: e.to_string(),
                };
                return record;
            }
        }
    }
    log::debug!("split {index}: done, {} pages", record.pages);
    record
}

/// Write through a temp file so a page file is never half-written.
fn write_page(dir: &Path, split: usize, page: usize, body: &[u8]) -> Result<u64, ServiceError> {
    let final_path = dir.join(page_file_name(split, page));
    let tmp_path = final_path.with_extension("json.tmp");
    fs::write(&tmp_path, body)?;
    fs::rename(&tmp_path, &final_path)?;
    Ok(body.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use reqwest::Url;

    use crate::error::TransportError;
    use crate::http::ResponseContainer;
    use crate::partition::{PlanLimits, PlanRequest, Planner};
    use crate::retry::{RetryPolicy, RetryingTransport};
    use crate::urls::{EntityQuery, ServiceUrls};

    /// Answers every page with a body naming its `$skip`, except for
    /// skips listed in `fail_at`, which get a 400.
    #[derive(Default)]
    struct PageServer {
        fail_at: Vec<u64>,
        hits: Mutex<HashMap<u64, usize>>,
    }

    fn skip_of(url: &Url) -> u64 {
        url.query_pairs()
            .find(|(k, _)| k == "$skip")
            .and_then(|(_, v)| v.parse().ok())
            .unwrap_or(0)
    }

    impl Transport for PageServer {
        fn call(&self, endpoint: &Url, _accept: &str) -> Result<ResponseContainer, TransportError> {
            let skip = skip_of(endpoint);
            *self.hits.lock().unwrap().entry(skip).or_default() += 1;
            let status_code = if self.fail_at.contains(&skip) { 400 } else { 200 };
            Ok(ResponseContainer {
                status_code,
                status_message: String::new(),
                service_version: None,
                body: format!(r#"{{"skip":{skip}}}"#).into_bytes(),
            })
        }
    }

    fn service(server: PageServer) -> ODataService<PageServer> {
        let query = EntityQuery {
            entity: "User".to_string(),
            ..Default::default()
        };
        let urls = ServiceUrls::new("https://api.example.com/odata/v2", query).unwrap();
        let transport = RetryingTransport::with_sleeper(server, |_| {});
        ODataService::new(urls, transport, RetryPolicy::default())
    }

    fn splits(available: u64, split_count: u64, batch_size: u64) -> Vec<Split> {
        let limits = PlanLimits {
            default_batch_size: 10,
            ..Default::default()
        };
        Planner::new(limits)
            .plan(&PlanRequest {
                available,
                split_count,
                batch_size,
                ..Default::default()
            })
            .unwrap()
    }

    fn options(dir: &Path, workers: usize) -> ExtractOptions {
        ExtractOptions {
            output_dir: dir.to_path_buf(),
            workers,
        }
    }

    #[test]
    fn writes_every_page_once() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(PageServer::default());
        let plan = splits(100, 4, 10);
        assert_eq!(plan.len(), 4);
        let stop = AtomicBool::new(false);
        let progress = ProgressContext::with_tty(false);

        let manifest = run(&svc, 100, plan, &options(dir.path(), 3), &progress, &stop).unwrap();

        assert!(manifest.is_complete());
        assert_eq!(manifest.splits.len(), 4);
        assert_eq!(manifest.total_pages(), 12);
        let indices: Vec<usize> = manifest.splits.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);

        let hits = svc_hits(&svc);
        assert_eq!(hits.len(), 12);
        assert!(hits.values().all(|n| *n == 1));

        let entity_dir = dir.path().join("User");
        let first = fs::read_to_string(entity_dir.join(page_file_name(0, 0))).unwrap();
        assert_eq!(first, r#"{"skip":0}"#);
        let second = fs::read_to_string(entity_dir.join(page_file_name(1, 0))).unwrap();
        assert_eq!(second, r#"{"skip":25}"#);
        assert!(entity_dir.join("manifest.json").exists());
        assert!(!entity_dir.join("split_0_page_0.json.tmp").exists());
    }

    fn svc_hits(svc: &ODataService<PageServer>) -> HashMap<u64, usize> {
        svc.transport().inner().hits.lock().unwrap().clone()
    }

    #[test]
    fn failed_split_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(PageServer {
            fail_at: vec![35],
            ..Default::default()
        });
        let plan = splits(100, 4, 10);
        let stop = AtomicBool::new(false);
        let progress = ProgressContext::with_tty(false);

        let manifest = run(&svc, 100, plan, &options(dir.path(), 2), &progress, &stop).unwrap();

        assert_eq!(manifest.failed(), 1);
        let failed = &manifest.splits[1];
        assert!(matches!(failed.outcome, SplitOutcome::Failed { .. }));
        assert_eq!(failed.pages, 1);
        assert_eq!(manifest.count(|o| *o == SplitOutcome::Completed), 3);
        // pages after the failure in that split were never requested
        assert!(!svc_hits(&svc).contains_key(&45));
    }

    #[test]
    fn stop_flag_prevents_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(PageServer::default());
        let stop = AtomicBool::new(true);
        let progress = ProgressContext::with_tty(false);

        let manifest =
            run(&svc, 100, splits(100, 4, 10), &options(dir.path(), 2), &progress, &stop).unwrap();

        assert!(manifest.splits.is_empty());
        assert!(svc_hits(&svc).is_empty());
        assert!(ExtractManifest::read_from(&dir.path().join("User")).is_ok());
    }

    /// Holds every call for a while and records the peak number of calls
    /// in flight at once.
    #[derive(Default)]
    struct SlowServer {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Transport for SlowServer {
        fn call(&self, _endpoint: &Url, _accept: &str) -> Result<ResponseContainer, TransportError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(ResponseContainer {
                status_code: 200,
                status_message: String::new(),
                service_version: None,
                body: b"{}".to_vec(),
            })
        }
    }

    #[test]
    fn worker_count_is_not_capped_by_calling_pool() {
        let dir = tempfile::tempdir().unwrap();
        let query = EntityQuery {
            entity: "User".to_string(),
            ..Default::default()
        };
        let urls = ServiceUrls::new("https://api.example.com/odata/v2", query).unwrap();
        let svc = ODataService::new(
            urls,
            RetryingTransport::with_sleeper(SlowServer::default(), |_| {}),
            RetryPolicy::default(),
        );
        // one page per split
        let plan = splits(80, 8, 10);
        assert_eq!(plan.len(), 8);
        let stop = AtomicBool::new(false);
        let progress = ProgressContext::with_tty(false);

        let caller = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let manifest = caller
            .install(|| run(&svc, 80, plan, &options(dir.path(), 8), &progress, &stop))
            .unwrap();

        assert!(manifest.is_complete());
        assert_eq!(manifest.total_pages(), 8);
        let peak = svc.transport().inner().peak.load(Ordering::SeqCst);
        assert!(peak > 2, "peak concurrency {peak}");
    }

    #[test]
    fn page_names() {
        assert_eq!(page_file_name(3, 12), "split_3_page_12.json");
    }
}
