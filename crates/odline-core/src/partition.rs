//! Split planning: divide a remote record range into balanced fetch units.
//!
//! A plan is a list of contiguous, non-overlapping [`Split`]s covering
//! `[skip + 1, skip + records_to_extract]`. Leftover records from the integer
//! division go one per split to the earliest splits, so per-split load differs
//! by at most one record.

use serde::Serialize;

use crate::error::PlanError;

/// Tunable bounds for the planner.
///
/// `default_*` apply when the caller asks for 0; `max_*` are hard caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct PlanLimits {
    pub default_split_count: u64,
    pub max_split_count: u64,
    pub default_batch_size: u64,
    pub max_batch_size: u64,
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            default_split_count: 8,
            max_split_count: 10,
            default_batch_size: 2500,
            max_batch_size: 5000,
        }
    }
}

impl PlanLimits {
    fn check(&self) -> Result<(), PlanError> {
        let zero = [
            ("default_split_count", self.default_split_count),
            ("max_split_count", self.max_split_count),
            ("default_batch_size", self.default_batch_size),
            ("max_batch_size", self.max_batch_size),
        ]
        .into_iter()
        .find(|(_, v)| *v == 0);
        match zero {
            Some((name, _)) => Err(PlanError::InvalidLimits(name)),
            None => Ok(()),
        }
    }
}

/// Inputs for one planning run. Zero means "use the default" for every
/// field except `available` and `skip`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanRequest {
    pub available: u64,
    pub fetch: u64,
    pub skip: u64,
    pub split_count: u64,
    pub batch_size: u64,
}

/// One worker's share of the extraction: an inclusive 1-based record range
/// and the page size to request within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Split {
    start: u64,
    end: u64,
    batch_size: u64,
}

impl Split {
    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Number of records covered by this split
    pub fn record_count(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Page requests (`$skip`/`$top`) covering this split in order.
    pub fn pages(&self) -> Pages {
        Pages {
            next: self.start,
            end: self.end,
            batch_size: self.batch_size,
        }
    }
}

/// One `$skip`/`$top` request within a split
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub skip: u64,
    pub top: u64,
}

/// Iterator over the pages of a [`Split`]
#[derive(Debug, Clone)]
pub struct Pages {
    next: u64,
    end: u64,
    batch_size: u64,
}

impl Iterator for Pages {
    type Item = Page;

    fn next(&mut self) -> Option<Page> {
        if self.next > self.end {
            return None;
        }
        let top = self.batch_size.min(self.end - self.next + 1);
        let page = Page {
            skip: self.next - 1,
            top,
        };
        self.next += top;
        Some(page)
    }
}

/// Split planner with injectable limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct Planner {
    limits: PlanLimits,
}

impl Planner {
    pub fn new(limits: PlanLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &PlanLimits {
        &self.limits
    }

    /// Build the ordered split list for `req`.
    ///
    /// A fetch count beyond what is available is clamped; a skip that leaves
    /// nothing to extract is an error.
    pub fn plan(&self, req: &PlanRequest) -> Result<Vec<Split>, PlanError> {
        self.limits.check()?;
        let limits = &self.limits;

        let remaining = req.available.saturating_sub(req.skip);
        let mut to_extract = if req.fetch == 0 { remaining } else { req.fetch };
        if req.skip.saturating_add(to_extract) > req.available {
            to_extract = remaining;
        }
        if to_extract == 0 {
            return Err(PlanError::InvalidRange {
                available: req.available,
                skip: req.skip,
                fetch: req.fetch,
            });
        }

        let start_index = req.skip + 1;
        let end_index = req.skip + to_extract;

        let batch_size = match req.batch_size {
            0 => limits.default_batch_size,
            n => n,
        }
        .min(to_extract)
        .min(limits.max_batch_size);

        let mut split_count = match req.split_count {
            0 => limits.default_split_count,
            n => n,
        };
        if batch_size <= limits.default_batch_size && to_extract <= limits.default_batch_size {
            split_count = 1;
        }
        // never more splits than records
        split_count = split_count.min(limits.max_split_count).min(to_extract);

        let per_split = if split_count == 1 {
            to_extract
        } else {
            to_extract / split_count
        };
        let optimal_batch = per_split.min(batch_size);
        let leftover = to_extract % split_count;

        log::info!("Total available records: {}", req.available);
        log::info!("Records to skip: {}", req.skip);
        log::info!("Records to extract: {to_extract}");
        log::info!("Extraction range: {start_index}..={end_index}");
        log::info!("Calculated split count: {split_count}");
        log::info!("Records per split: {per_split} (+1 on the first {leftover})");
        log::info!("Batch size per split: {optimal_batch}");

        let mut splits = Vec::with_capacity(split_count as usize);
        let mut start = start_index;
        for i in 0..split_count {
            let extra = u64::from(i < leftover);
            let end = start - 1 + per_split + extra;
            splits.push(Split {
                start,
                end,
                batch_size: optimal_batch + extra,
            });
            start = end + 1;
        }
        Ok(splits)
    }
}

/// Plan with the default limits.
pub fn plan(req: &PlanRequest) -> Result<Vec<Split>, PlanError> {
    Planner::default().plan(req)
}
