//! Concurrent batch reconciliation
//!
//! Candidate records are fetched up front, then handed to a fixed pool of
//! worker threads. Each worker runs one record's pipeline at a time:
//!
//! ```text
//! Pending -> Downloading -> Resolving -> Persisting -> Done
//!                 \              \
//!                  +--> Failed --+--> Persisting (null)
//! ```
//!
//! A record that fails anywhere, panics included, is written back as null and
//! the batch carries on. Completed records are reported as they finish, in
//! no particular order.

use std::any::Any;
use std::fmt;
use std::io::Write;
use std::num::NonZeroU32;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use chrono::{DateTime, Local};
use crossbeam_channel::unbounded;
use log::{debug, info, warn};
use crate::error::{Error, Result};
use crate::record::{DocumentKind, DocumentRecord, PageCount};
use crate::resolve::Resolver;
use crate::store::{
    candidate_locations, fetch_candidates, CandidateFilter, ObjectStore, RecordStore,
    DEFAULT_PAGE_SIZE, DEFAULT_PREFIXES,
};

/// Default worker pool size, kept small to spare the converter and the store
pub const DEFAULT_WORKERS: usize = 3;

/// Options for a reconciliation run
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Bucket holding the documents
    pub bucket: String,
    /// Number of worker threads
    pub workers: usize,
    /// Records fetched per page
    pub page_size: usize,
    /// Which records to re-verify
    pub filter: CandidateFilter,
    /// Known path prefixes to try adding and removing when downloading
    pub prefixes: Vec<String>,
    /// Resolve without writing anything back
    pub dry_run: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            bucket: "Outlines".to_string(),
            workers: DEFAULT_WORKERS,
            page_size: DEFAULT_PAGE_SIZE,
            filter: CandidateFilter::default(),
            prefixes: DEFAULT_PREFIXES.iter().map(|p| p.to_string()).collect(),
            dry_run: false,
        }
    }
}

impl BatchOptions {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("worker count must be at least 1".to_string()));
        }
        if self.page_size == 0 {
            return Err(Error::Config("page size must be at least 1".to_string()));
        }
        if self.bucket.is_empty() {
            return Err(Error::Config("bucket name is empty".to_string()));
        }
        Ok(())
    }
}

/// Why a record ended up without a page count
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// Record has no file path
    MissingPath,
    /// Declared file type has no resolution strategy
    UnsupportedType(String),
    /// No candidate location could be downloaded
    DownloadFailed,
    /// Every tier failed
    Unresolved,
    /// Writing the count failed; null was written instead
    PersistRetried(String),
    /// The pipeline panicked
    Panicked(String),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPath => f.write_str("no file path"),
            Self::UnsupportedType(t) => write!(f, "unsupported file type {:?}", t),
            Self::DownloadFailed => f.write_str("download failed"),
            Self::Unresolved => f.write_str("could not determine"),
            Self::PersistRetried(e) => write!(f, "write failed: {}", e),
            Self::Panicked(msg) => write!(f, "panicked: {}", msg),
        }
    }
}

/// Final state of one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A page count was written
    Updated(NonZeroU32),
    /// Null was written
    Undetermined(Reason),
    /// Dry run: nothing written, this is what would have been
    Skipped(PageCount),
    /// Neither the count nor the fallback null could be written
    Failed(String),
}

/// A finished record as reported by a worker
#[derive(Debug)]
struct Completed {
    index: usize,
    record: DocumentRecord,
    outcome: Outcome,
}

/// Counters for a run
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    pub total: usize,
    pub updated: usize,
    pub undetermined: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    fn new(total: usize) -> Self {
        Self {
            started_at: Local::now(),
            finished_at: None,
            total,
            updated: 0,
            undetermined: 0,
            skipped: 0,
            failed: 0,
        }
    }

    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Updated(_) => self.updated += 1,
            Outcome::Undetermined(_) => self.undetermined += 1,
            Outcome::Skipped(_) => self.skipped += 1,
            Outcome::Failed(_) => self.failed += 1,
        }
    }

    fn finish(mut self) -> Self {
        self.finished_at = Some(Local::now());
        self
    }

    /// Records that were visited
    pub fn completed(&self) -> usize {
        self.updated + self.undetermined + self.skipped + self.failed
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(50);
        writeln!(f, "{}", rule)?;
        writeln!(f, "SUMMARY")?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "Total candidates: {}", self.total)?;
        writeln!(f, "Updated: {}", self.updated)?;
        writeln!(f, "Set to NULL: {}", self.undetermined)?;
        writeln!(f, "Skipped: {}", self.skipped)?;
        writeln!(f, "Failed: {}", self.failed)?;
        if let Some(finished) = self.finished_at {
            let elapsed = finished - self.started_at;
            writeln!(f, "Elapsed: {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0)?;
        }
        write!(f, "{}", rule)
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

fn status_line(total: usize, completed: &Completed) -> String {
    let prefix = format!("[{}/{}]", completed.index, total);
    let id = completed.record.short_id();

    match &completed.outcome {
        Outcome::Updated(pages) => format!(
            "{} OK   {}... - updated to {} pages ({})",
            prefix,
            id,
            pages,
            truncate(&completed.record.title, 30)
        ),
        Outcome::Undetermined(reason) => {
            format!("{} NULL {}... - {}, set to NULL", prefix, id, reason)
        }
        Outcome::Skipped(count) => format!("{} DRY  {}... - would set {}", prefix, id, count),
        Outcome::Failed(e) => format!("{} ERR  {}... - {}", prefix, id, e),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Drives page count resolution across every candidate record
pub struct BatchProcessor {
    records: Arc<dyn RecordStore>,
    objects: Arc<dyn ObjectStore>,
    resolver: Resolver,
    options: BatchOptions,
}

impl BatchProcessor {
    pub fn new(
        records: Arc<dyn RecordStore>,
        objects: Arc<dyn ObjectStore>,
        resolver: Resolver,
        options: BatchOptions,
    ) -> Self {
        Self {
            records,
            objects,
            resolver,
            options,
        }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Reconcile every candidate, writing one status line per record to `out`
    ///
    /// Only invalid options or failing to list candidates is an error.
    /// Per-record failures are absorbed into the summary, and a broken `out`
    /// only silences the status lines.
    pub fn run(&self, out: &mut dyn Write) -> Result<BatchSummary> {
        self.options.validate()?;

        let records = fetch_candidates(self.records.as_ref(), &self.options.filter, self.options.page_size)?;
        let total = records.len();
        let mut summary = BatchSummary::new(total);

        if records.is_empty() {
            info!("no records with pages = {}; nothing to do", self.options.filter.pages);
            return Ok(summary.finish());
        }

        match self.resolver.converter() {
            Some(converter) if !converter.is_available() => warn!(
                "converter {} not found; DOCX records fall back to metadata",
                converter.program().display()
            ),
            Some(converter) => info!("converter {} ready", converter.program().display()),
            None => info!("no converter configured; DOCX records use metadata only"),
        }

        let workers = self.options.workers.min(total);
        info!("processing {} records with {} workers", total, workers);

        let (job_tx, job_rx) = unbounded::<(usize, DocumentRecord)>();
        for (i, record) in records.into_iter().enumerate() {
            job_tx
                .send((i + 1, record))
                .map_err(|_| Error::General("job queue closed".to_string()))?;
        }
        drop(job_tx);

        let (done_tx, done_rx) = unbounded::<Completed>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let jobs = job_rx.clone();
                let done = done_tx.clone();
                scope.spawn(move || {
                    for (index, record) in jobs.iter() {
                        let outcome = self.process_isolated(&record);
                        if done.send(Completed { index, record, outcome }).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(done_tx);

            // Single collector: summary updates and status lines never interleave
            let mut reporting = true;
            for completed in done_rx.iter() {
                summary.record(&completed.outcome);
                if reporting {
                    if let Err(e) = writeln!(out, "{}", status_line(total, &completed)) {
                        warn!("status output failed ({}); continuing without status lines", e);
                        reporting = false;
                    }
                }
            }
        });

        Ok(summary.finish())
    }

    /// Run one record's pipeline, containing any panic
    pub fn process_isolated(&self, record: &DocumentRecord) -> Outcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.process(record))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                warn!("record {} panicked: {}", record.id, msg);
                if self.options.dry_run {
                    return Outcome::Skipped(PageCount::Undetermined);
                }
                self.write_null(record, Reason::Panicked(msg))
            }
        }
    }

    fn process(&self, record: &DocumentRecord) -> Outcome {
        let resolved = self.determine(record);

        if self.options.dry_run {
            return Outcome::Skipped(resolved.as_ref().ok().copied().into());
        }

        self.persist(record, resolved)
    }

    /// Download and resolve; `Err` carries why no count was found
    fn determine(&self, record: &DocumentRecord) -> std::result::Result<NonZeroU32, Reason> {
        let kind = record.kind();
        if kind == DocumentKind::Unknown {
            return Err(Reason::UnsupportedType(record.file_type.clone()));
        }

        let path = record
            .file_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or(Reason::MissingPath)?;

        let bytes = self.download(path).ok_or(Reason::DownloadFailed)?;

        match self.resolver.resolve(kind, &bytes) {
            PageCount::Known(pages) => Ok(pages),
            PageCount::Undetermined => Err(Reason::Unresolved),
        }
    }

    /// First candidate location that downloads wins
    fn download(&self, path: &str) -> Option<Vec<u8>> {
        candidate_locations(path, &self.options.prefixes).find_map(|candidate| {
            match self.objects.download(&self.options.bucket, &candidate) {
                Ok(bytes) => {
                    debug!("downloaded {} ({} bytes)", candidate, bytes.len());
                    Some(bytes)
                }
                Err(e) => {
                    debug!("download of {} failed: {}", candidate, e);
                    None
                }
            }
        })
    }

    fn persist(&self, record: &DocumentRecord, resolved: std::result::Result<NonZeroU32, Reason>) -> Outcome {
        let pages = resolved.as_ref().ok().map(|n| n.get());

        match self.records.update_pages(&record.id, pages) {
            Ok(()) => match resolved {
                Ok(n) => Outcome::Updated(n),
                Err(reason) => Outcome::Undetermined(reason),
            },
            Err(e) => {
                warn!("writing record {} failed: {}; retrying with null", record.id, e);
                let reason = match resolved {
                    Ok(_) => Reason::PersistRetried(e.to_string()),
                    Err(reason) => reason,
                };
                self.write_null(record, reason)
            }
        }
    }

    /// Best-effort null write
    fn write_null(&self, record: &DocumentRecord, reason: Reason) -> Outcome {
        let written = panic::catch_unwind(AssertUnwindSafe(|| self.records.update_pages(&record.id, None)));

        match written {
            Ok(Ok(())) => Outcome::Undetermined(reason),
            Ok(Err(e)) => {
                warn!("null write for record {} failed: {}", record.id, e);
                Outcome::Failed(e.to_string())
            }
            Err(payload) => Outcome::Failed(panic_message(payload.as_ref())),
        }
    }
}
