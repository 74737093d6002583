//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use page_recount::store::{CandidateFilter, ObjectStore, RecordStore};
use page_recount::{DocumentRecord, Error, Result};

// Same document builders the unit tests use
#[path = "../../src/fixtures.rs"]
mod fixtures;

pub use fixtures::{docx_claiming, docx_with_entries, pdf_with_pages};

/// A container without any metadata part
pub fn docx_without_metadata() -> Vec<u8> {
    docx_with_entries(&[("word/document.xml", "<w:document/>")])
}

pub fn record(id: &str, path: &str, file_type: &str) -> DocumentRecord {
    DocumentRecord {
        id: id.to_string(),
        title: format!("Outline {}", id),
        file_path: Some(path.to_string()),
        file_type: file_type.to_string(),
        pages: Some(1),
    }
}

/// Record store and object store backed by memory
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<DocumentRecord>>,
    files: HashMap<String, Vec<u8>>,
    reject_counts_for: HashSet<String>,
    pub downloads: AtomicUsize,
    pub fetches: AtomicUsize,
    pub writes: Mutex<Vec<(String, Option<u32>)>>,
}

impl MemoryStore {
    pub fn new(records: Vec<DocumentRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    pub fn with_file(mut self, path: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(path.to_string(), bytes);
        self
    }

    /// Writes of a non-null count for `id` fail; null writes succeed
    pub fn rejecting_counts_for(mut self, id: &str) -> Self {
        self.reject_counts_for.insert(id.to_string());
        self
    }

    pub fn pages_of(&self, id: &str) -> Option<i64> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .and_then(|r| r.pages)
    }

    pub fn snapshot(&self) -> Vec<(String, Option<i64>)> {
        let mut all: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.id.clone(), r.pages))
            .collect();
        all.sort();
        all
    }
}

impl RecordStore for MemoryStore {
    fn fetch_page(&self, filter: &CandidateFilter, offset: usize, limit: usize) -> Result<Vec<DocumentRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut matching: Vec<DocumentRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.pages == Some(filter.pages))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    fn update_pages(&self, id: &str, pages: Option<u32>) -> Result<()> {
        if pages.is_some() && self.reject_counts_for.contains(id) {
            return Err(Error::Persist {
                id: id.to_string(),
                reason: "rejected".to_string(),
            });
        }

        self.writes.lock().unwrap().push((id.to_string(), pages));
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            record.pages = pages.map(i64::from);
        }
        Ok(())
    }
}

impl ObjectStore for MemoryStore {
    fn download(&self, _bucket: &str, path: &str) -> Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if path.ends_with("explode.pdf") {
            panic!("object store blew up on {}", path);
        }
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::Download(format!("no object at {}", path)))
    }
}

/// A stand-in for the office suite
///
/// Copies `rendered` to the expected output path after sleeping
/// `delay_secs`, and appends a line to the returned log file per conversion.
#[cfg(unix)]
pub fn fake_converter(dir: &Path, rendered: &[u8], delay_secs: u32) -> (PathBuf, PathBuf) {
    let fixture = dir.join("rendered-fixture.pdf");
    fs::write(&fixture, rendered).expect("Failed to write fixture");

    let log = dir.join("conversions.log");
    let body = format!(
        r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "fake office 1.0"
  exit 0
fi
echo converted >> "{log}"
sleep {delay}
outdir=""
while [ $# -gt 1 ]; do
  if [ "$1" = "--outdir" ]; then outdir="$2"; fi
  shift
done
name=$(basename -- "$1")
cp "{fixture}" "$outdir/${{name%.*}}.pdf"
"#,
        log = log.display(),
        delay = delay_secs,
        fixture = fixture.display(),
    );

    let script = write_script(dir, "fake-soffice", &body);

    // Another thread forking while the script was open for writing can make
    // the first exec fail with ETXTBSY
    for _ in 0..20 {
        if std::process::Command::new(&script).arg("--version").output().is_ok() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    (script, log)
}

/// Number of conversions the fake converter has performed
pub fn conversions(log: &Path) -> usize {
    fs::read_to_string(log).map(|s| s.lines().count()).unwrap_or(0)
}

/// Write an executable shell script into `dir`
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join(name);
    {
        let mut file = fs::File::create(&script).expect("Failed to create script");
        file.write_all(body.as_bytes()).expect("Failed to write script");
    }
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("Failed to chmod script");
    script
}

/// Convert, retrying while a freshly written script is still busy (ETXTBSY)
pub fn convert_retrying(
    converter: &page_recount::convert::Converter,
    input: &Path,
) -> std::result::Result<PathBuf, page_recount::ConversionError> {
    let mut result = converter.convert(input);
    for _ in 0..5 {
        if !matches!(result, Err(page_recount::ConversionError::Io(_))) {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
        result = converter.convert(input);
    }
    result
}
