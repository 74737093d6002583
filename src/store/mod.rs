//! Record store and object store boundaries
//!
//! The batch driver only needs to page through candidate records, download
//! files and write page counts back. Anything that can do that implements
//! [`RecordStore`] and [`ObjectStore`].

pub mod supabase;

use log::info;
use crate::error::{Error, Result};
use crate::record::DocumentRecord;

pub use supabase::{SupabaseClient, SupabaseConfig};

/// Default number of records fetched per page
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Path prefixes historically prepended (or not) to stored file paths
pub const DEFAULT_PREFIXES: &[&str] = &["out", "outlines"];

/// Which records are up for re-verification
///
/// Only records whose current page count equals `pages` are selected. The
/// filter is deliberately narrow so a run never touches counts that were
/// computed properly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateFilter {
    pub pages: i64,
}

impl Default for CandidateFilter {
    fn default() -> Self {
        Self { pages: 1 }
    }
}

/// Paged access to document records
pub trait RecordStore: Send + Sync {
    /// Fetch up to `limit` matching records starting at `offset`
    fn fetch_page(&self, filter: &CandidateFilter, offset: usize, limit: usize) -> Result<Vec<DocumentRecord>>;

    /// Overwrite a record's page count; `None` writes null
    fn update_pages(&self, id: &str, pages: Option<u32>) -> Result<()>;
}

/// Blob downloads by bucket and path
pub trait ObjectStore: Send + Sync {
    fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>>;
}

/// Fetch every candidate, one page at a time
///
/// Paging stops at the first page shorter than `page_size`.
pub fn fetch_candidates(
    store: &dyn RecordStore,
    filter: &CandidateFilter,
    page_size: usize,
) -> Result<Vec<DocumentRecord>> {
    if page_size == 0 {
        return Err(Error::Config("page size must be at least 1".to_string()));
    }

    let mut records = Vec::new();
    let mut offset = 0;

    loop {
        let page = store.fetch_page(filter, offset, page_size)?;
        let fetched = page.len();
        records.extend(page);

        if fetched > 0 {
            info!("fetched {} candidate records so far", records.len());
        }
        if fetched < page_size {
            break;
        }
        offset += page_size;
    }

    Ok(records)
}

/// Storage paths to try for a recorded file path, in order
///
/// Yields the path as recorded, then with each prefix prepended, then with
/// each prefix segment stripped where present. Duplicates and empty paths are
/// skipped. Evaluated lazily so callers can stop at the first hit.
pub fn candidate_locations<'a>(
    path: &'a str,
    prefixes: &'a [String],
) -> impl Iterator<Item = String> + 'a {
    let prefixed = prefixes
        .iter()
        .map(move |prefix| format!("{}/{}", prefix.trim_matches('/'), path));
    let stripped = prefixes.iter().filter_map(move |prefix| {
        let segment = format!("{}/", prefix.trim_matches('/'));
        path.contains(&segment).then(|| path.replacen(&segment, "", 1))
    });

    let mut seen: Vec<String> = Vec::new();
    std::iter::once(path.to_string())
        .chain(prefixed)
        .chain(stripped)
        .filter(|candidate| !candidate.is_empty())
        .filter(move |candidate| {
            if seen.contains(candidate) {
                false
            } else {
                seen.push(candidate.clone());
                true
            }
        })
}
