//! PDF page counting
//!
//! Two interchangeable backends are tried in priority order:
//! - [`LopdfBackend`] parses the document and reads the page tree
//! - [`ScanBackend`] scans the raw bytes for page dictionaries, which still
//!   works when the cross-reference table is damaged
//!
//! The first backend to produce a positive count wins.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::panic;
use std::str::FromStr;
use lopdf::Document;
use log::debug;
use crate::count::positive;
use crate::error::{Error, Result};

/// A way of counting the pages of a PDF held in memory
///
/// Implementations hold no mutable state and may be called concurrently for
/// distinct documents.
pub trait PageCountBackend: Send + Sync {
    /// Short name used in diagnostics
    fn name(&self) -> &'static str;

    /// Count the pages in `bytes`
    fn count(&self, bytes: &[u8]) -> Result<NonZeroU32>;
}

/// Structured parse via lopdf
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfBackend;

/// Read the Count field from the root Pages dictionary
///
/// This is more reliable than get_pages() which doesn't handle nested page trees
fn count_from_catalog(doc: &Document) -> Result<i64> {
    let catalog_id = doc.trailer.get(b"Root")?.as_reference()?;
    let catalog = doc.get_object(catalog_id)?.as_dict()?;
    let pages_id = catalog.get(b"Pages")?.as_reference()?;
    let pages = doc.get_object(pages_id)?.as_dict()?;
    let (_, count) = doc.dereference(pages.get(b"Count")?)?;
    Ok(count.as_i64()?)
}

impl PageCountBackend for LopdfBackend {
    fn name(&self) -> &'static str {
        "lopdf"
    }

    fn count(&self, bytes: &[u8]) -> Result<NonZeroU32> {
        // lopdf can panic on some malformed inputs
        let doc = panic::catch_unwind(|| Document::load_mem(bytes))
            .map_err(|_| Error::Render("PDF parser panicked".to_string()))??;

        let raw = match count_from_catalog(&doc) {
            Ok(n) => n,
            Err(e) => {
                debug!("catalog page count unavailable ({}), walking page tree", e);
                doc.get_pages().len() as i64
            }
        };

        positive(raw).ok_or_else(|| Error::Render(format!("PDF reports {} pages", raw)))
    }
}

/// Byte-level scan that rebuilds the page tree without the cross-reference table
///
/// Objects are located by their `N G obj` headers. When an object is defined
/// more than once (incremental updates), the last definition wins. Pages are
/// counted by walking `/Kids` from the catalog; if the tree cannot be followed,
/// distinct page leaf objects are counted instead. Pages stored inside
/// compressed object streams are invisible to this scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanBackend;

type ObjectId = (u32, u16);

const OBJ_KEYWORD: &[u8] = b"obj";
const ENDOBJ_KEYWORD: &[u8] = b"endobj";
const TYPE_KEY: &[u8] = b"/Type";
const MAX_TREE_DEPTH: usize = 64;

fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'\x0c' | b'\0')
}

fn is_delimiter(b: u8) -> bool {
    matches!(b, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn is_regular(b: u8) -> bool {
    !is_whitespace(b) && !is_delimiter(b)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && is_whitespace(bytes[i]) {
        i += 1;
    }
    i
}

fn parse_number<T: FromStr>(digits: &[u8]) -> Option<T> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Unsigned integer starting at `i`, and the index after it
fn number_at<T: FromStr>(bytes: &[u8], i: usize) -> Option<(T, usize)> {
    let len = bytes.get(i..)?.iter().take_while(|b| b.is_ascii_digit()).count();
    if len == 0 {
        return None;
    }
    Some((parse_number(&bytes[i..i + len])?, i + len))
}

/// Start of the digit run ending at `end`
fn digits_before(bytes: &[u8], end: usize) -> Option<usize> {
    let mut start = end;
    while start > 0 && bytes[start - 1].is_ascii_digit() {
        start -= 1;
    }
    (start < end).then_some(start)
}

/// Parse the `N G` preceding an `obj` keyword at `pos`
fn header_before(bytes: &[u8], pos: usize) -> Option<ObjectId> {
    let mut ids = [0usize; 2];
    let mut end = pos;

    for slot in ids.iter_mut().rev() {
        if end == 0 || !is_whitespace(bytes[end - 1]) {
            return None;
        }
        while end > 0 && is_whitespace(bytes[end - 1]) {
            end -= 1;
        }
        let start = digits_before(bytes, end)?;
        *slot = parse_number(&bytes[start..end])?;
        end = start;
    }

    if end > 0 && is_regular(bytes[end - 1]) {
        return None;
    }
    Some((u32::try_from(ids[0]).ok()?, u16::try_from(ids[1]).ok()?))
}

/// Parse an indirect reference `N G R` at `i`, returning it and the index after `R`
fn reference_at(bytes: &[u8], i: usize) -> Option<(ObjectId, usize)> {
    let (number, i) = number_at(bytes, skip_whitespace(bytes, i))?;
    let (generation, i) = number_at(bytes, skip_whitespace(bytes, i))?;
    let i = skip_whitespace(bytes, i);
    (bytes.get(i) == Some(&b'R')).then_some(((number, generation), i + 1))
}

/// Index just past the first whole occurrence of the name `key`
fn value_after(body: &[u8], key: &[u8]) -> Option<usize> {
    let mut pos = 0;
    while let Some(offset) = find(&body[pos..], key) {
        let end = pos + offset + key.len();
        if body.get(end).map_or(true, |&b| !is_regular(b)) {
            return Some(end);
        }
        pos = end;
    }
    None
}

/// Every name given as a `/Type` value in `body`
fn type_names(body: &[u8]) -> Vec<&[u8]> {
    let mut names = Vec::new();
    let mut pos = 0;

    while let Some(offset) = find(&body[pos..], TYPE_KEY) {
        let key_end = pos + offset + TYPE_KEY.len();
        pos = key_end;
        if body.get(key_end).map_or(false, |&b| is_regular(b)) {
            continue;
        }

        let i = skip_whitespace(body, key_end);
        if body.get(i) == Some(&b'/') {
            let start = i + 1;
            let len = body[start..].iter().take_while(|&&b| is_regular(b)).count();
            names.push(&body[start..start + len]);
            pos = start + len;
        }
    }

    names
}

fn has_type(body: &[u8], name: &[u8]) -> bool {
    type_names(body).iter().any(|n| *n == name)
}

/// References listed in an inline `/Kids` array
fn kids(body: &[u8]) -> Option<Vec<ObjectId>> {
    let mut i = skip_whitespace(body, value_after(body, b"/Kids")?);
    if body.get(i) != Some(&b'[') {
        return None;
    }
    i += 1;

    let mut kids = Vec::new();
    loop {
        i = skip_whitespace(body, i);
        match body.get(i) {
            Some(b']') => return Some(kids),
            Some(_) => {
                let (id, next) = reference_at(body, i)?;
                kids.push(id);
                i = next;
            }
            None => return None,
        }
    }
}

/// Object bodies found by scanning, later definitions replacing earlier ones
struct ObjectTable<'a> {
    bytes: &'a [u8],
    objects: HashMap<ObjectId, &'a [u8]>,
}

impl<'a> ObjectTable<'a> {
    fn scan(bytes: &'a [u8]) -> Self {
        let mut objects = HashMap::new();
        let mut pos = 0;

        while let Some(offset) = find(&bytes[pos..], OBJ_KEYWORD) {
            let keyword = pos + offset;
            let body_start = keyword + OBJ_KEYWORD.len();
            pos = body_start;

            if bytes.get(body_start).map_or(false, |&b| is_regular(b)) {
                continue;
            }
            let Some(id) = header_before(bytes, keyword) else {
                continue;
            };

            let body_end = find(&bytes[body_start..], ENDOBJ_KEYWORD)
                .map_or(bytes.len(), |n| body_start + n);
            objects.insert(id, &bytes[body_start..body_end]);
            pos = body_end;
        }

        Self { bytes, objects }
    }

    /// Root of the page tree, via the last trailer's `/Root` or any catalog
    fn page_tree_root(&self) -> Option<ObjectId> {
        let from_trailer = rfind(self.bytes, b"/Root")
            .and_then(|pos| reference_at(self.bytes, pos + b"/Root".len()))
            .map(|(id, _)| id)
            .filter(|id| self.objects.contains_key(id));
        let catalog = from_trailer.or_else(|| {
            self.objects
                .iter()
                .filter(|(_, body)| has_type(body, b"Catalog"))
                .map(|(id, _)| *id)
                .max()
        })?;

        let body = self.objects.get(&catalog)?;
        reference_at(body, value_after(body, b"/Pages")?).map(|(id, _)| id)
    }

    fn count_tree(&self) -> Option<usize> {
        let mut visited = HashSet::new();
        self.count_node(self.page_tree_root()?, &mut visited, 0)
    }

    fn count_node(&self, id: ObjectId, visited: &mut HashSet<ObjectId>, depth: usize) -> Option<usize> {
        if depth > MAX_TREE_DEPTH || !visited.insert(id) {
            return None;
        }

        let body = self.objects.get(&id)?;
        if has_type(body, b"Pages") {
            kids(body)?
                .into_iter()
                .try_fold(0, |total, kid| Some(total + self.count_node(kid, visited, depth + 1)?))
        } else if has_type(body, b"Page") {
            Some(1)
        } else {
            None
        }
    }

    fn count_leaves(&self) -> usize {
        self.objects
            .values()
            .filter(|body| has_type(body, b"Page") && !has_type(body, b"Pages"))
            .count()
    }
}

impl PageCountBackend for ScanBackend {
    fn name(&self) -> &'static str {
        "scan"
    }

    fn count(&self, bytes: &[u8]) -> Result<NonZeroU32> {
        if !bytes.starts_with(b"%PDF") {
            return Err(Error::Render("missing %PDF header".to_string()));
        }

        let table = ObjectTable::scan(bytes);
        let raw = match table.count_tree() {
            Some(n) => n,
            None => {
                debug!("page tree not reachable, counting page objects");
                table.count_leaves()
            }
        };

        positive(raw as i64).ok_or_else(|| Error::Render("no page objects found".to_string()))
    }
}

/// Counts PDF pages by trying each backend in order
pub struct RenderedPageCounter {
    backends: Vec<Box<dyn PageCountBackend>>,
}

impl Default for RenderedPageCounter {
    fn default() -> Self {
        Self::with_backends(vec![Box::new(LopdfBackend), Box::new(ScanBackend)])
    }
}

impl RenderedPageCounter {
    /// Use the given backends, highest priority first
    pub fn with_backends(backends: Vec<Box<dyn PageCountBackend>>) -> Self {
        Self { backends }
    }

    /// Count pages with the first backend that succeeds
    ///
    /// When every backend fails the last failure is returned.
    pub fn count_pages(&self, bytes: &[u8]) -> Result<NonZeroU32> {
        let mut last_error = Error::Render("no PDF backends configured".to_string());

        for backend in &self.backends {
            match backend.count(bytes) {
                Ok(pages) => {
                    debug!("{} backend counted {} pages", backend.name(), pages);
                    return Ok(pages);
                }
                Err(e) => {
                    debug!("{} backend failed: {}", backend.name(), e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}
