//! DOCX page count from embedded metadata
//!
//! Word-processor documents are zip containers. `docProps/app.xml` holds the
//! extended-properties part, whose `<Pages>` element is whatever the authoring
//! application last wrote. It is cheap to read but frequently stale, and
//! single-page values in particular cannot be trusted.

use std::io::{Cursor, Read};
use std::num::NonZeroU32;
use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use zip::ZipArchive;
use crate::count::positive;
use crate::error::{Error, Result};

/// Container entry holding the extended properties
pub const APP_PROPERTIES_ENTRY: &str = "docProps/app.xml";

/// Namespace of the extended-properties vocabulary
pub const EXTENDED_PROPERTIES_NS: &[u8] =
    b"http://schemas.openxmlformats.org/officeDocument/2006/extended-properties";

const PAGES_FIELD: &[u8] = b"Pages";

/// A `<Pages>` element found in the properties part
#[derive(Debug)]
struct PageField {
    namespace: Option<Vec<u8>>,
    text: String,
}

fn read_app_properties(bytes: &[u8]) -> Result<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut entry = archive.by_name(APP_PROPERTIES_ENTRY)?;

    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    Ok(xml)
}

fn bound_namespace(ns: &ResolveResult) -> Option<Vec<u8>> {
    match ns {
        ResolveResult::Bound(Namespace(uri)) => Some(uri.to_vec()),
        _ => None,
    }
}

/// Collect every non-empty `Pages` element, whatever its namespace
fn page_fields(xml: &str) -> Result<Vec<PageField>> {
    let mut reader = NsReader::from_str(xml);
    let mut fields = Vec::new();
    let mut open: Option<PageField> = None;

    loop {
        match reader.read_resolved_event()? {
            (ns, Event::Start(e)) => {
                if e.local_name().as_ref() == PAGES_FIELD {
                    open = Some(PageField {
                        namespace: bound_namespace(&ns),
                        text: String::new(),
                    });
                }
            }
            (_, Event::Text(t)) => {
                if let Some(field) = open.as_mut() {
                    field.text.push_str(&t.unescape()?);
                }
            }
            (_, Event::End(e)) => {
                if e.local_name().as_ref() == PAGES_FIELD {
                    if let Some(field) = open.take() {
                        if !field.text.trim().is_empty() {
                            fields.push(field);
                        }
                    }
                }
            }
            (_, Event::Eof) => break,
            _ => {}
        }
    }

    Ok(fields)
}

/// Read the page count recorded in a DOCX container's metadata
///
/// The namespaced `Pages` field is preferred. When the part uses an unexpected
/// or missing namespace, the first `Pages` element by local name is used.
pub fn count_from_metadata(bytes: &[u8]) -> Result<NonZeroU32> {
    let xml = read_app_properties(bytes)?;
    let fields = page_fields(&xml)?;

    let field = fields
        .iter()
        .find(|f| f.namespace.as_deref() == Some(EXTENDED_PROPERTIES_NS))
        .or_else(|| fields.first())
        .ok_or_else(|| Error::Metadata(format!("no Pages field in {}", APP_PROPERTIES_ENTRY)))?;

    let raw: i64 = field
        .text
        .trim()
        .parse()
        .map_err(|_| Error::Metadata(format!("Pages is not an integer: {:?}", field.text.trim())))?;

    positive(raw).ok_or_else(|| Error::Metadata(format!("Pages is not positive: {}", raw)))
}
