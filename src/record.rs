//! Document records and resolved page counts

use std::fmt;
use std::num::NonZeroU32;
use crate::count::positive;

/// Declared file type of a stored document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Zip-container word-processor document (DOCX)
    Structured,
    /// Fixed-layout document with intrinsic pages (PDF)
    PageOriented,
    /// Anything else; never resolved
    Unknown,
}

impl DocumentKind {
    /// Map a stored `file_type` value to a kind (case-insensitive)
    pub fn from_file_type(file_type: &str) -> Self {
        match file_type.trim().to_ascii_lowercase().as_str() {
            "docx" => Self::Structured,
            "pdf" => Self::PageOriented,
            _ => Self::Unknown,
        }
    }

    /// Infer the kind from a file name's extension
    pub fn from_path(path: &str) -> Self {
        match path.rsplit_once('.') {
            Some((_, ext)) if !ext.contains('/') => Self::from_file_type(ext),
            _ => Self::Unknown,
        }
    }

    /// Extension used when the document has to be staged on disk
    pub fn extension(self) -> &'static str {
        match self {
            Self::Structured => "docx",
            Self::PageOriented => "pdf",
            Self::Unknown => "bin",
        }
    }
}

/// A record whose page count is up for re-verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRecord {
    /// Opaque record identifier
    pub id: String,
    /// Display title
    pub title: String,
    /// Storage location as recorded; may carry a stale prefix or none at all
    pub file_path: Option<String>,
    /// Raw declared file type
    pub file_type: String,
    /// Currently recorded page count
    pub pages: Option<i64>,
}

impl DocumentRecord {
    pub fn kind(&self) -> DocumentKind {
        DocumentKind::from_file_type(&self.file_type)
    }

    /// First eight characters of the id, for status lines
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(8) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }
}

/// Outcome of page count resolution: a positive count or undetermined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCount {
    Known(NonZeroU32),
    Undetermined,
}

impl PageCount {
    /// Build from a raw count; zero and negative values are undetermined
    pub fn from_raw(raw: i64) -> Self {
        positive(raw).into()
    }

    /// Value to persist: `None` means write null
    pub fn as_option(self) -> Option<u32> {
        match self {
            Self::Known(n) => Some(n.get()),
            Self::Undetermined => None,
        }
    }

    pub fn is_known(self) -> bool {
        matches!(self, Self::Known(_))
    }
}

impl From<Option<NonZeroU32>> for PageCount {
    fn from(value: Option<NonZeroU32>) -> Self {
        value.map_or(Self::Undetermined, Self::Known)
    }
}

impl fmt::Display for PageCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(n) => write!(f, "{}", n),
            Self::Undetermined => f.write_str("undetermined"),
        }
    }
}
