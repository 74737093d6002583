//! Page count resolution
//!
//! A document is resolved by walking an ordered plan of tiers and stopping at
//! the first one that yields a positive count. Plans are fixed per document
//! kind:
//!
//! - PDF: count pages directly
//! - DOCX: convert to PDF and count, then fall back to embedded metadata
//!   (or the reverse under [`StructuredPolicy::MetadataFirst`])
//! - anything else: undetermined without trying
//!
//! Every tier failure is absorbed here; callers only ever see a
//! [`PageCount`].

use std::fmt;
use std::num::NonZeroU32;
use log::debug;
use crate::convert::{Converter, RemoveOnDrop, TempArtifact};
use crate::count::{count_from_metadata, RenderedPageCounter};
use crate::error::{Error, Result};
use crate::record::{DocumentKind, PageCount};

/// One strategy for deriving a page count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Count the pages of a PDF
    Render,
    /// Convert a DOCX to PDF and count the result
    Convert,
    /// Read the page count a DOCX declares in its metadata
    Metadata,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Render => "render",
            Self::Convert => "convert",
            Self::Metadata => "metadata",
        })
    }
}

/// Tier ordering for DOCX documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StructuredPolicy {
    /// Conversion first; metadata only when conversion fails
    #[default]
    ConvertFirst,
    /// Metadata first; conversion only when metadata is unreadable
    MetadataFirst,
}

const PAGE_ORIENTED_PLAN: &[Tier] = &[Tier::Render];
const CONVERT_FIRST_PLAN: &[Tier] = &[Tier::Convert, Tier::Metadata];
const METADATA_FIRST_PLAN: &[Tier] = &[Tier::Metadata, Tier::Convert];

/// A resolved count together with the tier that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub count: PageCount,
    pub tier: Option<Tier>,
}

impl Resolution {
    fn undetermined() -> Self {
        Self {
            count: PageCount::Undetermined,
            tier: None,
        }
    }
}

/// Determines page counts using the tiered strategy
pub struct Resolver {
    counter: RenderedPageCounter,
    converter: Option<Converter>,
    policy: StructuredPolicy,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(RenderedPageCounter::default(), Some(Converter::default()))
    }
}

impl Resolver {
    /// A resolver without a converter falls straight through to metadata for DOCX
    pub fn new(counter: RenderedPageCounter, converter: Option<Converter>) -> Self {
        Self {
            counter,
            converter,
            policy: StructuredPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: StructuredPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn converter(&self) -> Option<&Converter> {
        self.converter.as_ref()
    }

    /// Tiers attempted for `kind`, in order
    pub fn plan(&self, kind: DocumentKind) -> &'static [Tier] {
        match (kind, self.policy) {
            (DocumentKind::PageOriented, _) => PAGE_ORIENTED_PLAN,
            (DocumentKind::Structured, StructuredPolicy::ConvertFirst) => CONVERT_FIRST_PLAN,
            (DocumentKind::Structured, StructuredPolicy::MetadataFirst) => METADATA_FIRST_PLAN,
            (DocumentKind::Unknown, _) => &[],
        }
    }

    /// Resolve the page count of a document of the given kind
    pub fn resolve(&self, kind: DocumentKind, bytes: &[u8]) -> PageCount {
        self.resolve_traced(kind, bytes).count
    }

    /// Like [`Resolver::resolve`], also reporting which tier succeeded
    pub fn resolve_traced(&self, kind: DocumentKind, bytes: &[u8]) -> Resolution {
        for &tier in self.plan(kind) {
            match self.run_tier(tier, kind, bytes) {
                Ok(pages) => {
                    debug!("{} tier resolved {} pages", tier, pages);
                    return Resolution {
                        count: PageCount::Known(pages),
                        tier: Some(tier),
                    };
                }
                Err(e) => debug!("{} tier failed: {}", tier, e),
            }
        }

        Resolution::undetermined()
    }

    fn run_tier(&self, tier: Tier, kind: DocumentKind, bytes: &[u8]) -> Result<NonZeroU32> {
        match tier {
            Tier::Render => self.counter.count_pages(bytes),
            Tier::Metadata => count_from_metadata(bytes),
            Tier::Convert => self.convert_and_count(kind, bytes),
        }
    }

    fn convert_and_count(&self, kind: DocumentKind, bytes: &[u8]) -> Result<NonZeroU32> {
        let converter = self
            .converter
            .as_ref()
            .ok_or_else(|| Error::General("no converter configured".to_string()))?;

        let artifact = TempArtifact::stage(bytes, kind.extension())?;
        let converted = RemoveOnDrop::new(converter.convert(artifact.source())?);
        let pdf = std::fs::read(converted.path())?;

        self.counter.count_pages(&pdf)
    }
}
