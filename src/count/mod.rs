//! Page count extraction tiers
//!
//! Each counter takes raw document bytes and yields a strictly positive page
//! count or an error describing why it could not.

pub mod docx;
pub mod pdf;

use std::num::NonZeroU32;

// Re-export commonly used items
pub use docx::count_from_metadata;
pub use pdf::{LopdfBackend, PageCountBackend, RenderedPageCounter, ScanBackend};

/// Narrow a raw count to a positive `u32`
pub(crate) fn positive(raw: i64) -> Option<NonZeroU32> {
    u32::try_from(raw).ok().and_then(NonZeroU32::new)
}
