//! Page Recount Library
//!
//! Re-verifies the page counts of documents held in a record store. Each
//! candidate record's file is downloaded and its page count resolved with a
//! tiered strategy:
//! - PDF: count pages (lopdf, then a raw byte scan)
//! - DOCX: convert to PDF with a headless office suite and count, falling
//!   back to the page count declared in the document's metadata
//!
//! The resolved count, or null when nothing could be established, is written
//! back. Records are processed by a small worker pool and a failure in one
//! record never stops the batch.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use page_recount::batch::{BatchOptions, BatchProcessor};
//! use page_recount::resolve::Resolver;
//! use page_recount::store::{SupabaseClient, SupabaseConfig};
//!
//! let client = Arc::new(SupabaseClient::new(&SupabaseConfig {
//!     url: "https://project.supabase.co".to_string(),
//!     service_key: "service-role-key".to_string(),
//!     ..SupabaseConfig::default()
//! }).expect("valid config"));
//!
//! let batch = BatchProcessor::new(client.clone(), client, Resolver::default(), BatchOptions::default());
//! let summary = batch.run(&mut std::io::stdout()).expect("candidates fetched");
//! println!("{}", summary);
//! ```

pub mod batch;
pub mod convert;
pub mod count;
pub mod error;
pub mod record;
pub mod resolve;
pub mod store;

#[cfg(test)]
mod fixtures;

// Re-export commonly used items
pub use error::{ConversionError, Error, Result};
pub use record::{DocumentKind, DocumentRecord, PageCount};
