//! Page Recount CLI tool
//!
//! Re-verifies page counts stored in a Supabase table, or resolves the page
//! counts of local files.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use glob::glob;
use log::{error, info, warn};

use page_recount::batch::{BatchOptions, BatchProcessor, DEFAULT_WORKERS};
use page_recount::convert::{Converter, DEFAULT_PROGRAM};
use page_recount::count::RenderedPageCounter;
use page_recount::resolve::{Resolver, StructuredPolicy};
use page_recount::store::{CandidateFilter, SupabaseClient, SupabaseConfig, DEFAULT_PAGE_SIZE};
use page_recount::DocumentKind;

/// Page Recount - re-verify document page counts
#[derive(Parser)]
#[command(name = "page-recount")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    # Re-verify every record currently marked as one page
    page-recount run --url https://project.supabase.co --service-key $KEY

    # See what would change without writing anything
    page-recount run --dry-run

    # Resolve local files
    page-recount count \"outlines/*.docx\" scan.pdf")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-verify page counts held in the record store
    Run {
        /// Supabase project URL
        #[arg(long, env = "SUPABASE_URL")]
        url: String,

        /// Service role key
        #[arg(long, env = "SUPABASE_SERVICE_ROLE_KEY", hide_env_values = true)]
        service_key: String,

        /// Storage bucket holding the documents
        #[arg(long, default_value = "Outlines")]
        bucket: String,

        /// Table holding the document records
        #[arg(long, default_value = "outlines")]
        table: String,

        /// Number of records processed in parallel
        #[arg(long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,

        /// Records fetched per request
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,

        /// Only re-verify records whose current page count equals this
        #[arg(long, default_value_t = 1)]
        match_pages: i64,

        /// Path prefix to try adding and stripping when downloading (repeatable)
        #[arg(long = "prefix", default_values_t = vec!["out".to_string(), "outlines".to_string()])]
        prefixes: Vec<String>,

        /// Resolve every candidate but write nothing back
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        resolve: ResolveArgs,
    },

    /// Resolve the page counts of local files
    Count {
        /// Input files (.pdf or .docx). Supports glob patterns like "*.docx"
        #[arg(required = true)]
        inputs: Vec<String>,

        #[command(flatten)]
        resolve: ResolveArgs,
    },
}

#[derive(Args)]
struct ResolveArgs {
    /// Office suite used for DOCX to PDF conversion
    #[arg(long, default_value = DEFAULT_PROGRAM)]
    converter: PathBuf,

    /// Seconds a single conversion may take
    #[arg(long, default_value_t = 60)]
    convert_timeout: u64,

    /// Skip conversion and rely on DOCX metadata
    #[arg(long)]
    no_convert: bool,

    /// Tier order for DOCX documents
    #[arg(long, value_enum, default_value_t = Policy::ConvertFirst)]
    policy: Policy,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Policy {
    ConvertFirst,
    MetadataFirst,
}

impl From<Policy> for StructuredPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::ConvertFirst => StructuredPolicy::ConvertFirst,
            Policy::MetadataFirst => StructuredPolicy::MetadataFirst,
        }
    }
}

impl ResolveArgs {
    fn build(&self) -> Result<Resolver> {
        if self.convert_timeout == 0 {
            bail!("--convert-timeout must be greater than zero");
        }

        let converter = (!self.no_convert)
            .then(|| Converter::new(&self.converter, Duration::from_secs(self.convert_timeout)));

        Ok(Resolver::new(RenderedPageCounter::default(), converter).with_policy(self.policy.into()))
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            url, service_key, bucket, table, workers, page_size,
            match_pages, prefixes, dry_run, resolve,
        } => {
            let store = SupabaseConfig {
                url,
                service_key,
                table,
                ..SupabaseConfig::default()
            };
            let options = BatchOptions {
                bucket,
                workers,
                page_size,
                filter: CandidateFilter { pages: match_pages },
                prefixes,
                dry_run,
            };
            cmd_run(&store, options, &resolve)
        }
        Commands::Count { inputs, resolve } => cmd_count(inputs, &resolve),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(1);
    }
}

/// Expand glob patterns in input paths
fn expand_globs(patterns: Vec<String>) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for pattern in patterns {
        // Check if pattern contains glob characters
        if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
            let mut matched = false;
            for entry in glob(&pattern).with_context(|| format!("invalid glob pattern: {}", pattern))? {
                match entry {
                    Ok(path) => {
                        paths.push(path);
                        matched = true;
                    }
                    Err(e) => warn!("glob error for {}: {}", pattern, e),
                }
            }
            if !matched {
                bail!("no files matched pattern: {}", pattern);
            }
        } else {
            paths.push(PathBuf::from(pattern));
        }
    }

    paths.sort();
    Ok(paths)
}

/// Reconcile page counts in the record store
fn cmd_run(store: &SupabaseConfig, options: BatchOptions, resolve: &ResolveArgs) -> Result<()> {
    options.validate()?;
    let resolver = resolve.build()?;
    let client = Arc::new(SupabaseClient::new(store)?);

    info!("store: {}", store.url);
    info!("bucket: {}", options.bucket);
    if options.dry_run {
        info!("dry run: nothing will be written");
    }

    let batch = BatchProcessor::new(client.clone(), client, resolver, options);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    // Options were validated above, so a failed run means listing candidates failed
    let summary = batch
        .run(&mut out)
        .context("failed to fetch candidate records")?;

    // Every record has been persisted by now; losing the summary is not a failed run
    if let Err(e) = writeln!(out).and_then(|()| writeln!(out, "{}", summary)) {
        warn!("could not print summary: {}", e);
        info!(
            "total {}, updated {}, set to NULL {}, skipped {}, failed {}",
            summary.total, summary.updated, summary.undetermined, summary.skipped, summary.failed
        );
    }
    Ok(())
}

/// Resolve page counts of local files
fn cmd_count(inputs: Vec<String>, resolve: &ResolveArgs) -> Result<()> {
    let inputs = expand_globs(inputs)?;
    let resolver = resolve.build()?;

    for path in &inputs {
        if !path.exists() {
            bail!("input file not found: {}", path.display());
        }
    }

    for path in &inputs {
        let kind = DocumentKind::from_path(&path.to_string_lossy());
        let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let resolution = resolver.resolve_traced(kind, &bytes);

        println!("File: {}", path.display());
        match resolution.tier {
            Some(tier) => println!("Pages: {} (via {})", resolution.count, tier),
            None => println!("Pages: {}", resolution.count),
        }
    }

    Ok(())
}
