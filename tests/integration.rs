//! Integration tests for page count resolution

mod common;

use std::time::Duration;

use page_recount::convert::{Converter, TempArtifact};
use page_recount::count::{count_from_metadata, PageCountBackend, RenderedPageCounter, ScanBackend};
use page_recount::resolve::{Resolver, StructuredPolicy, Tier};
use page_recount::{ConversionError, DocumentKind, PageCount};

use common::{docx_claiming, docx_without_metadata, pdf_with_pages};

#[test]
fn test_twelve_page_pdf_with_either_backend() {
    let bytes = pdf_with_pages(12);

    let counter = RenderedPageCounter::default();
    assert_eq!(counter.count_pages(&bytes).unwrap().get(), 12);

    // Fast backend unavailable: only the scan remains
    let fallback_only = RenderedPageCounter::with_backends(vec![Box::new(ScanBackend)]);
    assert_eq!(fallback_only.count_pages(&bytes).unwrap().get(), 12);
    assert_eq!(ScanBackend.count(&bytes).unwrap().get(), 12);
}

#[test]
fn test_resolved_counts_are_positive_or_undetermined() {
    let resolver = Resolver::new(RenderedPageCounter::default(), None);
    let inputs: Vec<(DocumentKind, Vec<u8>)> = vec![
        (DocumentKind::PageOriented, pdf_with_pages(1)),
        (DocumentKind::PageOriented, pdf_with_pages(0)),
        (DocumentKind::PageOriented, Vec::new()),
        (DocumentKind::Structured, docx_claiming(0)),
        (DocumentKind::Structured, docx_claiming(4)),
        (DocumentKind::Structured, b"PK\x03\x04 truncated".to_vec()),
        (DocumentKind::Unknown, pdf_with_pages(3)),
    ];

    for (kind, bytes) in inputs {
        match resolver.resolve(kind, &bytes) {
            PageCount::Known(n) => assert!(n.get() > 0),
            PageCount::Undetermined => {}
        }
    }

    assert_eq!(resolver.resolve(DocumentKind::PageOriented, &pdf_with_pages(0)), PageCount::Undetermined);
    assert_eq!(resolver.resolve(DocumentKind::Structured, &docx_claiming(0)), PageCount::Undetermined);
}

#[test]
fn test_no_converter_and_no_metadata_is_undetermined() {
    let resolver = Resolver::new(
        RenderedPageCounter::default(),
        Some(Converter::new("/nonexistent/soffice", Duration::from_secs(60))),
    );
    let resolution = resolver.resolve_traced(DocumentKind::Structured, &docx_without_metadata());
    assert_eq!(resolution.count, PageCount::Undetermined);
    assert_eq!(resolution.tier, None);
}

#[test]
fn test_metadata_alone_reads_declared_count() {
    assert_eq!(count_from_metadata(&docx_claiming(1)).unwrap().get(), 1);
}

#[cfg(unix)]
mod with_fake_converter {
    use super::*;
    use crate::common::{conversions, convert_retrying, fake_converter, write_script};
    use tempfile::TempDir;

    #[test]
    fn test_conversion_beats_stale_metadata() {
        // Metadata claims one page, the document really renders to three
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let (script, log) = fake_converter(temp_dir.path(), &pdf_with_pages(3), 0);

        let resolver = Resolver::new(
            RenderedPageCounter::default(),
            Some(Converter::new(&script, Duration::from_secs(30))),
        );
        let resolution = resolver.resolve_traced(DocumentKind::Structured, &docx_claiming(1));

        assert_eq!(resolution.count.as_option(), Some(3));
        assert_eq!(resolution.tier, Some(Tier::Convert));
        assert_eq!(conversions(&log), 1);
    }

    #[test]
    fn test_metadata_first_policy_skips_conversion() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let (script, log) = fake_converter(temp_dir.path(), &pdf_with_pages(3), 0);

        let resolver = Resolver::new(
            RenderedPageCounter::default(),
            Some(Converter::new(&script, Duration::from_secs(30))),
        )
        .with_policy(StructuredPolicy::MetadataFirst);

        assert_eq!(resolver.resolve(DocumentKind::Structured, &docx_claiming(1)).as_option(), Some(1));
        assert_eq!(conversions(&log), 0);
    }

    #[test]
    fn test_second_conversion_reuses_output() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let (script, log) = fake_converter(temp_dir.path(), &pdf_with_pages(2), 0);
        let converter = Converter::new(&script, Duration::from_secs(30));

        let artifact = TempArtifact::stage(&docx_claiming(1), "docx").expect("Failed to stage");
        let first = converter.convert(artifact.source()).expect("first conversion");
        let second = converter.convert(artifact.source()).expect("second conversion");

        assert_eq!(first, second);
        assert!(first.exists());
        assert_eq!(conversions(&log), 1);
    }

    #[test]
    fn test_conversion_timeout_falls_back_to_metadata() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let (script, _log) = fake_converter(temp_dir.path(), &pdf_with_pages(3), 5);
        let converter = Converter::new(&script, Duration::from_secs(1));

        let artifact = TempArtifact::stage(&docx_claiming(2), "docx").expect("Failed to stage");
        assert!(matches!(converter.convert(artifact.source()), Err(ConversionError::Timeout(_))));

        let resolver = Resolver::new(RenderedPageCounter::default(), Some(converter));
        let resolution = resolver.resolve_traced(DocumentKind::Structured, &docx_claiming(2));
        assert_eq!(resolution.count.as_option(), Some(2));
        assert_eq!(resolution.tier, Some(Tier::Metadata));
    }

    #[test]
    fn test_converter_failure_exit_code() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let script = write_script(temp_dir.path(), "failing-soffice", "#!/bin/sh\nexit 3\n");

        let converter = Converter::new(&script, Duration::from_secs(30));
        let artifact = TempArtifact::stage(&docx_claiming(1), "docx").expect("Failed to stage");

        let result = convert_retrying(&converter, artifact.source());
        assert!(matches!(result, Err(ConversionError::NonZeroExit(_))));
    }

    #[test]
    fn test_each_conversion_gets_private_profile() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let args_log = temp_dir.path().join("args.log");
        let body = format!("#!/bin/sh\necho \"$@\" >> \"{}\"\n", args_log.display());
        let script = write_script(temp_dir.path(), "recording-soffice", &body);
        let converter = Converter::new(&script, Duration::from_secs(30));

        for _ in 0..2 {
            let artifact = TempArtifact::stage(&docx_claiming(1), "docx").expect("Failed to stage");
            // The recording script writes no PDF
            let result = convert_retrying(&converter, artifact.source());
            assert!(matches!(result, Err(ConversionError::NoOutput(_))));
        }

        let logged = std::fs::read_to_string(&args_log).expect("Failed to read args log");
        let profiles: Vec<&str> = logged
            .lines()
            .map(|line| {
                let arg = line
                    .split_whitespace()
                    .find(|arg| arg.starts_with("-env:UserInstallation=file:///"))
                    .expect("profile argument passed");
                assert!(line.contains("--headless"));
                arg
            })
            .collect();
        assert_eq!(profiles.len(), 2);
        assert_ne!(profiles[0], profiles[1]);
    }

    #[test]
    fn test_timeout_kills_whole_process_group() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let marker = temp_dir.path().join("still-running");
        let body = format!(
            "#!/bin/sh\n(sleep 2; touch \"{}\") &\nsleep 30\n",
            marker.display()
        );
        let script = write_script(temp_dir.path(), "forking-soffice", &body);
        let converter = Converter::new(&script, Duration::from_secs(1));
        let artifact = TempArtifact::stage(&docx_claiming(1), "docx").expect("Failed to stage");

        let result = convert_retrying(&converter, artifact.source());
        assert!(matches!(result, Err(ConversionError::Timeout(_))));

        std::thread::sleep(Duration::from_secs(3));
        assert!(!marker.exists());
    }

    #[test]
    fn test_hung_version_check_is_unavailable() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let script = write_script(temp_dir.path(), "hung-soffice", "#!/bin/sh\nsleep 30\n");
        let converter = Converter::new(&script, Duration::from_secs(1));

        let started = std::time::Instant::now();
        assert!(!converter.is_available());
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
