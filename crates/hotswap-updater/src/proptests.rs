//! Property-based tests for hotswap-updater.
//!
//! These tests use proptest to verify correctness properties across
//! randomly generated inputs.
//!
//! # Properties Tested
//!
//! - Property 1: Trusted host suffix matching
//! - Property 2: Unified progress stays in range and never goes backwards
//! - Property 3: Preserved entries are never extracted
//! - Property 4: Script generation is deterministic

#![cfg(test)]

use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;

use proptest::prelude::*;
use tempfile::TempDir;
use zip::write::FileOptions;

use crate::download::{host_is_trusted, DownloadProgress};
use crate::extract::{ArchiveExtractor, ExtractionProgress};
use crate::orchestrator::{download_percent, extraction_percent};
use crate::platform::{ArtifactKind, TargetPlatform};
use crate::script::{ScriptParams, ScriptRegistry};

// =============================================================================
// Generators
// =============================================================================

/// Generate a DNS label.
fn arb_label() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,12}"
}

/// Generate a dotted domain of 1 to 3 labels.
fn arb_domain() -> impl Strategy<Value = String> {
    prop::collection::vec(arb_label(), 1..4).prop_map(|labels| labels.join("."))
}

/// Generate a path-safe name.
fn arb_name() -> impl Strategy<Value = String> {
    "[a-z0-9_-]{1,10}"
}

/// Generate script parameters for any supported (platform, kind) pair.
fn arb_script_params() -> impl Strategy<Value = (TargetPlatform, ScriptParams)> {
    let pairs = prop_oneof![
        Just((TargetPlatform::Windows, ArtifactKind::Installer)),
        Just((TargetPlatform::Windows, ArtifactKind::Archive)),
        Just((TargetPlatform::MacOs, ArtifactKind::DiskImage)),
        Just((TargetPlatform::MacOs, ArtifactKind::Archive)),
        Just((TargetPlatform::Linux, ArtifactKind::Archive)),
    ];
    (pairs, any::<u32>(), arb_name(), arb_name(), arb_name()).prop_map(
        |((platform, kind), pid, install, temp, exe)| {
            let root = if platform == TargetPlatform::Windows {
                r"C:\"
            } else {
                "/"
            };
            let temp_dir = PathBuf::from(format!("{}{}", root, temp));
            let artifact = temp_dir.join("artifact");
            (
                platform,
                ScriptParams {
                    pid,
                    install_dir: PathBuf::from(format!("{}{}", root, install)),
                    temp_dir: temp_dir.clone(),
                    artifact: artifact.clone(),
                    payload: if kind == ArtifactKind::Archive {
                        temp_dir.join("extracted")
                    } else {
                        artifact
                    },
                    kind,
                    executable: exe,
                    mount_point: "/Volumes/Update".to_string(),
                },
            )
        },
    )
}

// =============================================================================
// Property 1: Trusted host suffix matching
//
// *For any* host built from labels followed by the trusted suffix, the host
// is trusted regardless of case; gluing anything onto the suffix without a
// dot is not.
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// **Property 1: Subdomains of the suffix are trusted**
    #[test]
    fn prop_subdomain_trusted(prefix in arb_domain(), suffix in arb_domain()) {
        let host = format!("{}.{}", prefix, suffix);
        prop_assert!(host_is_trusted(&host, &suffix));
        prop_assert!(host_is_trusted(&host.to_ascii_uppercase(), &suffix));
        prop_assert!(host_is_trusted(&suffix, &suffix));
    }

    /// **Property 1: Lookalike hosts are rejected**
    #[test]
    fn prop_lookalike_rejected(glue in arb_label(), suffix in arb_domain()) {
        let glued = format!("{}{}", glue, suffix);
        prop_assert!(!host_is_trusted(&glued, &suffix));

        let appended = format!("{}.invalid-tld", suffix);
        prop_assert!(!host_is_trusted(&appended, &suffix));
    }
}

// =============================================================================
// Property 2: Unified progress
//
// *For any* download or extraction progress sequence, the mapped percentage
// stays inside its stage's range and is non-decreasing when the component
// values are.
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// **Property 2: Download maps onto 0-50**
    #[test]
    fn prop_download_percent_bounded_monotonic(
        total in 1i64..i64::MAX,
        a in any::<i64>(),
        b in any::<i64>(),
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let p_lo = download_percent(DownloadProgress::new(lo, total));
        let p_hi = download_percent(DownloadProgress::new(hi, total));

        prop_assert!(p_hi <= 50);
        prop_assert!(p_lo <= p_hi);
        prop_assert_eq!(download_percent(DownloadProgress::new(total, total)), 50);
    }

    /// **Property 2: Unknown totals report zero**
    #[test]
    fn prop_download_percent_unknown_total(now in any::<i64>(), total in i64::MIN..=0) {
        prop_assert_eq!(download_percent(DownloadProgress::new(now, total)), 0);
    }

    /// **Property 2: Extraction maps onto 50-95**
    #[test]
    fn prop_extraction_percent_bounded_monotonic(total in 1u64..100_000, a in any::<u64>(), b in any::<u64>()) {
        let progress = |done| ExtractionProgress { entries_done: done, entries_total: total };
        let (a, b) = (a % (total + 1), b % (total + 1));
        let (lo, hi) = (a.min(b), a.max(b));

        let p_lo = extraction_percent(progress(lo));
        let p_hi = extraction_percent(progress(hi));
        prop_assert!((50..=95).contains(&p_lo));
        prop_assert!((50..=95).contains(&p_hi));
        prop_assert!(p_lo <= p_hi);
        prop_assert_eq!(extraction_percent(progress(total)), 95);
    }
}

// =============================================================================
// Property 3: Preserved entries are never extracted
//
// *For any* archive, no extracted path contains a preserved name, and the
// final progress report has entries_done == entries_total exactly once.
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(25))]

    /// **Property 3: Preserve list honoured and progress completes once**
    #[test]
    fn prop_preserved_never_extracted(
        names in prop::collection::btree_set(arb_name(), 1..8),
        with_dir in any::<bool>(),
    ) {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("release.zip");
        let preserved = format!("{}.ini", names.iter().next().unwrap());

        let mut writer = zip::ZipWriter::new(std::fs::File::create(&archive).unwrap());
        let options = FileOptions::default();
        let prefix = if with_dir {
            writer.add_directory("Sys/", options).unwrap();
            "Sys/"
        } else {
            ""
        };
        writer.start_file(format!("{}{}", prefix, preserved), options).unwrap();
        writer.write_all(b"[General]").unwrap();
        for name in &names {
            writer.start_file(format!("{}{}.bin", prefix, name), options).unwrap();
            writer.write_all(name.as_bytes()).unwrap();
        }
        writer.finish().unwrap();

        let dest = dir.path().join("out");
        let mut reports = Vec::new();
        ArchiveExtractor::new(vec![preserved.clone()])
            .extract(&archive, &dest, |p| reports.push(p))
            .unwrap();

        let expected_total = names.len() as u64 + 1 + u64::from(with_dir);
        prop_assert_eq!(reports.len() as u64, expected_total);
        prop_assert_eq!(reports.iter().filter(|p| p.is_complete()).count(), 1);
        prop_assert!(reports.last().unwrap().is_complete());

        let mut extracted = BTreeSet::new();
        let root = if with_dir { dest.join("Sys") } else { dest.clone() };
        for entry in std::fs::read_dir(&root).unwrap() {
            extracted.insert(entry.unwrap().file_name().to_string_lossy().into_owned());
        }
        prop_assert!(!extracted.contains(&preserved));
        prop_assert_eq!(extracted.len(), names.len());
    }
}

// =============================================================================
// Property 4: Script determinism
//
// *For any* parameters, building a script twice yields identical output
// that references the captured pid.
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// **Property 4: Identical params give identical scripts**
    #[test]
    fn prop_script_deterministic((platform, params) in arb_script_params()) {
        let registry = ScriptRegistry::default();
        let generator = registry.find(platform, params.kind).unwrap();

        let first = generator.build(&params);
        let second = generator.build(&params);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.contents(), second.contents());
        prop_assert!(first.ordered_commands.iter().any(|l| l.contains(&params.pid.to_string())));
        prop_assert!(first
            .ordered_commands
            .iter()
            .any(|l| l.contains(&params.temp_dir.display().to_string())));
    }
}
