// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use super::*;
use crate::handler::{BuildOutcome, Import};
use crate::sandbox::PathSet;

fn t(name: &str) -> TargetId {
    TargetId::parse(&format!("//pkg:{name}")).unwrap()
}

fn action(name: &str) -> ActionId {
    ActionId::new(t(name), crate::ids::ActionType::Compile, None, "h".to_string())
}

fn empty_sandbox() -> SandboxSpec {
    SandboxSpec::new(PathSet::new(), PathSet::new(), PathSet::new())
}

/// Writes the same fixed content to its declared output on every run.
struct StableHandler {
    output: PathBuf,
}

impl LanguageHandler for StableHandler {
    fn build_with_context(
        &self,
        _target: &TargetId,
        _sources: &[PathBuf],
        _deps: &[TargetId],
        _language_config: &HashMap<String, String>,
        _sandbox: &SandboxSpec,
    ) -> crate::error::Result<BuildOutcome> {
        std::fs::write(&self.output, b"stable content\n").unwrap();
        Ok(BuildOutcome {
            output_hash: ContentHash::of_bytes(b"stable content\n"),
            outputs: vec![self.output.clone()],
        })
    }

    fn analyze_imports(&self, _sources: &[PathBuf]) -> crate::error::Result<Vec<Import>> {
        Ok(Vec::new())
    }

    fn outputs(&self, _target: &TargetId) -> Vec<PathBuf> {
        vec![self.output.clone()]
    }
}

/// Writes a build counter into its output on every run, so the content
/// hash differs each time.
struct FlakyHandler {
    output: PathBuf,
    counter: AtomicU32,
}

impl LanguageHandler for FlakyHandler {
    fn build_with_context(
        &self,
        _target: &TargetId,
        _sources: &[PathBuf],
        _deps: &[TargetId],
        _language_config: &HashMap<String, String>,
        _sandbox: &SandboxSpec,
    ) -> crate::error::Result<BuildOutcome> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let content = format!("built at 2026-01-0{n}T00:00:00 run\n");
        std::fs::write(&self.output, &content).unwrap();
        Ok(BuildOutcome {
            output_hash: ContentHash::of_bytes(content.as_bytes()),
            outputs: vec![self.output.clone()],
        })
    }

    fn analyze_imports(&self, _sources: &[PathBuf]) -> crate::error::Result<Vec<Import>> {
        Ok(Vec::new())
    }

    fn outputs(&self, _target: &TargetId) -> Vec<PathBuf> {
        vec![self.output.clone()]
    }
}

#[test]
fn stable_output_is_reported_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let handler = StableHandler {
        output: dir.path().join("out.bin"),
    };
    let verifier = DeterminismVerifier::new(&handler, DeterminismConfig::default());

    let report = verifier
        .verify(&action("a"), &t("a"), &[], &[], &HashMap::new(), &empty_sandbox())
        .unwrap();

    assert!(report.deterministic);
    assert!(report.violations.is_empty());
}

#[test]
fn varying_output_is_reported_as_violation() {
    let dir = tempfile::tempdir().unwrap();
    let handler = FlakyHandler {
        output: dir.path().join("out.bin"),
        counter: AtomicU32::new(0),
    };
    let verifier = DeterminismVerifier::new(&handler, DeterminismConfig::default());

    let report = verifier
        .verify(&action("a"), &t("a"), &[], &[], &HashMap::new(), &empty_sandbox())
        .unwrap();

    assert!(!report.deterministic);
    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].hashes.len(), 2);
}

#[test]
fn embedded_timestamp_is_detected_and_suggests_a_repair() {
    let dir = tempfile::tempdir().unwrap();
    let handler = FlakyHandler {
        output: dir.path().join("out.bin"),
        counter: AtomicU32::new(0),
    };
    let verifier = DeterminismVerifier::new(&handler, DeterminismConfig::default());

    let report = verifier
        .verify(&action("a"), &t("a"), &[], &[], &HashMap::new(), &empty_sandbox())
        .unwrap();

    assert!(report
        .detections
        .iter()
        .any(|d| d.kind == DetectionKind::EmbeddedTimestamp));
    assert!(report
        .repair_plan
        .suggestions
        .iter()
        .any(|s| s.kind == DetectionKind::EmbeddedTimestamp));
}

#[test]
fn fail_on_violation_turns_a_mismatch_into_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let handler = FlakyHandler {
        output: dir.path().join("out.bin"),
        counter: AtomicU32::new(0),
    };
    let verifier = DeterminismVerifier::new(
        &handler,
        DeterminismConfig {
            runs: 2,
            fail_on_violation: true,
        },
    );

    let err = verifier
        .verify(&action("a"), &t("a"), &[], &[], &HashMap::new(), &empty_sandbox())
        .unwrap_err();

    assert!(matches!(err, Error::DeterminismViolation { .. }));
}

#[test]
fn fewer_than_two_runs_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let handler = StableHandler {
        output: dir.path().join("out.bin"),
    };
    let verifier = DeterminismVerifier::new(
        &handler,
        DeterminismConfig {
            runs: 1,
            fail_on_violation: false,
        },
    );

    assert!(verifier
        .verify(&action("a"), &t("a"), &[], &[], &HashMap::new(), &empty_sandbox())
        .is_err());
}
