// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Determinism verifier.
//!
//! Runs a target's build step `N >= 2` times and compares every declared
//! output by content hash. A mismatch across runs is a `Violation`;
//! independent of that, each output is scanned for patterns that commonly
//! cause non-reproducibility (embedded timestamps, UUIDs, random seeds,
//! un-stabilized absolute build paths) and recorded as a `Detection`. This
//! subsystem is informational by default: it reports, it never repairs.
//! `RepairPlan` is inert data describing a fix a human or CI policy could
//! apply; nothing in this crate executes it.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

use regex::Regex;

use crate::error::{Error, Result};
use crate::handler::LanguageHandler;
use crate::hash::{ContentHash, FastHasher};
use crate::ids::{ActionId, TargetId};
use crate::sandbox::SandboxSpec;

/// How many times to rebuild, and whether a mismatch should fail the build
/// outright.
#[derive(Debug, Clone, Copy)]
pub struct DeterminismConfig {
    pub runs: usize,
    pub fail_on_violation: bool,
}

impl Default for DeterminismConfig {
    fn default() -> Self {
        Self {
            runs: 2,
            fail_on_violation: false,
        }
    }
}

/// The kind of non-determinism a pattern scan matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionKind {
    EmbeddedTimestamp,
    EmbeddedUuid,
    RandomSeed,
    UnstabilizedBuildPath,
}

impl fmt::Display for DetectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DetectionKind::EmbeddedTimestamp => "embedded timestamp",
            DetectionKind::EmbeddedUuid => "embedded uuid",
            DetectionKind::RandomSeed => "random seed",
            DetectionKind::UnstabilizedBuildPath => "unstabilized build path",
        };
        f.write_str(s)
    }
}

/// One output whose content hash differed across runs.
#[derive(Debug, Clone)]
pub struct Violation {
    pub output: PathBuf,
    pub hashes: Vec<ContentHash>,
}

/// One pattern match in a declared output, independent of whether that
/// output actually varied across runs (a detection can exist even in an
/// otherwise-deterministic build, e.g. a timestamp that happens to be
/// stable because the clock didn't tick between runs).
#[derive(Debug, Clone)]
pub struct Detection {
    pub kind: DetectionKind,
    pub output: PathBuf,
    pub snippet: String,
}

/// A suggested, never-applied fix for one detection kind.
#[derive(Debug, Clone)]
pub struct RepairSuggestion {
    pub kind: DetectionKind,
    pub description: String,
}

/// Inert collection of suggestions derived from `detections`. Nothing in
/// this crate reads a `RepairPlan` back in and applies it; it exists to be
/// surfaced to a human or a CI policy.
#[derive(Debug, Clone, Default)]
pub struct RepairPlan {
    pub suggestions: Vec<RepairSuggestion>,
}

impl RepairPlan {
    fn from_detections(detections: &[Detection]) -> Self {
        let mut seen = std::collections::HashSet::new();
        let mut suggestions = Vec::new();
        for detection in detections {
            if !seen.insert(detection.kind) {
                continue;
            }
            let description = match detection.kind {
                DetectionKind::EmbeddedTimestamp => {
                    "honor SOURCE_DATE_EPOCH instead of the wall clock when stamping output".to_string()
                }
                DetectionKind::EmbeddedUuid => {
                    "derive any embedded identifier from content hash instead of a fresh UUID".to_string()
                }
                DetectionKind::RandomSeed => {
                    "fix the random seed or derive it from the action's input hash".to_string()
                }
                DetectionKind::UnstabilizedBuildPath => {
                    "rewrite absolute sandbox paths to a canonical relative prefix before emitting output".to_string()
                }
            };
            suggestions.push(RepairSuggestion {
                kind: detection.kind,
                description,
            });
        }
        Self { suggestions }
    }
}

/// Full result of one `verify` call.
#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub deterministic: bool,
    pub violations: Vec<Violation>,
    pub detections: Vec<Detection>,
    pub repair_plan: RepairPlan,
}

/// Runs a target's build `N` times through a `LanguageHandler`, comparing
/// declared outputs by content hash.
pub struct DeterminismVerifier<'a> {
    handler: &'a dyn LanguageHandler,
    config: DeterminismConfig,
}

impl<'a> DeterminismVerifier<'a> {
    pub fn new(handler: &'a dyn LanguageHandler, config: DeterminismConfig) -> Self {
        Self { handler, config }
    }

    pub fn verify(
        &self,
        action: &ActionId,
        target: &TargetId,
        sources: &[PathBuf],
        deps: &[TargetId],
        language_config: &HashMap<String, String>,
        sandbox: &SandboxSpec,
    ) -> Result<VerificationReport> {
        if self.config.runs < 2 {
            return Err(Error::Internal(
                "determinism verification requires at least 2 runs".to_string(),
            ));
        }

        let hasher = FastHasher::new();
        let mut per_output: BTreeMap<PathBuf, Vec<ContentHash>> = BTreeMap::new();

        for _ in 0..self.config.runs {
            let outcome = self
                .handler
                .build_with_context(target, sources, deps, language_config, sandbox)?;
            for output in &outcome.outputs {
                let hash = hasher.content_hash(output)?;
                per_output.entry(output.clone()).or_default().push(hash);
            }
        }

        let mut violations = Vec::new();
        let mut detections = Vec::new();
        for (output, hashes) in &per_output {
            if let [first, rest @ ..] = hashes.as_slice() {
                if rest.iter().any(|h| h != first) {
                    violations.push(Violation {
                        output: output.clone(),
                        hashes: hashes.clone(),
                    });
                }
            }
            detections.extend(scan_for_non_determinism(output));
        }

        let deterministic = violations.is_empty();
        if !deterministic && self.config.fail_on_violation {
            return Err(Error::DeterminismViolation {
                action: action.clone(),
            });
        }

        let repair_plan = RepairPlan::from_detections(&detections);
        Ok(VerificationReport {
            deterministic,
            violations,
            detections,
            repair_plan,
        })
    }
}

/// Patterns recognized as common sources of non-reproducible output.
/// Compiled per call: this path only runs when determinism verification is
/// explicitly requested, never in the hot cache-lookup path.
#[allow(clippy::expect_used)]
fn detection_patterns() -> Vec<(DetectionKind, Regex)> {
    vec![
        (
            DetectionKind::EmbeddedTimestamp,
            Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}").expect("static pattern"),
        ),
        (
            DetectionKind::EmbeddedUuid,
            Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
                .expect("static pattern"),
        ),
        (
            DetectionKind::RandomSeed,
            Regex::new(r"(?i)seed\s*[:=]\s*[0-9a-f]+").expect("static pattern"),
        ),
        (
            DetectionKind::UnstabilizedBuildPath,
            Regex::new(r"(?:/home/|/Users/|/tmp/|/var/folders/)[^\s\x22\x27]*").expect("static pattern"),
        ),
    ]
}

fn scan_for_non_determinism(output: &std::path::Path) -> Vec<Detection> {
    let Ok(bytes) = std::fs::read(output) else {
        return Vec::new();
    };
    let text = String::from_utf8_lossy(&bytes);

    let mut found = Vec::new();
    for (kind, pattern) in detection_patterns() {
        if let Some(m) = pattern.find(&text) {
            found.push(Detection {
                kind,
                output: output.to_path_buf(),
                snippet: m.as_str().to_string(),
            });
        }
    }
    found
}

#[cfg(test)]
#[path = "determinism_tests.rs"]
mod tests;
