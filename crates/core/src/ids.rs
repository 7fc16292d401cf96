// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Identifiers and data-model records shared across components.
//!
//! `TargetId` is canonical and string-keyed (`//package/path:name`);
//! `ActionId` is a composite fine-grained key that stringifies
//! deterministically as `target:type[:sub]:hash`.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Canonical target identifier, `//package/path:name`.
///
/// Equality is string-canonical: two ids are equal iff their canonical
/// strings match. Cross-component keys (cache entries, graph nodes) derive
/// from this string, never from a separate numeric handle.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetId(String);

/// A target id failed to parse.
#[derive(Debug, thiserror::Error)]
#[error("invalid target id {0:?}: expected //package/path:name")]
pub struct InvalidTargetId(String);

impl TargetId {
    /// Parse a canonical `//package/path:name` string.
    pub fn parse(s: &str) -> Result<Self, InvalidTargetId> {
        if !s.starts_with("//") {
            return Err(InvalidTargetId(s.to_string()));
        }
        let colon = s.rfind(':').ok_or_else(|| InvalidTargetId(s.to_string()))?;
        if colon <= 2 || colon == s.len() - 1 {
            return Err(InvalidTargetId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Construct without validation, for callers that already hold a
    /// canonical string (e.g. deserializing a trusted cache file).
    pub fn new_unchecked(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `package/path` portion, without the leading `//` or trailing
    /// `:name`.
    pub fn package(&self) -> &str {
        let colon = self.0.rfind(':').unwrap_or(self.0.len());
        &self.0[2..colon]
    }

    /// The `name` portion after the final `:`.
    pub fn name(&self) -> &str {
        let colon = self.0.rfind(':').unwrap_or(0);
        &self.0[colon + 1..]
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for InvalidTargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InvalidTargetId({:?})", self.0)
    }
}

/// The kind of build step an `ActionId` denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    Compile,
    Link,
    Codegen,
    Test,
    Package,
    Transform,
    Lint,
    TypeCheck,
    Custom,
}

impl ActionType {
    fn as_str(self) -> &'static str {
        match self {
            ActionType::Compile => "compile",
            ActionType::Link => "link",
            ActionType::Codegen => "codegen",
            ActionType::Test => "test",
            ActionType::Package => "package",
            ActionType::Transform => "transform",
            ActionType::Lint => "lint",
            ActionType::TypeCheck => "typecheck",
            ActionType::Custom => "custom",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "compile" => ActionType::Compile,
            "link" => ActionType::Link,
            "codegen" => ActionType::Codegen,
            "test" => ActionType::Test,
            "package" => ActionType::Package,
            "transform" => ActionType::Transform,
            "lint" => ActionType::Lint,
            "typecheck" => ActionType::TypeCheck,
            "custom" => ActionType::Custom,
            _ => return None,
        })
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite fine-grained action key: `(targetId, actionType, subId?, inputHash)`.
///
/// Stringifies deterministically as `target:type[:sub]:hash`, which doubles
/// as the on-disk and in-memory map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId {
    pub target: TargetId,
    pub action_type: ActionType,
    pub sub_id: Option<String>,
    pub input_hash: String,
}

impl ActionId {
    pub fn new(
        target: TargetId,
        action_type: ActionType,
        sub_id: Option<String>,
        input_hash: String,
    ) -> Self {
        Self {
            target,
            action_type,
            sub_id,
            input_hash,
        }
    }

    /// The canonical `target:type[:sub]:hash` string.
    pub fn canonical(&self) -> String {
        match &self.sub_id {
            Some(sub) => format!(
                "{}:{}:{}:{}",
                self.target, self.action_type, sub, self.input_hash
            ),
            None => format!("{}:{}:{}", self.target, self.action_type, self.input_hash),
        }
    }

    /// Parse a canonical string back into an `ActionId`.
    ///
    /// A `TargetId`'s canonical form has exactly one colon (separating
    /// `package/path` from `name`), so the tail of the string can be popped
    /// colon-delimited segment by segment: `hash` is always last, then
    /// either `type` (no sub-id) or `sub` followed by `type`, determined by
    /// whether the candidate segment names a known `ActionType`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts: Vec<&str> = s.split(':').collect();
        let input_hash = parts.pop()?.to_string();
        let candidate = parts.pop()?;

        let (action_type, sub_id) = if let Some(t) = ActionType::parse(candidate) {
            (t, None)
        } else {
            let type_field = parts.pop()?;
            (ActionType::parse(type_field)?, Some(candidate.to_string()))
        };

        let target = TargetId::parse(&parts.join(":")).ok()?;
        Some(ActionId {
            target,
            action_type,
            sub_id,
            input_hash,
        })
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// What a target is meant to produce; set by the configuration layer and
/// never reinterpreted by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    Executable,
    Library,
    Test,
    Custom,
}

/// A build target as declared by the configuration layer. Immutable once
/// constructed; this crate reads `kind`, `sources`, `declared_deps`, and
/// `language_config` but never mutates or reinterprets them — dispatch and
/// config parsing are the owning language handler's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub kind: TargetKind,
    pub sources: Vec<PathBuf>,
    pub declared_deps: Vec<TargetId>,
    pub language_config: HashMap<String, String>,
}

impl Target {
    pub fn new(id: TargetId, kind: TargetKind) -> Self {
        Self {
            id,
            kind,
            sources: Vec::new(),
            declared_deps: Vec::new(),
            language_config: HashMap::new(),
        }
    }

    pub fn with_sources(mut self, sources: Vec<PathBuf>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_declared_deps(mut self, deps: Vec<TargetId>) -> Self {
        self.declared_deps = deps;
        self
    }

    pub fn with_language_config(mut self, config: HashMap<String, String>) -> Self {
        self.language_config = config;
        self
    }
}

#[cfg(test)]
#[path = "ids_tests.rs"]
mod tests;
