//! Structured diagnostics accumulated on a compilation.
//!
//! Non-fatal findings are collected on `compilation.errors` and
//! `compilation.warnings` as [`Diagnostic`] values and the compilation
//! continues; only `bail` mode escalates the first error to a fatal
//! [`crate::Error`].

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::dependency::DependencyLocation;

/// Diagnostic kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// An entry dependency could not be turned into a module.
    EntryModuleNotFound,
    /// A non-entry dependency factory failed.
    ModuleNotFound,
    /// A module build produced an error or warning.
    ModuleBuild,
    /// A dependency reported an error or warning after building.
    ModuleDependency,
    /// An async split target collides with a pre-declared initial chunk.
    AsyncDependencyToInitialChunk,
    /// Rendering a chunk failed; scoped to that chunk.
    ChunkRender,
    /// Two chunks want to emit different content to the same filename.
    AssetConflict,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EntryModuleNotFound => "entry module not found",
            Self::ModuleNotFound => "module not found",
            Self::ModuleBuild => "module build",
            Self::ModuleDependency => "module dependency",
            Self::AsyncDependencyToInitialChunk => "async dependency to initial chunk",
            Self::ChunkRender => "chunk render",
            Self::AssetConflict => "asset conflict",
        };
        f.write_str(name)
    }
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single finding, cloneable and serializable.
///
/// The `module` field carries the module identifier rather than a graph
/// key so diagnostics stay meaningful outside the compilation that
/// produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc: Option<DependencyLocation>,
    /// Paths whose absence caused this diagnostic, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<PathBuf>,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            message: message.into(),
            module: None,
            loc: None,
            missing: Vec::new(),
        }
    }

    pub fn warning(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(kind, message)
        }
    }

    /// Attach the identifier of the module this finding belongs to.
    pub fn with_module(mut self, identifier: impl Into<String>) -> Self {
        self.module = Some(identifier.into());
        self
    }

    pub fn with_loc(mut self, loc: Option<DependencyLocation>) -> Self {
        self.loc = loc;
        self
    }

    pub fn with_missing(mut self, missing: Vec<PathBuf>) -> Self {
        self.missing = missing;
        self
    }

    /// Reclassify as a warning, keeping everything else.
    pub fn into_warning(mut self) -> Self {
        self.severity = Severity::Warning;
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.module, &self.loc) {
            (Some(module), Some(loc)) => write!(f, "{} ({module} {loc})", self.message),
            (Some(module), None) => write!(f, "{} ({module})", self.message),
            _ => f.write_str(&self.message),
        }
    }
}
