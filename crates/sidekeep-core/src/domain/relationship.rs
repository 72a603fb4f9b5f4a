//! Relationship types between main files and their derivatives
//!
//! A derivative is named mechanically from its main file's path plus a
//! [`DerivativeKind`]. The types here describe one such association, the
//! result of parsing a derivative name, and orphan classification results.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use super::newtypes::StorePath;

/// Kind of a derivative file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivativeKind {
    /// Companion notes file, one per main file
    Sidecar,
    /// Pointer record of a prior location, one per main file
    Redirect,
    /// Rendered thumbnail, one per (main file, extension)
    Preview,
}

impl DerivativeKind {
    /// All kinds, in the order the reconciler processes them
    pub const ALL: [DerivativeKind; 3] = [
        DerivativeKind::Sidecar,
        DerivativeKind::Redirect,
        DerivativeKind::Preview,
    ];

    /// True for kinds with a fixed file extension
    #[must_use]
    pub fn has_fixed_extension(self) -> bool {
        !matches!(self, DerivativeKind::Preview)
    }
}

impl Display for DerivativeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DerivativeKind::Sidecar => "sidecar",
            DerivativeKind::Redirect => "redirect",
            DerivativeKind::Preview => "preview",
        };
        write!(f, "{}", s)
    }
}

/// Result of parsing a derivative path back into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivativeInfo {
    /// The main file this derivative belongs to
    pub main: StorePath,
    /// Kind of the derivative
    pub kind: DerivativeKind,
    /// Secondary extension, present for previews only
    pub extension: Option<String>,
}

/// A tracked association between a main path and one derivative
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub main: StorePath,
    pub derivative: StorePath,
    pub kind: DerivativeKind,
    /// Preview extension (lowercase, no dot)
    pub extension: Option<String>,
}

impl Relationship {
    /// Build a relationship from a parsed derivative path
    pub fn from_info(derivative: StorePath, info: DerivativeInfo) -> Self {
        Self {
            main: info.main,
            derivative,
            kind: info.kind,
            extension: info.extension,
        }
    }

    /// True if `other` occupies the same slot of the same main file
    ///
    /// Sidecar and Redirect have one slot per main; previews one slot per
    /// extension.
    #[must_use]
    pub fn same_slot(&self, other: &Relationship) -> bool {
        self.main == other.main
            && self.kind == other.kind
            && (self.kind.has_fixed_extension() || self.extension == other.extension)
    }
}

/// What currently sits at a main path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainState {
    /// A regular file
    File,
    /// A folder
    Folder,
    /// Nothing
    Missing,
}

/// Why a derivative was classified as an orphan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanReason {
    MainMissing,
    NoLongerMonitored,
    MalformedName,
    MainIsFolder,
}

impl Display for OrphanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrphanReason::MainMissing => "main file missing",
            OrphanReason::NoLongerMonitored => "main file no longer monitored",
            OrphanReason::MalformedName => "malformed name",
            OrphanReason::MainIsFolder => "main path is a folder",
        };
        f.write_str(s)
    }
}

/// A derivative whose main file reference cannot be resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Orphan {
    pub derivative: StorePath,
    /// The main path the index recorded, if any
    pub main: Option<StorePath>,
    pub kind: DerivativeKind,
    pub reason: OrphanReason,
}

/// Orphans grouped by derivative kind, each group sorted by path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanBatch {
    groups: BTreeMap<DerivativeKind, Vec<Orphan>>,
}

impl OrphanBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an orphan, keeping its group sorted
    pub fn push(&mut self, orphan: Orphan) {
        let group = self.groups.entry(orphan.kind).or_default();
        let pos = group
            .binary_search_by(|o| o.derivative.cmp(&orphan.derivative))
            .unwrap_or_else(|e| e);
        group.insert(pos, orphan);
    }

    /// Orphans of one kind
    pub fn of_kind(&self, kind: DerivativeKind) -> &[Orphan] {
        self.groups.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All orphans, grouped by kind
    pub fn iter(&self) -> impl Iterator<Item = &Orphan> {
        self.groups.values().flatten()
    }

    /// Reason for a given derivative path
    pub fn reason_for(&self, derivative: &StorePath) -> Option<OrphanReason> {
        self.iter()
            .find(|o| &o.derivative == derivative)
            .map(|o| o.reason)
    }

    /// Derivative path to human-readable reason
    pub fn reasons(&self) -> BTreeMap<StorePath, String> {
        self.iter()
            .map(|o| (o.derivative.clone(), o.reason.to_string()))
            .collect()
    }

    /// True if `derivative` is part of this batch
    pub fn contains(&self, derivative: &StorePath) -> bool {
        self.reason_for(derivative).is_some()
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
