//! In-memory bidirectional relationship index
//!
//! Keeps three maps in lockstep:
//!
//! ```text
//! by_main        main path       -> relationships of that main
//! by_derivative  derivative path -> relationship
//! by_kind        kind            -> derivative paths of that kind
//! ```
//!
//! The index never touches the file store. Callers feed it paths (initial
//! listing, events) and it classifies them through [`PathRules`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::domain::{
    DerivativeKind, MainState, Orphan, OrphanBatch, OrphanReason, Relationship, StorePath,
};
use crate::rules::PathRules;

/// Index shared between the reconciler, the scanner and the tracker
pub type SharedIndex = Arc<RwLock<RelationshipIndex>>;

/// Bidirectional main ↔ derivative index
#[derive(Debug, Default)]
pub struct RelationshipIndex {
    by_main: HashMap<StorePath, Vec<Relationship>>,
    by_derivative: HashMap<StorePath, Relationship>,
    by_kind: HashMap<DerivativeKind, HashSet<StorePath>>,
}

impl RelationshipIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a fresh index for sharing
    pub fn shared() -> SharedIndex {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Clear all maps and index every path that parses as a derivative
    ///
    /// Returns the number of relationships indexed.
    pub fn build_initial<'a, I>(&mut self, paths: I, rules: &PathRules) -> usize
    where
        I: IntoIterator<Item = &'a StorePath>,
    {
        self.clear();
        let mut indexed = 0;
        for path in paths {
            if self.index_if_derivative(path, rules) {
                indexed += 1;
            }
        }
        debug!(indexed, "Built relationship index");
        indexed
    }

    /// Index `path` if it is named like a derivative
    pub fn index_if_derivative(&mut self, path: &StorePath, rules: &PathRules) -> bool {
        match rules.parse(path) {
            Some(info) => {
                self.insert(Relationship::from_info(path.clone(), info));
                true
            }
            None => false,
        }
    }

    /// Insert a relationship
    ///
    /// Replaces an entry for the same derivative path and any relationship
    /// occupying the same slot of the same main.
    pub fn insert(&mut self, relationship: Relationship) {
        self.remove(&relationship.derivative);

        let displaced: Vec<StorePath> = self
            .by_main
            .get(&relationship.main)
            .map(|rels| {
                rels.iter()
                    .filter(|r| r.same_slot(&relationship))
                    .map(|r| r.derivative.clone())
                    .collect()
            })
            .unwrap_or_default();
        for path in &displaced {
            self.remove(path);
        }

        trace!(
            main = %relationship.main,
            derivative = %relationship.derivative,
            kind = %relationship.kind,
            "Indexed relationship"
        );
        self.by_kind
            .entry(relationship.kind)
            .or_default()
            .insert(relationship.derivative.clone());
        self.by_main
            .entry(relationship.main.clone())
            .or_default()
            .push(relationship.clone());
        self.by_derivative
            .insert(relationship.derivative.clone(), relationship);
    }

    /// Remove a derivative from all maps; no-op if absent
    pub fn remove(&mut self, derivative: &StorePath) -> Option<Relationship> {
        let relationship = self.by_derivative.remove(derivative)?;

        if let Some(rels) = self.by_main.get_mut(&relationship.main) {
            rels.retain(|r| &r.derivative != derivative);
            if rels.is_empty() {
                self.by_main.remove(&relationship.main);
            }
        }
        if let Some(set) = self.by_kind.get_mut(&relationship.kind) {
            set.remove(derivative);
            if set.is_empty() {
                self.by_kind.remove(&relationship.kind);
            }
        }

        Some(relationship)
    }

    pub fn clear(&mut self) {
        self.by_main.clear();
        self.by_derivative.clear();
        self.by_kind.clear();
    }

    /// Relationships of a main path
    pub fn relationships_for(&self, main: &StorePath) -> Vec<Relationship> {
        self.by_main.get(main).cloned().unwrap_or_default()
    }

    /// Main path a derivative belongs to
    pub fn main_for(&self, derivative: &StorePath) -> Option<&StorePath> {
        self.by_derivative.get(derivative).map(|r| &r.main)
    }

    /// Full relationship of a derivative path
    pub fn get(&self, derivative: &StorePath) -> Option<&Relationship> {
        self.by_derivative.get(derivative)
    }

    /// Derivative paths of one kind
    pub fn all_of_kind(&self, kind: DerivativeKind) -> HashSet<StorePath> {
        self.by_kind.get(&kind).cloned().unwrap_or_default()
    }

    /// True if `main` has a relationship of `kind`
    pub fn has_kind(&self, main: &StorePath, kind: DerivativeKind) -> bool {
        self.by_main
            .get(main)
            .is_some_and(|rels| rels.iter().any(|r| r.kind == kind))
    }

    /// Preview extensions indexed for `main`
    pub fn preview_extensions_for(&self, main: &StorePath) -> Vec<String> {
        self.by_main
            .get(main)
            .map(|rels| {
                rels.iter()
                    .filter(|r| r.kind == DerivativeKind::Preview)
                    .filter_map(|r| r.extension.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn contains(&self, derivative: &StorePath) -> bool {
        self.by_derivative.contains_key(derivative)
    }

    pub fn len(&self) -> usize {
        self.by_derivative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_derivative.is_empty()
    }

    /// Every indexed derivative path
    pub fn derivatives(&self) -> impl Iterator<Item = &StorePath> {
        self.by_derivative.keys()
    }

    /// Re-key every relationship whose derivative lies below `old_dir`
    ///
    /// Used after a folder rename, when the whole subtree has already moved
    /// on disk. Returns the number of relationships re-keyed.
    pub fn rename_folder(
        &mut self,
        old_dir: &StorePath,
        new_dir: &StorePath,
        rules: &PathRules,
    ) -> usize {
        let moved: Vec<StorePath> = self
            .by_derivative
            .keys()
            .filter(|d| d.is_within(old_dir.as_str()))
            .cloned()
            .collect();

        for old in &moved {
            self.remove(old);
            if let Some(new) = old.rebase(old_dir, new_dir) {
                self.index_if_derivative(&new, rules);
            }
        }

        if !moved.is_empty() {
            debug!(from = %old_dir, to = %new_dir, count = moved.len(), "Re-keyed folder");
        }
        moved.len()
    }

    /// Classify every indexed derivative whose main cannot be resolved
    ///
    /// `main_state` reports what currently sits at a main path.
    pub fn find_orphans<F>(&self, main_state: F, rules: &PathRules) -> OrphanBatch
    where
        F: Fn(&StorePath) -> MainState,
    {
        let mut batch = OrphanBatch::new();

        for (derivative, rel) in &self.by_derivative {
            let reason = match rules.parse(derivative) {
                Some(info) if info.main == rel.main && info.kind == rel.kind => {
                    match main_state(&rel.main) {
                        MainState::Missing => Some(OrphanReason::MainMissing),
                        MainState::Folder => Some(OrphanReason::MainIsFolder),
                        MainState::File if !rules.is_monitored(&rel.main) => {
                            Some(OrphanReason::NoLongerMonitored)
                        }
                        MainState::File => None,
                    }
                }
                _ => Some(OrphanReason::MalformedName),
            };

            if let Some(reason) = reason {
                batch.push(Orphan {
                    derivative: derivative.clone(),
                    main: Some(rel.main.clone()),
                    kind: rel.kind,
                    reason,
                });
            }
        }

        batch
    }
}
