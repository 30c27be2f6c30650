// Per-run bookkeeping for reconciliation.
//
// Each scoped entity moves Unseen -> Matched the first time a page names it
// in this run. When a scope finishes, members that were in it before the
// scope started and are still Unseen become Pruned.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Unseen,
    Matched,
    Pruned,
}

/// States of one entity type, by id.
#[derive(Debug, Default)]
pub struct Ledger {
    states: HashMap<i32, EntityState>,
}

impl Ledger {
    pub fn state(&self, id: i32) -> EntityState {
        self.states.get(&id).copied().unwrap_or(EntityState::Unseen)
    }

    /// Record a match. Returns true on the first match of the run.
    pub fn mark_matched(&mut self, id: i32) -> bool {
        self.states.insert(id, EntityState::Matched) != Some(EntityState::Matched)
    }

    pub fn mark_pruned(&mut self, id: i32) {
        self.states.insert(id, EntityState::Pruned);
    }

    pub fn is_matched(&self, id: i32) -> bool {
        self.state(id) == EntityState::Matched
    }
}

/// Everything the reconciler remembers between scopes of one run.
#[derive(Debug, Default)]
pub struct RunLedger {
    pub coordinates: Ledger,
    pub items: Ledger,
    pub cards: Ledger,
    /// Seal id -> item id, for items matched so far in this run.
    pub seals: HashMap<String, i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Outfits,
    Cards,
}

/// One chapter page's batch. Holds the membership captured at `begin_scope`.
#[derive(Debug)]
pub struct Scope {
    pub kind: ScopeKind,
    pub chapter_id: Option<String>,
    pub(crate) created_before: usize,
    pub(crate) coordinates: Vec<i32>,
    pub(crate) items: Vec<i32>,
    pub(crate) cards: Vec<i32>,
}

/// Counts for one finished scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeReport {
    pub chapter_id: String,
    pub matched: usize,
    pub created: usize,
    pub pruned_coordinates: usize,
    pub pruned_items: usize,
    pub pruned_cards: usize,
}

impl ScopeReport {
    pub fn pruned(&self) -> usize {
        self.pruned_coordinates + self.pruned_items + self.pruned_cards
    }
}
