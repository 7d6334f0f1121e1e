//! Local filter/sort projection over the engine's connections snapshot.
//!
//! The engine pushes the full connection list; the UI picks a state filter
//! and a sort key. Changing either re-derives the view from the last raw
//! snapshot without asking the engine for anything.

use std::cmp::Reverse;

use serde::{Deserialize, Serialize};

use super::types::ConnectionRecord;

/// Which connections to show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateFilter {
    /// Every connection in the snapshot.
    All,
    /// Only connections without a close time.
    #[default]
    Active,
    /// Only connections with a close time.
    Closed,
}

impl StateFilter {
    fn admits(self, connection: &ConnectionRecord) -> bool {
        match self {
            StateFilter::All => true,
            StateFilter::Active => connection.is_active(),
            StateFilter::Closed => !connection.is_active(),
        }
    }
}

/// How to order the view. All keys sort descending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Newest first.
    #[default]
    ByDate,
    /// Highest current rate first.
    ByTraffic,
    /// Highest lifetime total first.
    ByTrafficTotal,
}

/// Output of [`ConnectionView::recompute`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    /// Filtered and sorted connections.
    pub connections: Vec<ConnectionRecord>,
    /// Whether the unfiltered snapshot holds anything at all.
    pub has_any_connection: bool,
}

/// Latest raw snapshot plus the current filter and sort.
#[derive(Debug, Clone, Default)]
pub struct ConnectionView {
    raw: Vec<ConnectionRecord>,
    filter: StateFilter,
    sort: SortKey,
}

impl ConnectionView {
    /// Empty view with the given controls.
    pub fn new(filter: StateFilter, sort: SortKey) -> Self {
        Self {
            raw: Vec::new(),
            filter,
            sort,
        }
    }

    /// Replace the raw snapshot. The previous one is discarded.
    pub fn set_snapshot(&mut self, connections: Vec<ConnectionRecord>) {
        self.raw = connections;
    }

    /// Change the state filter.
    pub fn set_filter(&mut self, filter: StateFilter) {
        self.filter = filter;
    }

    /// Change the sort key.
    pub fn set_sort(&mut self, sort: SortKey) {
        self.sort = sort;
    }

    /// Current state filter.
    pub fn filter(&self) -> StateFilter {
        self.filter
    }

    /// Current sort key.
    pub fn sort(&self) -> SortKey {
        self.sort
    }

    /// Raw snapshot as last received.
    pub fn snapshot(&self) -> &[ConnectionRecord] {
        &self.raw
    }

    /// Derive the ordered view.
    ///
    /// Pure in `(snapshot, filter, sort)`. The sort is stable, so ties keep
    /// the engine's order.
    pub fn recompute(&self) -> Projection {
        let mut connections: Vec<ConnectionRecord> = self
            .raw
            .iter()
            .filter(|c| self.filter.admits(c))
            .cloned()
            .collect();

        match self.sort {
            SortKey::ByDate => connections.sort_by_key(|c| Reverse(c.created_at)),
            SortKey::ByTraffic => connections.sort_by_key(|c| Reverse(c.rate())),
            SortKey::ByTrafficTotal => connections.sort_by_key(|c| Reverse(c.total())),
        }

        Projection {
            connections,
            has_any_connection: !self.raw.is_empty(),
        }
    }
}
