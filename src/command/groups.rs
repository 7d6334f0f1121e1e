//! Optimistic selection overlay and sticky expand flags for proxy groups.
//!
//! When the user picks a member, the visible group flips immediately and the
//! choice is remembered as pending. Group snapshots from the engine may still
//! carry the old selection while the request is in flight, so a pending
//! choice overrides the engine's value until a snapshot agrees with it.
//!
//! The `expanded` flag belongs to the UI. Snapshots only seed it for groups
//! the client has never seen; afterwards the local value wins.

use std::collections::HashMap;

use super::types::Group;

/// Reconciles engine group snapshots with local UI state.
#[derive(Debug, Clone, Default)]
pub struct SelectionTracker {
    visible: Vec<Group>,
    pending: HashMap<String, String>,
}

impl SelectionTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Groups as the UI should show them.
    pub fn groups(&self) -> &[Group] {
        &self.visible
    }

    /// Pending member for `group`, if a selection has not converged yet.
    pub fn pending(&self, group: &str) -> Option<&str> {
        self.pending.get(group).map(String::as_str)
    }

    /// Record a local selection and show it right away.
    pub fn select(&mut self, group: &str, member: &str) {
        if let Some(visible) = self.visible.iter_mut().find(|g| g.tag == group) {
            visible.selected = member.to_string();
        }
        self.pending.insert(group.to_string(), member.to_string());
    }

    /// Set the local expand flag. Returns false if the group is unknown.
    pub fn set_expanded(&mut self, group: &str, expanded: bool) -> bool {
        match self.visible.iter_mut().find(|g| g.tag == group) {
            Some(visible) => {
                visible.expanded = expanded;
                true
            }
            None => false,
        }
    }

    /// Merge a fresh engine snapshot into the visible state.
    pub fn reconcile(&mut self, snapshot: Vec<Group>) -> &[Group] {
        let previous_expanded: HashMap<&str, bool> = self
            .visible
            .iter()
            .map(|g| (g.tag.as_str(), g.expanded))
            .collect();

        let mut merged = snapshot;
        for group in &mut merged {
            if let Some(&expanded) = previous_expanded.get(group.tag.as_str()) {
                group.expanded = expanded;
            }

            let converged = match self.pending.get(&group.tag) {
                Some(pending) if *pending == group.selected => true,
                Some(pending) => {
                    group.selected = pending.clone();
                    false
                }
                None => false,
            };
            if converged {
                log::debug!("[Groups] selection converged: {} -> {}", group.tag, group.selected);
                self.pending.remove(&group.tag);
            }
        }

        self.visible = merged;
        &self.visible
    }

    /// Drop every unconfirmed selection.
    ///
    /// Called when a session ends: the next engine may never have seen those
    /// requests, so its first snapshot is taken as is.
    pub fn forget_pending(&mut self) {
        if !self.pending.is_empty() {
            log::debug!("[Groups] dropping {} pending selections", self.pending.len());
            self.pending.clear();
        }
    }
}
