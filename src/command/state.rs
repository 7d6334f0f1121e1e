//! Observable client state and the store that mutates it.
//!
//! The UI never touches session internals. It holds a
//! `watch::Receiver<ClientState>` and redraws on change. Every mutation goes
//! through [`Store`], which applies it with a single `send_modify`, so an
//! observer can never see half of an update.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::watch;

use super::connections::{ConnectionView, SortKey, StateFilter};
use super::groups::SelectionTracker;
use super::history::SampleRing;
use super::logs::append_capped;
use super::types::{ConnectionRecord, Group, LogLine, StatusSnapshot};
use crate::constants::TRAFFIC_HISTORY_LEN;

/// Everything the UI renders.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientState {
    /// Whether a session link is live.
    pub is_connected: bool,
    /// Latest status counters.
    pub status: Option<StatusSnapshot>,
    /// Groups after selection/expand reconciliation.
    pub groups: Vec<Group>,
    /// Visible log lines, oldest first, capped.
    pub log_lines: VecDeque<LogLine>,
    /// Current mode.
    pub clash_mode: String,
    /// Allowed modes.
    pub clash_mode_list: Vec<String>,
    /// Connections after filter and sort.
    pub connections: Vec<ConnectionRecord>,
    /// Whether the unfiltered connections snapshot is non-empty.
    pub has_any_connection: bool,
    /// Recent upload rates, oldest first.
    pub uplink_history: SampleRing,
    /// Recent download rates, oldest first.
    pub downlink_history: SampleRing,
    /// Active connection state filter.
    pub connection_state_filter: StateFilter,
    /// Active connection sort key.
    pub connection_sort: SortKey,
    /// Dismissible message from a rejected request.
    pub alert: Option<String>,
}

impl Default for ClientState {
    fn default() -> Self {
        Self {
            is_connected: false,
            status: None,
            groups: Vec::new(),
            log_lines: VecDeque::new(),
            clash_mode: String::new(),
            clash_mode_list: Vec::new(),
            connections: Vec::new(),
            has_any_connection: false,
            uplink_history: SampleRing::new(TRAFFIC_HISTORY_LEN),
            downlink_history: SampleRing::new(TRAFFIC_HISTORY_LEN),
            connection_state_filter: StateFilter::default(),
            connection_sort: SortKey::default(),
            alert: None,
        }
    }
}

/// Reconciliation state that is not itself shown to the UI.
#[derive(Debug, Default)]
struct StoreInner {
    tracker: SelectionTracker,
    view: ConnectionView,
}

/// Single writer for [`ClientState`].
#[derive(Debug)]
pub struct Store {
    state: watch::Sender<ClientState>,
    inner: Mutex<StoreInner>,
    log_cap: usize,
}

impl Store {
    /// Create a store with an empty state.
    pub fn new(log_cap: usize) -> Self {
        let initial = ClientState::default();
        let view = ConnectionView::new(initial.connection_state_filter, initial.connection_sort);
        let (state, _) = watch::channel(initial);
        Self {
            state,
            inner: Mutex::new(StoreInner {
                tracker: SelectionTracker::new(),
                view,
            }),
            log_cap,
        }
    }

    /// New observer of the state.
    pub fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> ClientState {
        self.state.borrow().clone()
    }

    /// Flip the connected flag.
    pub fn set_connected(&self, connected: bool) {
        self.state.send_if_modified(|s| {
            let changed = s.is_connected != connected;
            s.is_connected = connected;
            changed
        });
    }

    /// Mark the session over and drop selections the engine never confirmed.
    pub fn end_session(&self) {
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .tracker
            .forget_pending();
        self.set_connected(false);
    }

    /// Replace the status snapshot and feed the traffic rings.
    pub fn apply_status(&self, status: StatusSnapshot) {
        self.state.send_modify(|s| {
            if status.traffic_available {
                s.uplink_history.push(status.uplink);
                s.downlink_history.push(status.downlink);
            }
            s.status = Some(status);
        });
    }

    /// Append a flushed log batch, trimming to the cap.
    pub fn append_logs(&self, batch: Vec<LogLine>) {
        let cap = self.log_cap;
        self.state
            .send_modify(|s| append_capped(&mut s.log_lines, batch, cap));
    }

    /// Drop every visible log line.
    pub fn clear_logs(&self) {
        self.state.send_modify(|s| s.log_lines.clear());
    }

    /// Reconcile an engine group snapshot.
    pub fn apply_groups(&self, snapshot: Vec<Group>) {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let groups = inner.tracker.reconcile(snapshot).to_vec();
        self.state.send_modify(|s| s.groups = groups);
    }

    /// Optimistically select `member` in `group`.
    pub fn select_outbound(&self, group: &str, member: &str) {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.tracker.select(group, member);
        let groups = inner.tracker.groups().to_vec();
        self.state.send_modify(|s| s.groups = groups);
    }

    /// Set a group's local expand flag.
    pub fn set_group_expanded(&self, group: &str, expanded: bool) {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        if inner.tracker.set_expanded(group, expanded) {
            let groups = inner.tracker.groups().to_vec();
            self.state.send_modify(|s| s.groups = groups);
        }
    }

    /// Set the mode list and current mode.
    pub fn init_clash_mode(&self, modes: Vec<String>, current: String) {
        self.state.send_modify(|s| {
            s.clash_mode_list = modes;
            s.clash_mode = current;
        });
    }

    /// Set the current mode.
    pub fn update_clash_mode(&self, mode: String) {
        self.state.send_modify(|s| s.clash_mode = mode);
    }

    /// Replace the raw connections snapshot and recompute the view.
    pub fn apply_connections(&self, snapshot: Vec<ConnectionRecord>) {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.view.set_snapshot(snapshot);
        self.publish_view(&inner.view);
    }

    /// Change the connection state filter and recompute locally.
    pub fn set_connection_state_filter(&self, filter: StateFilter) {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.view.set_filter(filter);
        self.publish_view(&inner.view);
    }

    /// Change the connection sort and recompute locally.
    pub fn set_connection_sort(&self, sort: SortKey) {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.view.set_sort(sort);
        self.publish_view(&inner.view);
    }

    /// Show a dismissible alert.
    pub fn set_alert(&self, message: String) {
        self.state.send_modify(|s| s.alert = Some(message));
    }

    /// Dismiss the current alert.
    pub fn dismiss_alert(&self) {
        self.state.send_if_modified(|s| s.alert.take().is_some());
    }

    fn publish_view(&self, view: &ConnectionView) {
        let projection = view.recompute();
        let filter = view.filter();
        let sort = view.sort();
        self.state.send_modify(|s| {
            s.connections = projection.connections;
            s.has_any_connection = projection.has_any_connection;
            s.connection_state_filter = filter;
            s.connection_sort = sort;
        });
    }
}
