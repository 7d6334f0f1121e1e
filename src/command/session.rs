//! Long-lived control-channel session.
//!
//! A [`Session`] owns at most one retry task and at most one live link. The
//! link is a pair of tasks over the split stream, the same shape as a socket
//! client connection elsewhere in this crate:
//!
//! ```text
//!                  ┌────────────── Session ──────────────┐
//!  connect() ────► │ retry task ──(Connector)──► link    │
//!                  │                              │      │
//!  requests ─────► │ mpsc ───► write task ──► FrameWriter ───► engine
//!                  │                                     │
//!  ClientState ◄── │ Store ◄── dispatch ◄── read task ◄── FrameReader ◄── engine
//!                  └─────────────────────────────────────┘
//! ```
//!
//! The retry policy is a bounded loop of [`CONNECT_MAX_ATTEMPTS`] attempts.
//! Once it gives up, or once a link ends for any reason, the session stays
//! `Disconnected` until the caller asks again.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::connections::{SortKey, StateFilter};
use super::logs::LogBatcher;
use super::protocol::{ProtocolError, Push, Request};
use super::state::{ClientState, Store};
use super::types::Subscription;
use crate::constants::{
    connect_delay, CONNECT_MAX_ATTEMPTS, DEFAULT_LOG_CAP_LINES, DEFAULT_STATUS_INTERVAL,
    LOG_FLUSH_DELAY,
};
use crate::socket::{BoxedStream, Connector, FrameReader, FrameWriter};

/// Per-session settings. Fixed for the lifetime of a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Push kinds the engine should send.
    pub subscriptions: BTreeSet<Subscription>,
    /// How often the engine pushes status, in nanoseconds.
    pub status_interval_nanos: u64,
    /// Maximum visible log lines.
    pub log_cap_lines: usize,
    /// Quiet period before a log batch is flushed, in milliseconds.
    pub log_flush_delay_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            subscriptions: [
                Subscription::Status,
                Subscription::Log,
                Subscription::Groups,
                Subscription::ClashMode,
                Subscription::Connections,
            ]
            .into_iter()
            .collect(),
            status_interval_nanos: DEFAULT_STATUS_INTERVAL.as_nanos() as u64,
            log_cap_lines: DEFAULT_LOG_CAP_LINES,
            log_flush_delay_ms: LOG_FLUSH_DELAY.as_millis() as u64,
        }
    }
}

impl SessionConfig {
    /// Config with only the given subscriptions and defaults otherwise.
    pub fn with_subscriptions(subscriptions: impl IntoIterator<Item = Subscription>) -> Self {
        Self {
            subscriptions: subscriptions.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Log flush delay as a [`Duration`].
    pub fn log_flush_delay(&self) -> Duration {
        Duration::from_millis(self.log_flush_delay_ms)
    }
}

/// Errors returned by request calls.
///
/// A request error never changes connectivity.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No live link to send on.
    #[error("session is not connected")]
    NotConnected,

    /// The request could not be encoded.
    #[error("failed to encode request: {0}")]
    Encode(#[from] ProtocolError),
}

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No link and no retry task.
    Disconnected,
    /// Retry task running.
    Connecting,
    /// Link live.
    Connected,
}

/// Control-channel session to the engine.
///
/// All methods must be called from within a tokio runtime. Dropping the
/// session disconnects it.
pub struct Session {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("phase", &self.phase())
            .field("subscriptions", &self.inner.config.subscriptions)
            .finish_non_exhaustive()
    }
}

struct Inner {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    store: Arc<Store>,
    logs: LogBatcher,
    control: Mutex<Control>,
}

#[derive(Default)]
struct Control {
    retry: Option<RetryTask>,
    link: Option<Link>,
    /// Source of ids for retry tasks and links.
    next_id: u64,
}

impl Control {
    fn next_id(&mut self) -> u64 {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }

    fn phase(&self) -> SessionPhase {
        if self.link.is_some() {
            SessionPhase::Connected
        } else if self.retry.is_some() {
            SessionPhase::Connecting
        } else {
            SessionPhase::Disconnected
        }
    }
}

struct RetryTask {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RetryTask {
    fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// One live connection: write queue plus the two tasks that own the halves.
struct Link {
    generation: u64,
    outbound: UnboundedSender<Vec<u8>>,
    read_handle: JoinHandle<()>,
    write_handle: JoinHandle<()>,
}

impl Link {
    fn close(self) {
        self.read_handle.abort();
        self.write_handle.abort();
    }
}

impl Session {
    /// Create a disconnected session.
    pub fn new(config: SessionConfig, connector: impl Connector + 'static) -> Self {
        Self::with_connector(config, Arc::new(connector))
    }

    /// Create a disconnected session sharing an existing connector.
    pub fn with_connector(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        let store = Arc::new(Store::new(config.log_cap_lines));
        let sink = Arc::clone(&store);
        let logs = LogBatcher::new(config.log_flush_delay(), move |batch| sink.append_logs(batch));
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                store,
                logs,
                control: Mutex::new(Control::default()),
            }),
        }
    }

    /// Settings this session was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.inner.lock_control().phase()
    }

    /// Watch the observable state.
    pub fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.inner.store.subscribe()
    }

    /// Copy of the observable state.
    pub fn state(&self) -> ClientState {
        self.inner.store.snapshot()
    }

    /// Start connecting in the background.
    ///
    /// No-op while connected. Otherwise any retry task in flight is cancelled
    /// and a fresh one is started.
    pub fn connect(&self) {
        let mut control = self.inner.lock_control();
        if control.link.is_some() {
            log::debug!("[Session] connect ignored: already connected");
            return;
        }
        if let Some(retry) = control.retry.take() {
            log::debug!("[Session] restarting connect loop");
            retry.stop();
        }

        let id = control.next_id();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.inner).connect_loop(id, cancel.clone()));
        control.retry = Some(RetryTask { id, cancel, handle });
    }

    /// Cancel any connect attempt, close the link and mark disconnected.
    ///
    /// Does not schedule a retry.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Send whatever is queued, close the stream and mark disconnected.
    ///
    /// Unlike [`Session::disconnect`], requests already accepted by the
    /// session reach the engine before the stream closes.
    pub async fn shutdown(&self) {
        let link = {
            let mut control = self.inner.lock_control();
            if let Some(retry) = control.retry.take() {
                retry.stop();
            }
            control.link.take()
        };
        self.inner.store.end_session();

        let Some(Link {
            outbound,
            read_handle,
            write_handle,
            ..
        }) = link
        else {
            return;
        };
        read_handle.abort();
        // Closing the queue lets the write task drain it and shut down.
        drop(outbound);
        if let Err(e) = write_handle.await {
            log::debug!("[Session] write task ended abnormally: {}", e);
        }
        log::info!("[Session] shut down");
    }

    /// Select `member` in `group`.
    ///
    /// The choice is shown immediately and held over stale group snapshots
    /// until the engine reports it.
    pub fn select_outbound(&self, group: &str, member: &str) -> Result<(), SessionError> {
        let request = Request::SelectOutbound {
            group: group.to_string(),
            outbound: member.to_string(),
        };
        self.inner
            .send_with(request, |store| store.select_outbound(group, member))
    }

    /// Expand or collapse `group` locally and tell the engine.
    pub fn set_group_expand(&self, group: &str, expand: bool) -> Result<(), SessionError> {
        let request = Request::SetGroupExpand {
            group: group.to_string(),
            expand,
        };
        self.inner
            .send_with(request, |store| store.set_group_expanded(group, expand))
    }

    /// Ask the engine to latency-test a group or outbound.
    pub fn url_test(&self, tag: &str) -> Result<(), SessionError> {
        self.inner.send(Request::UrlTest {
            tag: tag.to_string(),
        })
    }

    /// Ask the engine to switch mode. The new mode arrives as a push.
    pub fn set_clash_mode(&self, mode: &str) -> Result<(), SessionError> {
        self.inner.send(Request::SetClashMode {
            mode: mode.to_string(),
        })
    }

    /// Ask the engine to close one connection.
    pub fn close_connection(&self, id: &str) -> Result<(), SessionError> {
        self.inner.send(Request::CloseConnection { id: id.to_string() })
    }

    /// Ask the engine to close every connection.
    pub fn close_all_connections(&self) -> Result<(), SessionError> {
        self.inner.send(Request::CloseAllConnections)
    }

    /// Change the connection state filter. Recomputed locally.
    pub fn set_connection_state_filter(&self, filter: StateFilter) {
        self.inner.store.set_connection_state_filter(filter);
    }

    /// Change the connection sort key. Recomputed locally.
    pub fn set_connection_sort(&self, sort: SortKey) {
        self.inner.store.set_connection_sort(sort);
    }

    /// Clear the current alert.
    pub fn dismiss_alert(&self) {
        self.inner.store.dismiss_alert();
    }

    /// Deliver pending log lines now instead of waiting for the timer.
    pub fn flush_logs(&self) {
        self.inner.logs.flush();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.inner.disconnect();
    }
}

impl Inner {
    fn lock_control(&self) -> std::sync::MutexGuard<'_, Control> {
        self.control.lock().expect("session mutex poisoned")
    }

    fn send(&self, request: Request) -> Result<(), SessionError> {
        self.send_with(request, |_| {})
    }

    /// Queue `request`, applying `local` to the store first.
    ///
    /// Holds the control lock throughout, so the link cannot be released
    /// between the check and the send and a failed call leaves state as it was.
    fn send_with(&self, request: Request, local: impl FnOnce(&Store)) -> Result<(), SessionError> {
        let payload = request.encode()?;
        let control = self.lock_control();
        let link = match control.link.as_ref() {
            Some(link) if !link.outbound.is_closed() => link,
            _ => return Err(SessionError::NotConnected),
        };
        local(&self.store);
        if link.outbound.send(payload).is_err() {
            return Err(SessionError::NotConnected);
        }
        Ok(())
    }

    fn disconnect(&self) {
        let mut control = self.lock_control();
        if let Some(retry) = control.retry.take() {
            retry.stop();
        }
        if let Some(link) = control.link.take() {
            log::info!("[Session] disconnecting");
            link.close();
        }
        self.store.end_session();
    }

    /// Bounded retry loop. Runs as the session's retry task.
    async fn connect_loop(self: Arc<Self>, id: u64, cancel: CancellationToken) {
        for attempt in 0..CONNECT_MAX_ATTEMPTS {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(connect_delay(attempt)) => {}
            }
            if cancel.is_cancelled() {
                return;
            }

            match self.connector.connect().await {
                Ok(stream) => {
                    if cancel.is_cancelled() {
                        return;
                    }
                    self.attach(id, stream);
                    return;
                }
                Err(e) => {
                    log::debug!(
                        "[Session] connect attempt {}/{} failed: {}",
                        attempt + 1,
                        CONNECT_MAX_ATTEMPTS,
                        e
                    );
                    if cancel.is_cancelled() {
                        return;
                    }
                }
            }
        }

        log::warn!("[Session] giving up after {} connect attempts", CONNECT_MAX_ATTEMPTS);
        let mut control = self.lock_control();
        if control.retry.as_ref().is_some_and(|r| r.id == id) {
            control.retry = None;
        }
    }

    /// Install a fresh link for `stream` unless retry task `id` was superseded.
    fn attach(self: &Arc<Self>, id: u64, stream: BoxedStream) {
        let subscribe = Request::Subscribe {
            subscriptions: self.config.subscriptions.iter().copied().collect(),
            status_interval_nanos: self.config.status_interval_nanos,
        };
        let subscribe = match subscribe.encode() {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("[Session] failed to encode subscribe request: {}", e);
                return;
            }
        };

        let mut control = self.lock_control();
        if !control.retry.as_ref().is_some_and(|r| r.id == id) {
            log::debug!("[Session] dropping stream from superseded connect attempt");
            return;
        }
        // This is the running task; dropping the handle detaches it.
        control.retry = None;

        let generation = control.next_id();
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        // Queued before the write task starts, so it is the first frame out.
        let _ = outbound.send(subscribe);

        let read_handle = tokio::spawn(Arc::clone(self).read_loop(generation, read_half));
        let write_handle =
            tokio::spawn(Arc::clone(self).write_loop(generation, write_half, outbound_rx));

        control.link = Some(Link {
            generation,
            outbound,
            read_handle,
            write_handle,
        });
        self.store.set_connected(true);
        log::info!("[Session] connected");
    }

    /// Tear down link `generation` if it is still the current one.
    fn release(&self, generation: u64, reason: &str) {
        let mut control = self.lock_control();
        match control.link.as_ref() {
            Some(link) if link.generation == generation => {}
            _ => return,
        }
        if let Some(link) = control.link.take() {
            log::info!("[Session] link closed: {}", reason);
            link.close();
        }
        self.store.end_session();
    }

    async fn read_loop(self: Arc<Self>, generation: u64, read_half: ReadHalf<BoxedStream>) {
        let mut reader = FrameReader::new(read_half);
        loop {
            let push = match reader.read().await {
                Ok(payload) => Push::decode(&payload).and_then(|push| self.admit(push)),
                Err(e) => Err(ProtocolError::from(e)),
            };

            match push {
                Ok(Push::Disconnected { message }) => {
                    let reason = message.unwrap_or_else(|| "engine closed the session".to_string());
                    self.release(generation, &reason);
                    break;
                }
                Ok(push) => self.dispatch(push),
                Err(e) => {
                    log::warn!("[Session] read loop ended: {}", e);
                    self.release(generation, &e.to_string());
                    break;
                }
            }
        }
    }

    async fn write_loop(
        self: Arc<Self>,
        generation: u64,
        write_half: WriteHalf<BoxedStream>,
        mut outbound_rx: UnboundedReceiver<Vec<u8>>,
    ) {
        let mut writer = FrameWriter::new(write_half);
        while let Some(payload) = outbound_rx.recv().await {
            // Batch whatever else is already queued behind this frame.
            let mut result = writer.feed(&payload).await;
            while result.is_ok() {
                match outbound_rx.try_recv() {
                    Ok(next) => result = writer.feed(&next).await,
                    Err(_) => break,
                }
            }
            let result = match result {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                log::warn!("[Session] write failed: {}", e);
                self.release(generation, &e.to_string());
                return;
            }
        }
        if let Err(e) = writer.close().await {
            log::debug!("[Session] close failed: {}", e);
        }
    }

    /// Reject pushes outside the subscription set.
    fn admit(&self, push: Push) -> Result<Push, ProtocolError> {
        match push.subscription() {
            Some(kind) if !self.config.subscriptions.contains(&kind) => {
                Err(ProtocolError::Unsubscribed(kind))
            }
            _ => Ok(push),
        }
    }

    fn dispatch(&self, push: Push) {
        match push {
            Push::Status(status) => self.store.apply_status(status),
            Push::Log(lines) => self.logs.push(lines),
            Push::ClearLog => {
                self.logs.discard();
                self.store.clear_logs();
            }
            Push::Groups(groups) => self.store.apply_groups(groups),
            Push::ClashModeInit { modes, current } => self.store.init_clash_mode(modes, current),
            Push::ClashModeUpdate { mode } => self.store.update_clash_mode(mode),
            Push::Connections(connections) => self.store.apply_connections(connections),
            Push::RequestFailed { message } => {
                log::warn!("[Session] engine rejected request: {}", message);
                self.store.set_alert(message);
            }
            Push::Disconnected { .. } => {}
        }
    }
}
