//! Session integration tests.
//!
//! A fake engine hands out in-memory duplex streams; the test drives the
//! engine end directly with the framing codec.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use boxctl::command::{
    ClientState, ConnectionRecord, Group, GroupItem, LogLevel, LogLine, Push, Request, Session,
    SessionConfig, SessionError, SessionPhase, SortKey, StateFilter, StatusSnapshot, Subscription,
};
use boxctl::constants::{connect_delay, CONNECT_MAX_ATTEMPTS, TRAFFIC_HISTORY_LEN};
use boxctl::socket::{BoxedStream, Connector, FrameError, FrameReader, FrameWriter};
use chrono::{TimeZone, Utc};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Instant};

// ─── Fake engine ────────────────────────────────────────────────────────────

/// Connector that records every attempt and, when accepting, hands the
/// engine end of a fresh duplex pair to the test.
struct FakeEngine {
    calls: Arc<Mutex<Vec<Instant>>>,
    accept: Option<mpsc::UnboundedSender<DuplexStream>>,
}

#[async_trait]
impl Connector for FakeEngine {
    async fn connect(&self) -> io::Result<BoxedStream> {
        self.calls.lock().unwrap().push(Instant::now());
        let Some(accept) = &self.accept else {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        };
        let (client, engine) = tokio::io::duplex(64 * 1024);
        accept
            .send(engine)
            .map_err(|_| io::Error::from(io::ErrorKind::ConnectionRefused))?;
        Ok(Box::new(client))
    }
}

/// Engine end of one session link.
struct EngineEnd {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter<WriteHalf<DuplexStream>>,
}

impl EngineEnd {
    fn new(stream: DuplexStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
        }
    }

    async fn push(&mut self, push: Push) {
        self.writer.write(&push.encode().unwrap()).await.unwrap();
    }

    async fn raw(&mut self, payload: &[u8]) {
        self.writer.write(payload).await.unwrap();
    }

    async fn request(&mut self) -> Request {
        let payload = timeout(Duration::from_secs(5), self.reader.read())
            .await
            .expect("timed out waiting for request")
            .unwrap();
        Request::decode(&payload).unwrap()
    }

    async fn read_error(&mut self) -> FrameError {
        timeout(Duration::from_secs(5), self.reader.read())
            .await
            .expect("timed out waiting for close")
            .unwrap_err()
    }
}

struct Harness {
    session: Session,
    calls: Arc<Mutex<Vec<Instant>>>,
    streams: mpsc::UnboundedReceiver<DuplexStream>,
    state: watch::Receiver<ClientState>,
}

impl Harness {
    fn new(config: SessionConfig) -> Self {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (tx, streams) = mpsc::unbounded_channel();
        let session = Session::new(
            config,
            FakeEngine {
                calls: Arc::clone(&calls),
                accept: Some(tx),
            },
        );
        let state = session.subscribe_state();
        Self {
            session,
            calls,
            streams,
            state,
        }
    }

    fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Connect, accept on the engine side and consume the subscribe request.
    async fn connect(&mut self) -> EngineEnd {
        self.session.connect();
        let stream = timeout(Duration::from_secs(5), self.streams.recv())
            .await
            .expect("timed out waiting for connect")
            .unwrap();
        let mut engine = EngineEnd::new(stream);
        match engine.request().await {
            Request::Subscribe { .. } => {}
            other => panic!("expected subscribe first, got {other:?}"),
        }
        self.wait_for(|s| s.is_connected).await;
        engine
    }

    async fn wait_for(&mut self, pred: impl Fn(&ClientState) -> bool) -> ClientState {
        let state = &mut self.state;
        timeout(Duration::from_secs(5), async {
            loop {
                {
                    let current = state.borrow_and_update();
                    if pred(&current) {
                        return current.clone();
                    }
                }
                state.changed().await.unwrap();
            }
        })
        .await
        .expect("timed out waiting for state")
    }
}

fn group(tag: &str, selected: &str) -> Group {
    Group {
        tag: tag.into(),
        kind: "selector".into(),
        selected: selected.into(),
        selectable: true,
        expanded: false,
        items: ["a", "b", "c"]
            .iter()
            .map(|m| GroupItem {
                tag: (*m).into(),
                kind: "vmess".into(),
                url_test_time: 0,
                url_test_delay: 0,
            })
            .collect(),
    }
}

fn selected(state: &ClientState, tag: &str) -> String {
    state
        .groups
        .iter()
        .find(|g| g.tag == tag)
        .map(|g| g.selected.clone())
        .unwrap_or_default()
}

fn connection(id: &str, created: i64, closed: bool) -> ConnectionRecord {
    ConnectionRecord {
        id: id.into(),
        inbound: "mixed-in".into(),
        inbound_type: "mixed".into(),
        ip_version: 4,
        network: "tcp".into(),
        source: "127.0.0.1:50000".into(),
        destination: "example.com:443".into(),
        domain: "example.com".into(),
        protocol: "tls".into(),
        user: String::new(),
        from_outbound: String::new(),
        created_at: Utc.timestamp_opt(created, 0).unwrap(),
        closed_at: closed.then(|| Utc.timestamp_opt(created + 5, 0).unwrap()),
        uplink: 0,
        downlink: 0,
        uplink_total: 10,
        downlink_total: 20,
        rule: "final".into(),
        outbound: "proxy".into(),
        outbound_type: "selector".into(),
        chain: vec!["proxy".into(), "a".into()],
    }
}

fn log(message: &str) -> LogLine {
    LogLine::new(LogLevel::Info, message)
}

// ─── Connect / retry ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_retry_gives_up_after_ten_attempts() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let session = Session::new(
        SessionConfig::default(),
        FakeEngine {
            calls: Arc::clone(&calls),
            accept: None,
        },
    );

    let start = Instant::now();
    session.connect();
    assert_eq!(session.phase(), SessionPhase::Connecting);
    tokio::time::sleep(Duration::from_secs(30)).await;

    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls.len(), CONNECT_MAX_ATTEMPTS as usize);

    let mut previous = start;
    for (attempt, at) in calls.iter().enumerate() {
        let gap = *at - previous;
        let expected = connect_delay(attempt as u32);
        assert!(
            gap >= expected && gap < expected + Duration::from_millis(5),
            "attempt {attempt}: gap {gap:?}, expected {expected:?}"
        );
        previous = *at;
    }
    assert_eq!(connect_delay(0), Duration::from_millis(100));
    assert_eq!(connect_delay(9), Duration::from_millis(550));

    assert_eq!(session.phase(), SessionPhase::Disconnected);
    assert!(!session.state().is_connected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_restarts_pending_retry() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let session = Session::new(
        SessionConfig::default(),
        FakeEngine {
            calls: Arc::clone(&calls),
            accept: None,
        },
    );

    session.connect();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(calls.lock().unwrap().len(), 1);

    session.connect();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(calls.lock().unwrap().len(), 1 + CONNECT_MAX_ATTEMPTS as usize);
}

#[tokio::test]
async fn test_connect_sends_subscribe_first() {
    let config = SessionConfig {
        status_interval_nanos: 500_000_000,
        ..SessionConfig::with_subscriptions([Subscription::Groups, Subscription::Status])
    };
    let mut harness = Harness::new(config);
    harness.session.connect();

    let stream = harness.streams.recv().await.unwrap();
    let mut engine = EngineEnd::new(stream);
    assert_eq!(
        engine.request().await,
        Request::Subscribe {
            subscriptions: vec![Subscription::Status, Subscription::Groups],
            status_interval_nanos: 500_000_000,
        }
    );
    harness.wait_for(|s| s.is_connected).await;
    assert_eq!(harness.session.phase(), SessionPhase::Connected);
}

#[tokio::test]
async fn test_connect_is_idempotent_while_connected() {
    let mut harness = Harness::new(SessionConfig::default());
    let _engine = harness.connect().await;

    harness.session.connect();
    harness.session.connect();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(harness.calls(), 1);
    assert!(harness.session.state().is_connected);
}

#[tokio::test]
async fn test_disconnect_closes_stream() {
    let mut harness = Harness::new(SessionConfig::default());
    let mut engine = harness.connect().await;

    harness.session.disconnect();
    assert!(!harness.session.state().is_connected);
    assert_eq!(harness.session.phase(), SessionPhase::Disconnected);
    assert!(matches!(engine.read_error().await, FrameError::Closed));

    assert!(matches!(
        harness.session.url_test("auto"),
        Err(SessionError::NotConnected)
    ));
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let mut harness = Harness::new(SessionConfig::default());
    let _first = harness.connect().await;
    harness.session.disconnect();

    let mut second = harness.connect().await;
    assert_eq!(harness.calls(), 2);
    harness.session.set_clash_mode("Direct").unwrap();
    assert_eq!(
        second.request().await,
        Request::SetClashMode {
            mode: "Direct".into()
        }
    );
}

#[tokio::test]
async fn test_shutdown_drains_queued_requests() {
    let mut harness = Harness::new(SessionConfig::default());
    let mut engine = harness.connect().await;

    harness.session.url_test("auto").unwrap();
    harness.session.close_connection("c-1").unwrap();
    harness.session.close_all_connections().unwrap();
    harness.session.shutdown().await;

    assert_eq!(engine.request().await, Request::UrlTest { tag: "auto".into() });
    assert_eq!(engine.request().await, Request::CloseConnection { id: "c-1".into() });
    assert_eq!(engine.request().await, Request::CloseAllConnections);
    assert!(matches!(engine.read_error().await, FrameError::Closed));
    assert!(!harness.session.state().is_connected);
}

// ─── Protocol errors ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_unsubscribed_push_ends_session_without_retry() {
    let mut harness = Harness::new(SessionConfig::with_subscriptions([Subscription::Status]));
    let mut engine = harness.connect().await;

    engine.push(Push::Log(vec![log("not asked for")])).await;
    harness.wait_for(|s| !s.is_connected).await;
    assert_eq!(harness.session.phase(), SessionPhase::Disconnected);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.calls(), 1, "protocol errors do not trigger a retry");
}

#[tokio::test]
async fn test_unknown_tag_ends_session() {
    let mut harness = Harness::new(SessionConfig::default());
    let mut engine = harness.connect().await;

    engine.raw(&[0x7f]).await;
    harness.wait_for(|s| !s.is_connected).await;
    assert!(matches!(engine.read_error().await, FrameError::Closed));
}

#[tokio::test]
async fn test_malformed_body_ends_session() {
    let mut harness = Harness::new(SessionConfig::default());
    let mut engine = harness.connect().await;

    engine.raw(b"\x01{\"memory\": \"lots\"}").await;
    harness.wait_for(|s| !s.is_connected).await;
}

#[tokio::test]
async fn test_engine_disconnected_push() {
    let mut harness = Harness::new(SessionConfig::default());
    let mut engine = harness.connect().await;

    engine
        .push(Push::Disconnected {
            message: Some("service stopping".into()),
        })
        .await;
    harness.wait_for(|s| !s.is_connected).await;
    assert_eq!(harness.session.phase(), SessionPhase::Disconnected);
}

#[tokio::test]
async fn test_engine_hangup_marks_disconnected() {
    let mut harness = Harness::new(SessionConfig::default());
    let engine = harness.connect().await;
    drop(engine);
    harness.wait_for(|s| !s.is_connected).await;
}

#[tokio::test]
async fn test_request_failure_is_an_alert() {
    let mut harness = Harness::new(SessionConfig::default());
    let mut engine = harness.connect().await;

    engine
        .push(Push::RequestFailed {
            message: "outbound not found: z".into(),
        })
        .await;
    let state = harness
        .wait_for(|s| s.alert.is_some())
        .await;
    assert_eq!(state.alert.as_deref(), Some("outbound not found: z"));
    assert!(state.is_connected);

    harness.session.dismiss_alert();
    assert!(harness.session.state().alert.is_none());
}

// ─── Dispatch ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_status_feeds_traffic_history() {
    let mut harness = Harness::new(SessionConfig::default());
    let mut engine = harness.connect().await;

    for v in 1..=40u64 {
        engine
            .push(Push::Status(StatusSnapshot {
                memory: 4096,
                traffic_available: true,
                uplink: v,
                downlink: v * 10,
                ..StatusSnapshot::default()
            }))
            .await;
    }
    let state = harness
        .wait_for(|s| s.status.as_ref().is_some_and(|st| st.uplink == 40))
        .await;
    assert_eq!(state.uplink_history.to_vec().len(), TRAFFIC_HISTORY_LEN);
    assert_eq!(state.uplink_history.to_vec(), (11..=40).collect::<Vec<u64>>());
    assert_eq!(
        state.downlink_history.to_vec(),
        (11..=40).map(|v| v * 10).collect::<Vec<u64>>()
    );
}

#[tokio::test]
async fn test_clash_mode_pushes() {
    let mut harness = Harness::new(SessionConfig::default());
    let mut engine = harness.connect().await;

    engine
        .push(Push::ClashModeInit {
            modes: vec!["Rule".into(), "Global".into(), "Direct".into()],
            current: "Rule".into(),
        })
        .await;
    engine
        .push(Push::ClashModeUpdate {
            mode: "Global".into(),
        })
        .await;
    let state = harness.wait_for(|s| s.clash_mode == "Global").await;
    assert_eq!(state.clash_mode_list, vec!["Rule", "Global", "Direct"]);
}

#[tokio::test]
async fn test_logs_arrive_batched_and_capped() {
    let config = SessionConfig {
        log_cap_lines: 5,
        ..SessionConfig::default()
    };
    let mut harness = Harness::new(config);
    let mut engine = harness.connect().await;

    engine.push(Push::Log(vec![log("1"), log("2"), log("3")])).await;
    engine.push(Push::Log(vec![log("4"), log("5"), log("6")])).await;
    engine.push(Push::Log(vec![log("7"), log("8")])).await;

    let state = harness
        .wait_for(|s| s.log_lines.back().is_some_and(|l| l.message == "8"))
        .await;
    let messages: Vec<&str> = state.log_lines.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["4", "5", "6", "7", "8"]);
}

#[tokio::test]
async fn test_clear_log_drops_visible_lines() {
    let mut harness = Harness::new(SessionConfig::default());
    let mut engine = harness.connect().await;

    engine.push(Push::Log(vec![log("old")])).await;
    harness.wait_for(|s| !s.log_lines.is_empty()).await;

    engine.push(Push::ClearLog).await;
    harness.wait_for(|s| s.log_lines.is_empty()).await;
}

#[tokio::test]
async fn test_connections_view_is_local() {
    let mut harness = Harness::new(SessionConfig::default());
    let mut engine = harness.connect().await;

    engine
        .push(Push::Connections(vec![
            connection("old", 100, false),
            connection("closed", 200, true),
            connection("new", 300, false),
        ]))
        .await;
    let state = harness.wait_for(|s| s.has_any_connection).await;
    let ids: Vec<&str> = state.connections.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["new", "old"]);

    harness.session.set_connection_state_filter(StateFilter::All);
    let state = harness.session.state();
    let ids: Vec<&str> = state.connections.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["new", "closed", "old"]);

    harness.session.set_connection_sort(SortKey::ByTrafficTotal);
    assert_eq!(harness.session.state().connections.len(), 3);
    assert_eq!(harness.session.state().connection_sort, SortKey::ByTrafficTotal);
}

// ─── Groups ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_optimistic_selection_converges() {
    let mut harness = Harness::new(SessionConfig::default());
    let mut engine = harness.connect().await;

    engine.push(Push::Groups(vec![group("proxy", "a")])).await;
    harness.wait_for(|s| selected(s, "proxy") == "a").await;

    harness.session.select_outbound("proxy", "b").unwrap();
    assert_eq!(selected(&harness.session.state(), "proxy"), "b");
    assert_eq!(
        engine.request().await,
        Request::SelectOutbound {
            group: "proxy".into(),
            outbound: "b".into(),
        }
    );

    // Stale snapshot still carrying the old selection.
    engine.push(Push::Groups(vec![group("proxy", "a"), group("auto", "c")])).await;
    let state = harness.wait_for(|s| s.groups.len() == 2).await;
    assert_eq!(selected(&state, "proxy"), "b");

    // Engine catches up, then later changes on its own.
    engine.push(Push::Groups(vec![group("proxy", "b")])).await;
    harness.wait_for(|s| s.groups.len() == 1).await;
    engine.push(Push::Groups(vec![group("proxy", "c"), group("auto", "c")])).await;
    let state = harness.wait_for(|s| s.groups.len() == 2).await;
    assert_eq!(selected(&state, "proxy"), "c");
}

#[tokio::test]
async fn test_pending_selection_ends_with_session() {
    let mut harness = Harness::new(SessionConfig::default());
    let mut engine = harness.connect().await;

    engine.push(Push::Groups(vec![group("proxy", "a")])).await;
    harness.wait_for(|s| selected(s, "proxy") == "a").await;
    harness.session.select_outbound("proxy", "b").unwrap();
    assert_eq!(selected(&harness.session.state(), "proxy"), "b");

    // Link drops before the engine confirms the selection.
    drop(engine);
    harness.wait_for(|s| !s.is_connected).await;

    // The new engine never saw the request; its snapshot is authoritative.
    let mut engine = harness.connect().await;
    engine.push(Push::Groups(vec![group("proxy", "a"), group("auto", "c")])).await;
    let state = harness.wait_for(|s| s.groups.len() == 2).await;
    assert_eq!(selected(&state, "proxy"), "a");
}

#[tokio::test]
async fn test_group_expand_is_sticky() {
    let mut harness = Harness::new(SessionConfig::default());
    let mut engine = harness.connect().await;

    engine.push(Push::Groups(vec![group("proxy", "a")])).await;
    harness.wait_for(|s| !s.groups.is_empty()).await;

    harness.session.set_group_expand("proxy", true).unwrap();
    assert_eq!(
        engine.request().await,
        Request::SetGroupExpand {
            group: "proxy".into(),
            expand: true,
        }
    );

    engine.push(Push::Groups(vec![group("proxy", "b")])).await;
    let state = harness.wait_for(|s| selected(s, "proxy") == "b").await;
    assert!(state.groups[0].expanded);
}

#[tokio::test]
async fn test_select_when_disconnected_changes_nothing() {
    let harness = Harness::new(SessionConfig::default());
    assert!(matches!(
        harness.session.select_outbound("proxy", "b"),
        Err(SessionError::NotConnected)
    ));
    assert!(harness.session.state().groups.is_empty());
    assert_eq!(harness.calls(), 0);
}
