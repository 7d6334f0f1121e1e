//! Control-channel envelopes and their wire encoding.
//!
//! Each frame payload is `[u8 tag][JSON body]`. Kinds without data carry an
//! empty body.
//!
//! Engine → client pushes:
//! - `0x01` Status: [`StatusSnapshot`]
//! - `0x02` Log: `[LogLine]`
//! - `0x03` ClearLog: empty
//! - `0x04` Groups: `[Group]`
//! - `0x05` ClashModeInit: `{"modes": [..], "current": ".."}`
//! - `0x06` ClashModeUpdate: `{"mode": ".."}`
//! - `0x07` Connections: `[ConnectionRecord]`
//! - `0x08` RequestFailed: `{"message": ".."}`
//! - `0x09` Disconnected: `{"message": ".." | null}`
//!
//! Client → engine requests:
//! - `0x20` Subscribe: `{"subscriptions": [..], "status_interval_nanos": n}`
//! - `0x21` SelectOutbound: `{"group": "..", "outbound": ".."}`
//! - `0x22` SetGroupExpand: `{"group": "..", "expand": bool}`
//! - `0x23` UrlTest: `{"tag": ".."}`
//! - `0x24` SetClashMode: `{"mode": ".."}`
//! - `0x25` CloseConnection: `{"id": ".."}`
//! - `0x26` CloseAllConnections: empty

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::types::{ConnectionRecord, Group, LogLine, StatusSnapshot, Subscription};
use crate::socket::FrameError;

/// Push tag constants.
pub mod push_tag {
    /// Status snapshot.
    pub const STATUS: u8 = 0x01;
    /// Batch of log lines.
    pub const LOG: u8 = 0x02;
    /// Engine cleared its log.
    pub const CLEAR_LOG: u8 = 0x03;
    /// Group topology snapshot.
    pub const GROUPS: u8 = 0x04;
    /// Mode list and current mode.
    pub const CLASH_MODE_INIT: u8 = 0x05;
    /// Current mode changed.
    pub const CLASH_MODE_UPDATE: u8 = 0x06;
    /// Connections snapshot.
    pub const CONNECTIONS: u8 = 0x07;
    /// A request call was rejected.
    pub const REQUEST_FAILED: u8 = 0x08;
    /// Engine is dropping the session.
    pub const DISCONNECTED: u8 = 0x09;
}

/// Request tag constants.
pub mod request_tag {
    /// Open the subscription.
    pub const SUBSCRIBE: u8 = 0x20;
    /// Select a group member.
    pub const SELECT_OUTBOUND: u8 = 0x21;
    /// Persist a group's expand flag.
    pub const SET_GROUP_EXPAND: u8 = 0x22;
    /// Run a latency test.
    pub const URL_TEST: u8 = 0x23;
    /// Switch mode.
    pub const SET_CLASH_MODE: u8 = 0x24;
    /// Close one connection.
    pub const CLOSE_CONNECTION: u8 = 0x25;
    /// Close every connection.
    pub const CLOSE_ALL_CONNECTIONS: u8 = 0x26;
}

/// Envelope decode/encode failures.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Payload had no tag byte.
    #[error("empty envelope")]
    Empty,

    /// Tag is not part of this protocol family.
    #[error("unknown envelope tag: 0x{0:02x}")]
    UnknownTag(u8),

    /// Body did not match the tag's schema.
    #[error("malformed {kind} body: {source}")]
    Malformed {
        /// Envelope kind being decoded.
        kind: &'static str,
        /// JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Engine pushed a kind the session did not subscribe to.
    #[error("push outside subscription set: {0:?}")]
    Unsubscribed(Subscription),

    /// Framing failure underneath.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Engine → client message.
#[derive(Debug, Clone, PartialEq)]
pub enum Push {
    /// Status counters.
    Status(StatusSnapshot),
    /// Log lines in engine order.
    Log(Vec<LogLine>),
    /// Engine cleared its log buffer.
    ClearLog,
    /// Full group topology.
    Groups(Vec<Group>),
    /// Allowed modes and the current one, sent once after subscribing.
    ClashModeInit {
        /// Allowed mode names.
        modes: Vec<String>,
        /// Current mode.
        current: String,
    },
    /// Current mode changed.
    ClashModeUpdate {
        /// New mode.
        mode: String,
    },
    /// Full connections snapshot.
    Connections(Vec<ConnectionRecord>),
    /// A request call was rejected by the engine.
    RequestFailed {
        /// Human-readable reason.
        message: String,
    },
    /// Engine is closing the session.
    Disconnected {
        /// Optional reason.
        message: Option<String>,
    },
}

#[derive(Serialize, Deserialize)]
struct ClashModeInitBody {
    modes: Vec<String>,
    current: String,
}

#[derive(Serialize, Deserialize)]
struct ModeBody {
    mode: String,
}

#[derive(Serialize, Deserialize)]
struct MessageBody {
    message: String,
}

#[derive(Serialize, Deserialize)]
struct OptionalMessageBody {
    #[serde(default)]
    message: Option<String>,
}

impl Push {
    /// Wire tag for this push.
    pub fn tag(&self) -> u8 {
        match self {
            Push::Status(_) => push_tag::STATUS,
            Push::Log(_) => push_tag::LOG,
            Push::ClearLog => push_tag::CLEAR_LOG,
            Push::Groups(_) => push_tag::GROUPS,
            Push::ClashModeInit { .. } => push_tag::CLASH_MODE_INIT,
            Push::ClashModeUpdate { .. } => push_tag::CLASH_MODE_UPDATE,
            Push::Connections(_) => push_tag::CONNECTIONS,
            Push::RequestFailed { .. } => push_tag::REQUEST_FAILED,
            Push::Disconnected { .. } => push_tag::DISCONNECTED,
        }
    }

    /// Subscription that gates this push. `None` for session-level kinds
    /// that are always accepted.
    pub fn subscription(&self) -> Option<Subscription> {
        match self {
            Push::Status(_) => Some(Subscription::Status),
            Push::Log(_) | Push::ClearLog => Some(Subscription::Log),
            Push::Groups(_) => Some(Subscription::Groups),
            Push::ClashModeInit { .. } | Push::ClashModeUpdate { .. } => {
                Some(Subscription::ClashMode)
            }
            Push::Connections(_) => Some(Subscription::Connections),
            Push::RequestFailed { .. } | Push::Disconnected { .. } => None,
        }
    }

    /// Encode into a frame payload.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Push::Status(status) => encode_body(self.tag(), "status", status),
            Push::Log(lines) => encode_body(self.tag(), "log", lines),
            Push::ClearLog => Ok(vec![self.tag()]),
            Push::Groups(groups) => encode_body(self.tag(), "groups", groups),
            Push::ClashModeInit { modes, current } => encode_body(
                self.tag(),
                "clash mode init",
                &ClashModeInitBody {
                    modes: modes.clone(),
                    current: current.clone(),
                },
            ),
            Push::ClashModeUpdate { mode } => encode_body(
                self.tag(),
                "clash mode update",
                &ModeBody { mode: mode.clone() },
            ),
            Push::Connections(connections) => encode_body(self.tag(), "connections", connections),
            Push::RequestFailed { message } => encode_body(
                self.tag(),
                "request failed",
                &MessageBody {
                    message: message.clone(),
                },
            ),
            Push::Disconnected { message } => encode_body(
                self.tag(),
                "disconnected",
                &OptionalMessageBody {
                    message: message.clone(),
                },
            ),
        }
    }

    /// Decode a frame payload.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let (&tag, body) = payload.split_first().ok_or(ProtocolError::Empty)?;
        match tag {
            push_tag::STATUS => Ok(Push::Status(decode_body("status", body)?)),
            push_tag::LOG => Ok(Push::Log(decode_body("log", body)?)),
            push_tag::CLEAR_LOG => Ok(Push::ClearLog),
            push_tag::GROUPS => Ok(Push::Groups(decode_body("groups", body)?)),
            push_tag::CLASH_MODE_INIT => {
                let body: ClashModeInitBody = decode_body("clash mode init", body)?;
                Ok(Push::ClashModeInit {
                    modes: body.modes,
                    current: body.current,
                })
            }
            push_tag::CLASH_MODE_UPDATE => {
                let body: ModeBody = decode_body("clash mode update", body)?;
                Ok(Push::ClashModeUpdate { mode: body.mode })
            }
            push_tag::CONNECTIONS => Ok(Push::Connections(decode_body("connections", body)?)),
            push_tag::REQUEST_FAILED => {
                let body: MessageBody = decode_body("request failed", body)?;
                Ok(Push::RequestFailed {
                    message: body.message,
                })
            }
            push_tag::DISCONNECTED => {
                let message = if body.is_empty() {
                    None
                } else {
                    decode_body::<OptionalMessageBody>("disconnected", body)?.message
                };
                Ok(Push::Disconnected { message })
            }
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

/// Client → engine message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Open the subscription. Sent once right after connecting.
    Subscribe {
        /// Push families to emit.
        subscriptions: Vec<Subscription>,
        /// Status push cadence in nanoseconds.
        status_interval_nanos: u64,
    },
    /// Select `outbound` as the member of `group`.
    SelectOutbound {
        /// Group tag.
        group: String,
        /// Member tag.
        outbound: String,
    },
    /// Persist the expand flag for `group`.
    SetGroupExpand {
        /// Group tag.
        group: String,
        /// New flag.
        expand: bool,
    },
    /// Run a latency test for a group or member tag.
    UrlTest {
        /// Group or member tag.
        tag: String,
    },
    /// Switch the engine's mode.
    SetClashMode {
        /// Mode name.
        mode: String,
    },
    /// Close one connection.
    CloseConnection {
        /// Connection id.
        id: String,
    },
    /// Close every connection.
    CloseAllConnections,
}

impl Request {
    /// Wire tag for this request.
    pub fn tag(&self) -> u8 {
        match self {
            Request::Subscribe { .. } => request_tag::SUBSCRIBE,
            Request::SelectOutbound { .. } => request_tag::SELECT_OUTBOUND,
            Request::SetGroupExpand { .. } => request_tag::SET_GROUP_EXPAND,
            Request::UrlTest { .. } => request_tag::URL_TEST,
            Request::SetClashMode { .. } => request_tag::SET_CLASH_MODE,
            Request::CloseConnection { .. } => request_tag::CLOSE_CONNECTION,
            Request::CloseAllConnections => request_tag::CLOSE_ALL_CONNECTIONS,
        }
    }

    /// Encode into a frame payload.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let body = match self {
            Request::Subscribe {
                subscriptions,
                status_interval_nanos,
            } => serde_json::json!({
                "subscriptions": subscriptions,
                "status_interval_nanos": status_interval_nanos,
            }),
            Request::SelectOutbound { group, outbound } => {
                serde_json::json!({ "group": group, "outbound": outbound })
            }
            Request::SetGroupExpand { group, expand } => {
                serde_json::json!({ "group": group, "expand": expand })
            }
            Request::UrlTest { tag } => serde_json::json!({ "tag": tag }),
            Request::SetClashMode { mode } => serde_json::json!({ "mode": mode }),
            Request::CloseConnection { id } => serde_json::json!({ "id": id }),
            Request::CloseAllConnections => return Ok(vec![self.tag()]),
        };
        encode_body(self.tag(), "request", &body)
    }

    /// Decode a frame payload.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        #[derive(Deserialize)]
        struct SubscribeBody {
            subscriptions: Vec<Subscription>,
            status_interval_nanos: u64,
        }
        #[derive(Deserialize)]
        struct SelectBody {
            group: String,
            outbound: String,
        }
        #[derive(Deserialize)]
        struct ExpandBody {
            group: String,
            expand: bool,
        }
        #[derive(Deserialize)]
        struct TagBody {
            tag: String,
        }
        #[derive(Deserialize)]
        struct IdBody {
            id: String,
        }

        let (&tag, body) = payload.split_first().ok_or(ProtocolError::Empty)?;
        match tag {
            request_tag::SUBSCRIBE => {
                let b: SubscribeBody = decode_body("subscribe", body)?;
                Ok(Request::Subscribe {
                    subscriptions: b.subscriptions,
                    status_interval_nanos: b.status_interval_nanos,
                })
            }
            request_tag::SELECT_OUTBOUND => {
                let b: SelectBody = decode_body("select outbound", body)?;
                Ok(Request::SelectOutbound {
                    group: b.group,
                    outbound: b.outbound,
                })
            }
            request_tag::SET_GROUP_EXPAND => {
                let b: ExpandBody = decode_body("set group expand", body)?;
                Ok(Request::SetGroupExpand {
                    group: b.group,
                    expand: b.expand,
                })
            }
            request_tag::URL_TEST => {
                let b: TagBody = decode_body("url test", body)?;
                Ok(Request::UrlTest { tag: b.tag })
            }
            request_tag::SET_CLASH_MODE => {
                let b: ModeBody = decode_body("set clash mode", body)?;
                Ok(Request::SetClashMode { mode: b.mode })
            }
            request_tag::CLOSE_CONNECTION => {
                let b: IdBody = decode_body("close connection", body)?;
                Ok(Request::CloseConnection { id: b.id })
            }
            request_tag::CLOSE_ALL_CONNECTIONS => Ok(Request::CloseAllConnections),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

pub(crate) fn encode_body<T: Serialize + ?Sized>(
    tag: u8,
    kind: &'static str,
    body: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let mut payload = vec![tag];
    serde_json::to_writer(&mut payload, body)
        .map_err(|source| ProtocolError::Malformed { kind, source })?;
    Ok(payload)
}

pub(crate) fn decode_body<T: DeserializeOwned>(kind: &'static str, body: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(body).map_err(|source| ProtocolError::Malformed { kind, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::types::LogLevel;

    #[test]
    fn test_push_tag_is_first_byte() {
        let payload = Push::ClashModeUpdate {
            mode: "Global".into(),
        }
        .encode()
        .unwrap();
        assert_eq!(payload[0], push_tag::CLASH_MODE_UPDATE);
        let body: serde_json::Value = serde_json::from_slice(&payload[1..]).unwrap();
        assert_eq!(body["mode"], "Global");
    }

    #[test]
    fn test_log_push_decodes() {
        let push = Push::Log(vec![
            LogLine::new(LogLevel::Info, "started"),
            LogLine::new(LogLevel::Warn, "slow dns"),
        ]);
        let decoded = Push::decode(&push.encode().unwrap()).unwrap();
        assert_eq!(decoded, push);
    }

    #[test]
    fn test_empty_body_kinds() {
        assert_eq!(Push::decode(&[push_tag::CLEAR_LOG]).unwrap(), Push::ClearLog);
        assert_eq!(
            Push::decode(&[push_tag::DISCONNECTED]).unwrap(),
            Push::Disconnected { message: None }
        );
        assert_eq!(
            Request::CloseAllConnections.encode().unwrap(),
            vec![request_tag::CLOSE_ALL_CONNECTIONS]
        );
    }

    #[test]
    fn test_unknown_push_tag_rejected() {
        assert!(matches!(
            Push::decode(&[0x7F, b'{', b'}']),
            Err(ProtocolError::UnknownTag(0x7F))
        ));
        // Request tags are not valid pushes.
        assert!(matches!(
            Push::decode(&[request_tag::SUBSCRIBE]),
            Err(ProtocolError::UnknownTag(_))
        ));
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert!(matches!(Push::decode(&[]), Err(ProtocolError::Empty)));
        assert!(matches!(Request::decode(&[]), Err(ProtocolError::Empty)));
    }

    #[test]
    fn test_malformed_body_rejected() {
        let err = Push::decode(&[push_tag::STATUS, b'[', b'1']).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { kind: "status", .. }));
    }

    #[test]
    fn test_subscription_gating() {
        assert_eq!(Push::ClearLog.subscription(), Some(Subscription::Log));
        assert_eq!(
            Push::ClashModeInit {
                modes: vec![],
                current: String::new()
            }
            .subscription(),
            Some(Subscription::ClashMode)
        );
        assert_eq!(
            Push::RequestFailed {
                message: "x".into()
            }
            .subscription(),
            None
        );
    }

    #[test]
    fn test_request_decode_matches_encode() {
        let requests = [
            Request::Subscribe {
                subscriptions: vec![Subscription::Status, Subscription::Groups],
                status_interval_nanos: 1_000_000_000,
            },
            Request::SelectOutbound {
                group: "proxy".into(),
                outbound: "hk-01".into(),
            },
            Request::SetGroupExpand {
                group: "proxy".into(),
                expand: true,
            },
            Request::UrlTest { tag: "proxy".into() },
            Request::SetClashMode { mode: "Rule".into() },
            Request::CloseConnection { id: "abc".into() },
            Request::CloseAllConnections,
        ];
        for request in requests {
            let payload = request.encode().unwrap();
            assert_eq!(payload[0], request.tag());
            assert_eq!(Request::decode(&payload).unwrap(), request);
        }
    }
}
