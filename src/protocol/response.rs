use serde::Deserialize;
use serde_json::Value;

use crate::error::{DbError, ErrorCode};

use super::term;

/// Response type codes sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    SuccessAtom = 1,
    SuccessSequence = 2,
    SuccessPartial = 3,
    WaitComplete = 4,
    ClientError = 16,
    CompileError = 17,
    RuntimeError = 18,
}

impl ResponseType {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ResponseType::SuccessAtom),
            2 => Some(ResponseType::SuccessSequence),
            3 => Some(ResponseType::SuccessPartial),
            4 => Some(ResponseType::WaitComplete),
            16 => Some(ResponseType::ClientError),
            17 => Some(ResponseType::CompileError),
            18 => Some(ResponseType::RuntimeError),
            _ => None,
        }
    }
}

/// A classified response for one token.
#[derive(Debug, Clone)]
pub enum Response {
    /// Terminal single result.
    Single(Value),
    /// A batch of results; `partial` means more batches follow after a
    /// CONTINUE.
    Batch { partial: bool, items: Vec<Value> },
    /// Terminal server-reported error.
    Error(DbError),
}

impl Response {
    /// Whether this response ends the token's stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Response::Batch { partial: true, .. })
    }
}

/// The decoded response envelope.
#[derive(Debug, Deserialize)]
struct WireResponse {
    t: i64,
    #[serde(default)]
    r: Vec<Value>,
    #[serde(default)]
    b: Option<Value>,
}

/// Map a decoded response payload to a typed [`Response`].
///
/// `term` is the originating query term, kept only so that errors can
/// annotate the offending subterm.
pub fn classify(payload: Value, term: Option<&Value>) -> Response {
    let wire: WireResponse = match serde_json::from_value(payload) {
        Ok(wire) => wire,
        Err(e) => {
            return unexpected(format!("Malformed response envelope: {}", e), term);
        }
    };

    match ResponseType::from_code(wire.t) {
        Some(ResponseType::SuccessAtom) => {
            if wire.r.len() == 1 {
                let mut items = wire.r;
                Response::Single(items.remove(0))
            } else {
                unexpected(
                    format!("SUCCESS_ATOM carried {} results", wire.r.len()),
                    term,
                )
            }
        }
        Some(ResponseType::SuccessSequence) => Response::Batch {
            partial: false,
            items: wire.r,
        },
        Some(ResponseType::SuccessPartial) => Response::Batch {
            partial: true,
            items: wire.r,
        },
        Some(ResponseType::WaitComplete) => Response::Single(Value::Bool(true)),
        Some(ResponseType::ClientError) => server_error(ErrorCode::BrokenClient, wire, term),
        Some(ResponseType::CompileError) => server_error(ErrorCode::BadQuery, wire, term),
        Some(ResponseType::RuntimeError) => server_error(ErrorCode::Runtime, wire, term),
        None => unexpected(format!("Unknown response type {}", wire.t), term),
    }
}

fn server_error(code: ErrorCode, wire: WireResponse, term: Option<&Value>) -> Response {
    let message = match wire.r.first() {
        Some(Value::String(msg)) => msg.clone(),
        Some(other) => other.to_string(),
        None => "<server sent no error message>".to_string(),
    };
    let backtrace = wire.b.as_ref().and_then(term::frames_from_wire);

    Response::Error(DbError {
        code,
        message,
        term: term.cloned(),
        backtrace,
    })
}

fn unexpected(message: String, term: Option<&Value>) -> Response {
    Response::Error(DbError {
        code: ErrorCode::UnexpectedResponse,
        message,
        term: term.cloned(),
        backtrace: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::term::Frame;
    use serde_json::json;

    #[test]
    fn atom_yields_single() {
        match classify(json!({"t": 1, "r": [42]}), None) {
            Response::Single(v) => assert_eq!(v, json!(42)),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn atom_with_wrong_arity_is_unexpected() {
        match classify(json!({"t": 1, "r": [1, 2]}), None) {
            Response::Error(err) => assert_eq!(err.code, ErrorCode::UnexpectedResponse),
            other => panic!("unexpected: {:?}", other),
        }
        match classify(json!({"t": 1, "r": []}), None) {
            Response::Error(err) => assert_eq!(err.code, ErrorCode::UnexpectedResponse),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn sequence_is_terminal_batch() {
        let resp = classify(json!({"t": 2, "r": [1, 2, 3]}), None);
        match &resp {
            Response::Batch { partial, items } => {
                assert!(!*partial);
                assert_eq!(items.len(), 3);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(resp.is_terminal());
    }

    #[test]
    fn partial_is_not_terminal() {
        let resp = classify(json!({"t": 3, "r": [1]}), None);
        match &resp {
            Response::Batch { partial, .. } => assert!(*partial),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(!resp.is_terminal());
    }

    #[test]
    fn wait_complete_synthesizes_true() {
        match classify(json!({"t": 4}), None) {
            Response::Single(v) => assert_eq!(v, json!(true)),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn error_codes_map() {
        let cases = [
            (16, ErrorCode::BrokenClient),
            (17, ErrorCode::BadQuery),
            (18, ErrorCode::Runtime),
        ];
        for (t, code) in cases {
            match classify(json!({"t": t, "r": ["boom"]}), None) {
                Response::Error(err) => {
                    assert_eq!(err.code, code);
                    assert_eq!(err.message, "boom");
                }
                other => panic!("unexpected: {:?}", other),
            }
        }
    }

    #[test]
    fn error_keeps_term_and_backtrace() {
        let term = json!([15, ["posts"]]);
        match classify(
            json!({"t": 18, "r": ["divide by zero"], "b": [0, 1]}),
            Some(&term),
        ) {
            Response::Error(err) => {
                assert_eq!(err.term, Some(term));
                assert_eq!(err.backtrace, Some(vec![Frame::Pos(0), Frame::Pos(1)]));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn malformed_backtrace_is_dropped() {
        match classify(json!({"t": 18, "r": ["boom"], "b": [[0]]}), None) {
            Response::Error(err) => assert!(err.backtrace.is_none()),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn unknown_type_is_unexpected() {
        match classify(json!({"t": 99, "r": []}), None) {
            Response::Error(err) => assert_eq!(err.code, ErrorCode::UnexpectedResponse),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn non_object_is_unexpected() {
        match classify(json!([1, 2, 3]), None) {
            Response::Error(err) => assert_eq!(err.code, ErrorCode::UnexpectedResponse),
            other => panic!("unexpected: {:?}", other),
        }
        match classify(json!({"r": [1]}), None) {
            Response::Error(err) => assert_eq!(err.code, ErrorCode::UnexpectedResponse),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
