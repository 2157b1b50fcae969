use serde_json::Value;

/// Query types understood by the server.
///
/// START carries a full `[1, term, options]` array built by the query
/// layer; the other three are bare one-element arrays reusing the token of
/// the query they control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Start = 1,
    Continue = 2,
    Stop = 3,
    NoreplyWait = 4,
}

impl QueryType {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Build the wire payload for a control query: `[2]`, `[3]` or `[4]`.
pub fn control_payload(kind: QueryType) -> Vec<u8> {
    format!("[{}]", kind.code()).into_bytes()
}

/// Whether the query's options object requests no reply.
///
/// The options object is the third element of the outer query array.
pub fn is_noreply(query: &Value) -> bool {
    query
        .get(2)
        .and_then(|opts| opts.get("noreply"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
