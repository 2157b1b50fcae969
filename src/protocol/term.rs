//! Backtrace folding over query terms
//!
//! A server error carries a backtrace locating the offending subterm inside
//! the originating query. Terms are `[type, args, options]` arrays; each
//! backtrace frame either indexes the argument list or names an option key.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One backtrace frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    /// Positional index into the term's argument list.
    Pos(u64),
    /// Key into the term's options object.
    Opt(String),
}

/// Parse the wire backtrace array. Returns `None` on any unexpected shape;
/// the error is still usable, just without an annotated term.
pub fn frames_from_wire(backtrace: &Value) -> Option<Vec<Frame>> {
    serde_json::from_value(backtrace.clone()).ok()
}

/// Render `term` with the subterm selected by `frames` wrapped in
/// `HERE(..)`. If any frame fails to resolve the term is rendered as-is.
pub fn render_annotated(term: &Value, frames: &[Frame]) -> String {
    let mut out = String::new();
    if write_marked(term, frames, &mut out) {
        out
    } else {
        term.to_string()
    }
}

fn write_marked(term: &Value, frames: &[Frame], out: &mut String) -> bool {
    let Some((frame, rest)) = frames.split_first() else {
        out.push_str("HERE(");
        out.push_str(&term.to_string());
        out.push(')');
        return true;
    };

    let Value::Array(parts) = term else {
        return false;
    };

    match frame {
        Frame::Pos(n) => {
            let n = *n as usize;
            let Some(Value::Array(args)) = parts.get(1) else {
                return false;
            };
            let Some(selected) = args.get(n) else {
                return false;
            };
            let mut marked = String::new();
            if !write_marked(selected, rest, &mut marked) {
                return false;
            }

            out.push('[');
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                if i == 1 {
                    out.push('[');
                    for (j, arg) in args.iter().enumerate() {
                        if j > 0 {
                            out.push(',');
                        }
                        if j == n {
                            out.push_str(&marked);
                        } else {
                            out.push_str(&arg.to_string());
                        }
                    }
                    out.push(']');
                } else {
                    out.push_str(&part.to_string());
                }
            }
            out.push(']');
            true
        }
        Frame::Opt(key) => {
            let Some(Value::Object(opts)) = parts.get(2) else {
                return false;
            };
            let Some(selected) = opts.get(key) else {
                return false;
            };
            let mut marked = String::new();
            if !write_marked(selected, rest, &mut marked) {
                return false;
            }

            out.push('[');
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                if i == 2 {
                    out.push('{');
                    for (j, (k, v)) in opts.iter().enumerate() {
                        if j > 0 {
                            out.push(',');
                        }
                        out.push('"');
                        out.push_str(k);
                        out.push_str("\":");
                        if k == key {
                            out.push_str(&marked);
                        } else {
                            out.push_str(&v.to_string());
                        }
                    }
                    out.push('}');
                } else {
                    out.push_str(&part.to_string());
                }
            }
            out.push(']');
            true
        }
    }
}
