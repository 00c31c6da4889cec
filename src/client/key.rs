use std::fmt::{self, Write as _};
use std::sync::Arc;

use serde_json::Value;

/// Sentinel used in place of "no arguments".
pub const NO_ARGS: &str = "void";

/// Identifies one cache slot: an endpoint name plus its canonicalized
/// arguments, rendered as `endpoint(args)`.
///
/// Two argument values that are deep-equal produce the same key regardless of
/// object member order. Object members set to `null` are ignored, and `null` or
/// an empty object at the top level collapse to [`NO_ARGS`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    #[must_use]
    pub fn new(endpoint: &str, args: &Value) -> Self {
        let mut key = String::with_capacity(endpoint.len() + 2);
        key.push_str(endpoint);
        key.push('(');
        if is_no_args(args) {
            key.push_str(NO_ARGS);
        } else {
            write_canonical(&mut key, args);
        }
        key.push(')');
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the endpoint part of the key.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.0.split_once('(').map_or(&self.0, |(name, _)| name)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_no_args(args: &Value) -> bool {
    match args {
        Value::Null => true,
        Value::Object(map) => map.values().all(Value::is_null),
        _ => false,
    }
}

/// Writes `value` as compact JSON with object members sorted by name and
/// `null` members dropped.
fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut members: Vec<_> = map.iter().filter(|(_, v)| !v.is_null()).collect();
            members.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));

            out.push('{');
            for (i, (name, member)) in members.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_scalar(out, &Value::String(name.clone()));
                out.push(':');
                write_canonical(out, member);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        scalar => write_scalar(out, scalar),
    }
}

fn write_scalar(out: &mut String, value: &Value) {
    // Display on a scalar `Value` is its compact JSON form.
    let _ = write!(out, "{value}");
}
