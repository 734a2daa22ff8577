//! W3C trace context propagation.
//!
//! Engines read the last `traceparent` header of an input record, start a
//! child span for the work done on it, and write the child's `traceparent`
//! onto every output record. Records without a valid header start a new
//! trace.

use std::fmt;

use rand::Rng;

use crate::record::Record;

/// Header carrying the trace context.
pub const TRACEPARENT_HEADER: &str = "traceparent";

const VERSION: &str = "00";
const SAMPLED: u8 = 0x01;

/// A parsed `traceparent` value: `00-{trace id}-{span id}-{flags}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: u128,
    span_id: u64,
    flags: u8,
}

impl TraceContext {
    /// Starts a new sampled trace with random ids.
    #[must_use]
    pub fn new_root() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            trace_id: non_zero(|| rng.gen::<u128>()),
            span_id: non_zero(|| rng.gen::<u64>()),
            flags: SAMPLED,
        }
    }

    /// Parses a `traceparent` header value.
    ///
    /// Returns `None` for anything that is not a version `00` context with
    /// non-zero ids.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let (version, trace, span, flags) =
            (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || version != VERSION {
            return None;
        }
        if trace.len() != 32 || span.len() != 16 || flags.len() != 2 {
            return None;
        }
        let trace_id = u128::from_str_radix(trace, 16).ok()?;
        let span_id = u64::from_str_radix(span, 16).ok()?;
        let flags = u8::from_str_radix(flags, 16).ok()?;
        if trace_id == 0 || span_id == 0 {
            return None;
        }
        Some(Self {
            trace_id,
            span_id,
            flags,
        })
    }

    /// Extracts the context from the last `traceparent` header of a record.
    #[must_use]
    pub fn from_record(record: &Record) -> Option<Self> {
        record
            .get_last_header(TRACEPARENT_HEADER)
            .ok()
            .flatten()
            .and_then(|v| Self::parse(&v))
    }

    /// Continues the trace of `record`, or starts a new one.
    #[must_use]
    pub fn continue_from(record: &Record) -> Self {
        Self::from_record(record).map_or_else(Self::new_root, |parent| parent.child())
    }

    /// A new span in the same trace.
    #[must_use]
    pub fn child(&self) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            trace_id: self.trace_id,
            span_id: non_zero(|| rng.gen::<u64>()),
            flags: self.flags,
        }
    }

    /// The 32 hex digit trace id.
    #[must_use]
    pub fn trace_id(&self) -> String {
        format!("{:032x}", self.trace_id)
    }

    /// The 16 hex digit span id.
    #[must_use]
    pub fn span_id(&self) -> String {
        format!("{:016x}", self.span_id)
    }

    /// Renders the `traceparent` header value.
    #[must_use]
    pub fn to_traceparent(&self) -> String {
        self.to_string()
    }
}

fn non_zero<T: Default + PartialEq>(mut next: impl FnMut() -> T) -> T {
    loop {
        let v = next();
        if v != T::default() {
            return v;
        }
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{VERSION}-{:032x}-{:016x}-{:02x}",
            self.trace_id, self.span_id, self.flags
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Header;

    const PARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn test_parse_and_render() {
        let ctx = TraceContext::parse(PARENT).unwrap();
        assert_eq!(ctx.trace_id(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(ctx.span_id(), "00f067aa0ba902b7");
        assert_eq!(ctx.to_traceparent(), PARENT);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(TraceContext::parse("").is_none());
        assert!(TraceContext::parse("01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01").is_none());
        assert!(TraceContext::parse("00-00000000000000000000000000000000-00f067aa0ba902b7-01").is_none());
        assert!(TraceContext::parse("00-4bf92f3577b34da6-00f067aa0ba902b7-01").is_none());
        assert!(TraceContext::parse(&format!("{PARENT}-extra")).is_none());
    }

    #[test]
    fn test_child_keeps_trace() {
        let parent = TraceContext::parse(PARENT).unwrap();
        let child = parent.child();
        assert_eq!(child.trace_id(), parent.trace_id());
        assert_ne!(child.span_id(), parent.span_id());
    }

    #[test]
    fn test_continue_from_uses_last_header() {
        let record = Record::new(
            vec![
                Header::new(TRACEPARENT_HEADER, "garbage"),
                Header::new(TRACEPARENT_HEADER, PARENT),
            ],
            None::<String>,
            "v",
        );
        let ctx = TraceContext::continue_from(&record);
        assert_eq!(ctx.trace_id(), "4bf92f3577b34da6a3ce929d0e0e4736");

        let fresh = TraceContext::continue_from(&Record::default());
        assert_eq!(TraceContext::parse(&fresh.to_traceparent()), Some(fresh));
    }
}
