//! Headers engines add to the records they write.

use uuid::Uuid;

use crate::labels::SECURITY_LABEL_HEADER;
use crate::record::{Header, Record};
use crate::trace::{TraceContext, TRACEPARENT_HEADER};

/// Id of the action that produced a record.
pub const EXEC_PATH_HEADER: &str = "Exec-Path";
/// Unique id of a record: `{sink name}:{uuid}`.
pub const REQUEST_ID_HEADER: &str = "Request-Id";
/// `Request-Id` of the record an output was derived from.
pub const INPUT_REQUEST_ID_HEADER: &str = "Input-Request-Id";
/// Dataset title, set by adapters.
pub const DATA_SOURCE_NAME_HEADER: &str = "Data-Source-Name";
/// Dataset MIME type, set by adapters.
pub const DATA_SOURCE_TYPE_HEADER: &str = "Data-Source-Type";
/// Content type of the record value.
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";

/// A fresh request id for a record written to `sink_name`.
#[must_use]
pub fn request_id(sink_name: &str) -> String {
    format!("{sink_name}:{}", Uuid::new_v4())
}

/// Adds the lineage headers a mapper puts on each output of `input`.
///
/// Every output gets its own `Request-Id`; outputs of the same input share
/// the `Input-Request-Id` and the span in `traceparent`.
#[must_use]
pub fn enrich_output(
    output: &Record,
    input_request_id: Option<&str>,
    exec_path: &str,
    sink_name: &str,
    trace: &TraceContext,
) -> Record {
    let mut headers = Vec::with_capacity(4);
    if let Some(id) = input_request_id {
        headers.push(Header::new(INPUT_REQUEST_ID_HEADER, id));
    }
    headers.push(Header::new(REQUEST_ID_HEADER, request_id(sink_name)));
    headers.push(Header::new(EXEC_PATH_HEADER, exec_path));
    headers.push(Header::new(TRACEPARENT_HEADER, trace.to_traceparent()));
    output.add_headers(headers)
}

/// Copies every `Security-Label` of `input` onto `output`, unless `output`
/// already carries one.
#[must_use]
pub fn persist_security_labels(input: &Record, output: Record) -> Record {
    if output.has_header(SECURITY_LABEL_HEADER) || !input.has_header(SECURITY_LABEL_HEADER) {
        return output;
    }
    let labels: Vec<Header> = input
        .headers()
        .iter()
        .filter(|h| h.matches(SECURITY_LABEL_HEADER))
        .map(|h| Header {
            key: SECURITY_LABEL_HEADER.to_string(),
            value: h.value.clone(),
        })
        .collect();
    output.add_headers(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> Record {
        Record::new(
            vec![
                Header::new(REQUEST_ID_HEADER, "in:1"),
                Header::new("security-label", "a"),
                Header::new(SECURITY_LABEL_HEADER, "b"),
            ],
            None::<String>,
            "v",
        )
    }

    #[test]
    fn test_request_id_format() {
        let id = request_id("knowledge");
        let (sink, uuid) = id.split_once(':').unwrap();
        assert_eq!(sink, "knowledge");
        assert!(Uuid::parse_str(uuid).is_ok());
    }

    #[test]
    fn test_enrich_output() {
        let trace = TraceContext::new_root();
        let out = enrich_output(&Record::default(), Some("in:1"), "Mapper-x", "out", &trace);
        assert_eq!(out.get_last_header(INPUT_REQUEST_ID_HEADER).unwrap().as_deref(), Some("in:1"));
        assert!(out.get_last_header(REQUEST_ID_HEADER).unwrap().unwrap().starts_with("out:"));
        assert_eq!(out.get_last_header(EXEC_PATH_HEADER).unwrap().as_deref(), Some("Mapper-x"));
        assert_eq!(
            out.get_last_header(TRACEPARENT_HEADER).unwrap(),
            Some(trace.to_traceparent())
        );

        let bare = enrich_output(&Record::default(), None, "Mapper-x", "out", &trace);
        assert!(!bare.has_header(INPUT_REQUEST_ID_HEADER));
    }

    #[test]
    fn test_persist_security_labels() {
        let out = persist_security_labels(&input(), Record::default());
        assert_eq!(
            out.get_headers(SECURITY_LABEL_HEADER).unwrap(),
            vec![Some("a".to_string()), Some("b".to_string())]
        );

        let own = Record::default().add_header(SECURITY_LABEL_HEADER, "mine");
        let out = persist_security_labels(&input(), own);
        assert_eq!(
            out.get_headers(SECURITY_LABEL_HEADER).unwrap(),
            vec![Some("mine".to_string())]
        );

        let out = persist_security_labels(&Record::default(), Record::default());
        assert!(out.headers().is_empty());
    }
}
