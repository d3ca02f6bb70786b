use completion_api::{decode_record, RecordError, RecordSplitter, StreamRecord};

fn decode_all(payload: &str) -> Vec<Result<StreamRecord, RecordError>> {
    RecordSplitter::split_all(payload.as_bytes())
        .iter()
        .map(|record| decode_record(record))
        .collect()
}

#[test]
fn records_decode_deltas_blanks_and_sentinel() {
    let payload = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: [DONE]\n\n",
    );

    let decoded: Vec<StreamRecord> = decode_all(payload)
        .into_iter()
        .map(|record| record.expect("valid record"))
        .collect();

    assert_eq!(
        decoded,
        vec![
            StreamRecord::Delta("Hel".to_string()),
            StreamRecord::Blank,
            StreamRecord::Delta("lo".to_string()),
            StreamRecord::Blank,
            StreamRecord::Done,
            StreamRecord::Blank,
        ]
    );
}

#[test]
fn records_report_malformed_and_content_less_payloads() {
    let payload = concat!(
        "data: {broken-json\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n",
        "data: {\"choices\":[{\"delta\":{\"content\":null}}]}\n",
        ": ok\n",
        "ok\n",
    );

    let decoded = decode_all(payload);
    assert!(matches!(decoded[0], Err(RecordError::MalformedJson(_))));
    assert!(matches!(decoded[1], Err(RecordError::MissingContent)));
    assert!(matches!(decoded[2], Err(RecordError::MissingContent)));
    assert!(matches!(decoded[3], Err(RecordError::Comment)));
    assert!(matches!(decoded[4], Err(RecordError::MissingFramingMarker)));
}

#[test]
fn framing_marker_is_positional_not_literal() {
    let record = br#"event:{"choices":[{"delta":{"content":"x"}}]}"#;
    assert_eq!(
        decode_record(record).expect("payload after six characters"),
        StreamRecord::Delta("x".to_string())
    );
}

#[test]
fn splitter_keeps_incomplete_trailing_bytes() {
    let mut splitter = RecordSplitter::default();
    assert!(splitter.feed(b"data: {\"choices\"").is_empty());
    assert!(!splitter.is_empty_buffer());
    assert_eq!(
        splitter.finish().as_deref(),
        Some(b"data: {\"choices\"".as_slice())
    );
    assert!(splitter.is_empty_buffer());
}
