mod fixtures;

use evtx2json::{EvtxChunkData, EvtxParser, ParserSettings};
use fixtures::*;
use pretty_assertions::assert_eq;

#[test]
fn test_parses_a_clean_multi_chunk_file() {
    ensure_env_logger_initialized();
    let mut parser = EvtxParser::from_buffer(three_chunk_file()).unwrap();

    let mut records = parser.records_json();
    let ids: Vec<u64> = records.by_ref().map(|r| r.event_record_id).collect();
    let stats = records.stats();

    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(stats.processed, 6);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.corrupt_chunks, 0);
}

#[test]
fn test_record_ids_are_strictly_increasing() {
    ensure_env_logger_initialized();
    let mut parser = EvtxParser::from_buffer(three_chunk_file()).unwrap();

    let ids: Vec<u64> = parser.records().map(|r| r.event_record_id).collect();
    for window in ids.windows(2) {
        assert!(window[0] < window[1], "ids must be strictly increasing");
    }
}

#[test]
fn test_timestamps_are_decoded() {
    ensure_env_logger_initialized();
    let mut parser = EvtxParser::from_buffer(three_chunk_file()).unwrap();

    for record in parser.records() {
        let timestamp = record.timestamp.expect("every record carries a FILETIME");
        assert!(evtx2json::format_timestamp(&timestamp).starts_with("2020-01-01T"));
    }
}

#[test]
fn test_json_projection_shape() {
    ensure_env_logger_initialized();
    let file = build_file(&[vec![
        RecordSpec::new(1, "Event", "hello").with_attribute("Level", "4"),
        RecordSpec::new(2, "Event", "world"),
    ]]);
    let mut parser = EvtxParser::from_buffer(file).unwrap();

    let documents: Vec<serde_json::Value> =
        parser.records_json_value().map(|r| r.data).collect();

    assert_eq!(
        documents,
        vec![
            serde_json::json!({
                "Event": { "#attributes": { "Level": "4" }, "#text": "hello" }
            }),
            serde_json::json!({ "Event": "world" }),
        ]
    );
}

#[test]
fn test_xml_projection_contains_names_and_text() {
    ensure_env_logger_initialized();
    let file = build_file(&[vec![
        RecordSpec::new(1, "Provider", "payload <escaped>").with_attribute("Name", "Security"),
    ]]);
    let mut parser = EvtxParser::from_buffer(file).unwrap();

    let xml = parser.records().next().unwrap().data;

    assert!(xml.contains("<Provider Name=\"Security\">"), "got: {xml}");
    assert!(xml.contains("payload &lt;escaped&gt;"), "got: {xml}");
    assert!(xml.contains("</Provider>"), "got: {xml}");
}

#[test]
fn test_tree_round_trips_names_exactly() {
    ensure_env_logger_initialized();
    // Names and values with non-ASCII content must survive byte-for-byte.
    let element = "Übersicht_Данные";
    let attribute_value = "tab\tand \"quotes\"";
    let file = build_file(&[vec![
        RecordSpec::new(1, element, "Tëxt").with_attribute("Name", attribute_value),
    ]]);
    let mut parser = EvtxParser::from_buffer(file).unwrap();

    let tree = parser.records_tree().next().unwrap().data;
    let evtx2json::XmlContent::Element(node) = &tree.roots[0] else {
        panic!("expected an element root");
    };

    assert_eq!(node.name, element);
    assert_eq!(node.attribute("Name"), Some(attribute_value));
    assert_eq!(node.text(), "Tëxt");
}

#[test]
fn test_decoding_is_idempotent() {
    ensure_env_logger_initialized();
    let buffer = three_chunk_file();

    let first_pass: Vec<(u64, String)> = EvtxParser::from_buffer(buffer.clone())
        .unwrap()
        .records_json()
        .map(|r| (r.event_record_id, r.data))
        .collect();
    let second_pass: Vec<(u64, String)> = EvtxParser::from_buffer(buffer)
        .unwrap()
        .records_json()
        .map(|r| (r.event_record_id, r.data))
        .collect();

    assert_eq!(first_pass, second_pass);
}

#[test]
fn test_single_threaded_matches_parallel() {
    ensure_env_logger_initialized();
    let buffer = three_chunk_file();

    let sequential: Vec<u64> = EvtxParser::from_buffer(buffer.clone())
        .unwrap()
        .with_configuration(ParserSettings::new().num_threads(1))
        .records()
        .map(|r| r.event_record_id)
        .collect();
    let parallel: Vec<u64> = EvtxParser::from_buffer(buffer)
        .unwrap()
        .with_configuration(ParserSettings::new().num_threads(8))
        .records()
        .map(|r| r.event_record_id)
        .collect();

    assert_eq!(sequential, parallel);
}

#[test]
fn test_chunk_level_api() {
    ensure_env_logger_initialized();
    let chunk_buffer = build_chunk(&[
        RecordSpec::new(7, "Event", "a"),
        RecordSpec::new(8, "Event", "b"),
    ]);

    let chunk_data = EvtxChunkData::new(chunk_buffer).unwrap();
    assert!(chunk_data.validate_header_checksum());
    assert!(chunk_data.validate_data_checksum());
    assert_eq!(chunk_data.header.first_event_record_id, 7);
    assert_eq!(chunk_data.header.last_event_record_id, 8);

    let settings = ParserSettings::default();
    let chunk = chunk_data.parse(&settings);
    assert!(chunk.trusted);

    let mut iter = chunk.records();
    let ids: Vec<u64> = iter.by_ref().map(|r| r.event_record_id).collect();
    assert_eq!(ids, vec![7, 8]);
    assert_eq!(iter.skipped(), 0);
}

#[test]
fn test_template_records_share_a_cached_definition() {
    ensure_env_logger_initialized();
    let chunk = build_template_chunk("Message", ("alpha", "beta"));
    let mut parser = EvtxParser::from_buffer(build_file_from_chunks(&[chunk])).unwrap();

    let mut records = parser.records_json_value();
    let documents: Vec<(u64, serde_json::Value)> = records
        .by_ref()
        .map(|r| (r.event_record_id, r.data))
        .collect();
    let stats = records.stats();

    assert_eq!(
        documents,
        vec![
            (1, serde_json::json!({ "Message": "alpha" })),
            (2, serde_json::json!({ "Message": "beta" })),
        ],
        "both instances must expand through the shared definition"
    );
    assert_eq!(stats.skipped, 0);
}

#[test]
fn test_record_count_matches_chunk_headers() {
    ensure_env_logger_initialized();
    let buffer = three_chunk_file();

    // Count implied by the chunk headers: sum of last - first + 1.
    let mut implied = 0u64;
    for chunk_number in 0..3 {
        let start = FILE_HEADER_SIZE + chunk_number * CHUNK_SIZE;
        let chunk = EvtxChunkData::new(buffer[start..start + CHUNK_SIZE].to_vec()).unwrap();
        implied +=
            chunk.header.last_event_record_number - chunk.header.first_event_record_number + 1;
    }

    let mut parser = EvtxParser::from_buffer(buffer).unwrap();
    let decoded = parser.records().count() as u64;

    assert_eq!(decoded, implied);
}
