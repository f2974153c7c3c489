//! Property-based test generators using proptest.
//!
//! Timestamps are drawn from a narrow range so that generated batches carry
//! duplicate timestamps, which exercises the merge reader's tie-breaking.

use evtstore_core::{
    AnalysisReport, AttributeValue, Event, EventSource, EventTag, ExtractionError, TimeRange,
};
use proptest::prelude::*;

/// Upper bound (exclusive) of generated timestamps.
pub const MAXIMUM_TEST_TIMESTAMP: i64 = 500;

/// Strategy for event timestamps.
pub fn timestamp_strategy() -> impl Strategy<Value = i64> {
    0..MAXIMUM_TEST_TIMESTAMP
}

/// Strategy for inclusive time ranges within the generated timestamps.
pub fn time_range_strategy() -> impl Strategy<Value = TimeRange> {
    (timestamp_strategy(), timestamp_strategy()).prop_map(|(a, b)| {
        TimeRange::new(a.min(b), a.max(b)).expect("Ordered bounds form a valid range")
    })
}

/// Strategy for attribute values, nested at most one level.
pub fn attribute_value_strategy() -> impl Strategy<Value = AttributeValue> {
    let leaf = prop_oneof![
        any::<bool>().prop_map(AttributeValue::Bool),
        any::<i64>().prop_map(AttributeValue::Integer),
        "[a-zA-Z0-9 /._-]{0,24}".prop_map(AttributeValue::Text),
    ];
    leaf.prop_recursive(1, 8, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(AttributeValue::List)
    })
}

/// Strategy for events with random timestamps and attributes.
pub fn event_strategy() -> impl Strategy<Value = Event> {
    (
        timestamp_strategy(),
        "[a-z]{2,8}:[a-z]{2,8}",
        prop::option::of("[a-z_]{3,12}"),
        prop::collection::btree_map("[a-z_]{1,10}", attribute_value_strategy(), 0..4),
    )
        .prop_map(|(timestamp, data_type, parser, attributes)| {
            let mut event = Event::new(timestamp, data_type);
            event.parser = parser;
            event.attributes = attributes;
            event
        })
}

/// Strategy for a batch of events.
pub fn event_batch_strategy(max_len: usize) -> impl Strategy<Value = Vec<Event>> {
    prop::collection::vec(event_strategy(), 0..max_len)
}

/// Strategy for event sources.
pub fn event_source_strategy() -> impl Strategy<Value = EventSource> {
    (
        "(file_entry|directory|volume)",
        "(/[a-z0-9]{1,8}){1,4}",
        prop::option::of("(file|directory|link)"),
    )
        .prop_map(|(data_type, path_spec, file_entry_type)| {
            let mut event_source = EventSource::new(data_type, path_spec);
            event_source.file_entry_type = file_entry_type;
            event_source
        })
}

/// Strategy for extraction errors.
pub fn extraction_error_strategy() -> impl Strategy<Value = ExtractionError> {
    (
        "[a-zA-Z ]{1,40}",
        prop::option::of("[a-z_]{3,10}(/[a-z_]{3,10})?"),
        prop::option::of("(/[a-z0-9]{1,8}){1,3}"),
    )
        .prop_map(|(message, parser_chain, path_spec)| {
            let mut error = ExtractionError::new(message);
            error.parser_chain = parser_chain;
            error.path_spec = path_spec;
            error
        })
}

/// Strategy for event tags identifying their event by UUID or position.
pub fn event_tag_strategy() -> impl Strategy<Value = EventTag> {
    let base = prop_oneof![
        "[0-9a-f]{32}".prop_map(EventTag::for_uuid),
        (1u32..8, 0u32..64).prop_map(|(number, index)| EventTag::for_position(number, index)),
    ];
    (
        base,
        prop::collection::vec("[a-z_]{3,12}", 0..4),
        prop::option::of("[a-zA-Z .]{0,30}"),
    )
        .prop_map(|(mut tag, labels, comment)| {
            tag.add_labels(labels);
            tag.comment = comment;
            tag
        })
}

/// Strategy for analysis reports.
pub fn analysis_report_strategy() -> impl Strategy<Value = AnalysisReport> {
    (
        "[a-z_]{3,16}",
        prop::option::of("[a-zA-Z0-9 \n]{0,80}"),
        any::<i64>(),
    )
        .prop_map(|(plugin_name, text, time_compiled)| {
            let mut report = AnalysisReport::new(plugin_name);
            report.text = text;
            report.time_compiled = time_compiled;
            report
        })
}
