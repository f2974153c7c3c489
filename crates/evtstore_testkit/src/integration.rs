//! End-to-end helpers and tests across writers, readers and task merges.

use evtstore_core::{
    ContainerDir, CoreResult, DataStream, Event, Layout, OffsetTable, SerializationFormat,
    StorageWriter, StreamKind, Task,
};
use std::path::Path;

/// Runs a task: creates its container, writes `events` between the task
/// markers, closes it and prepares it for merge.
pub fn run_task(session_writer: &StorageWriter, events: &[Event]) -> CoreResult<Task> {
    let task = Task::new(session_writer.session().identifier.clone());
    let mut task_writer = session_writer.create_task_storage(task.clone())?;
    task_writer.write_task_start()?;
    for event in events {
        task_writer.add_event(event)?;
    }
    task_writer.write_task_completion()?;
    task_writer.close()?;
    session_writer.prepare_merge_task_storage(&task)?;
    Ok(task)
}

/// Checks that every offset table entry of every event stream addresses the
/// record at the same position when the stream is read front to back.
///
/// Returns the number of records checked.
pub fn verify_event_offsets(path: &Path, format: SerializationFormat) -> CoreResult<usize> {
    let dir = ContainerDir::open(path, false)?;
    let layout = Layout::default();
    let mut checked = 0;

    for stream_number in dir.stream_numbers(layout, StreamKind::EventData)? {
        let data_name = layout.stream_name(StreamKind::EventData, stream_number);
        let offsets = OffsetTable::read(
            &dir,
            &layout.stream_name(StreamKind::EventIndex, stream_number),
        )?;

        let mut sequential = DataStream::open(&dir, &data_name)?;
        let mut positioned = DataStream::open(&dir, &data_name)?;
        for (index, offset) in offsets.values().iter().enumerate() {
            let expected = sequential.read_entry()?;
            let entry_index = u32::try_from(index).unwrap_or(u32::MAX);
            positioned.seek_entry_at_offset(entry_index, u64::from(*offset))?;
            let actual = positioned.read_entry()?;
            assert_eq!(actual, expected, "entry {index} of {data_name}");

            if let Some(data) = actual {
                let _: Event = format.deserialize(&data)?;
            }
            checked += 1;
        }
        assert_eq!(sequential.read_entry()?, None, "{data_name} has unindexed entries");
    }
    Ok(checked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{event, position_tag, uuid_tag, TestContainer};
    use crate::generators::{event_batch_strategy, time_range_strategy};
    use evtstore_core::{Config, CoreError, StorageReader, TimeRange};
    use proptest::prelude::*;

    fn keys(events: &[Event]) -> Vec<(i64, String)> {
        events
            .iter()
            .map(|event| (event.timestamp, event.uuid.clone()))
            .collect()
    }

    fn small_buffer() -> Config {
        Config::new().maximum_buffer_size(1024)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn events_are_read_in_order(
            batches in prop::collection::vec(event_batch_strategy(40), 1..4),
        ) {
            let container = TestContainer::with_config(small_buffer());
            let mut written = 0;
            for batch in &batches {
                container.write(batch);
                written += batch.len();
            }

            let timestamps = container.read_timestamps(None);
            prop_assert_eq!(timestamps.len(), written);
            prop_assert!(timestamps.windows(2).all(|pair| pair[0] <= pair[1]));
        }

        #[test]
        fn range_filter_matches_unfiltered_subset(
            batch in event_batch_strategy(80),
            range in time_range_strategy(),
        ) {
            let container = TestContainer::with_config(small_buffer());
            container.write(&batch);

            let all = container.read_events(None);
            let expected: Vec<_> = keys(&all)
                .into_iter()
                .filter(|(timestamp, _)| range.contains(*timestamp))
                .collect();
            let filtered = container.read_events(Some(range));
            prop_assert_eq!(keys(&filtered), expected);
        }

        #[test]
        fn reads_are_repeatable(batch in event_batch_strategy(60)) {
            let container = TestContainer::with_config(small_buffer());
            container.write(&batch);

            let first = keys(&container.read_events(None));
            let second = keys(&container.read_events(None));
            prop_assert_eq!(first, second);
        }

        #[test]
        fn offset_tables_address_their_records(batch in event_batch_strategy(60)) {
            let container = TestContainer::with_config(small_buffer());
            container.write(&batch);
            let checked =
                verify_event_offsets(container.path(), SerializationFormat::Json).unwrap();
            prop_assert_eq!(checked, batch.len());
        }
    }

    #[test]
    fn events_sorted_after_reopen() {
        let container = TestContainer::new();
        container.write_events(&[50, 10, 30]);
        assert_eq!(container.read_timestamps(None), vec![10, 30, 50]);
    }

    #[test]
    fn equal_timestamps_break_ties_by_stream_then_index() {
        let container = TestContainer::new();
        let first = container.write_events(&[5, 5]);
        let second = container.write_events(&[5, 1]);

        let events = container.read_events(None);
        let order: Vec<_> = events
            .iter()
            .map(|event| (event.store_number, event.store_index))
            .collect();
        assert_eq!(
            order,
            vec![
                (Some(2), Some(0)),
                (Some(1), Some(0)),
                (Some(1), Some(1)),
                (Some(2), Some(1)),
            ]
        );
        assert_eq!(events[0].uuid, second[1].uuid);
        assert_eq!(events[1].uuid, first[0].uuid);
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let container = TestContainer::new();
        container.write_events(&[1, 2, 3, 4, 5]);
        container.write_events(&[3, 6]);

        let range = TimeRange::new(2, 4).unwrap();
        assert_eq!(container.read_timestamps(Some(range)), vec![2, 3, 3, 4]);

        let empty = TimeRange::new(7, 9).unwrap();
        assert!(container.read_timestamps(Some(empty)).is_empty());
    }

    #[test]
    fn position_tag_lookup() {
        let container = TestContainer::new();
        let mut writer = container.session_writer();
        writer.add_event(&event(10)).unwrap();
        writer
            .add_event_tag(&position_tag(1, 0, &["suspicious"]))
            .unwrap();
        writer.close().unwrap();

        let mut reader = container.reader();
        let tag = reader.get_event_tag(1, 0, None).unwrap().unwrap();
        assert_eq!(tag.labels, vec!["suspicious"]);
        assert!(reader.get_event_tag(9, 9, None).unwrap().is_none());
    }

    #[test]
    fn tags_merge_across_writer_sessions() {
        let container = TestContainer::new();
        let events = container.write_events(&[1, 2]);
        let uuid = events[1].uuid.clone();

        let mut writer = container.session_writer();
        writer.add_event_tags(&[uuid_tag(&uuid, &["first"])]).unwrap();
        writer.close().unwrap();

        let mut writer = container.session_writer();
        writer
            .add_event_tags(&[uuid_tag(&uuid, &["second", "first"])])
            .unwrap();
        writer.close().unwrap();

        let tagged: Vec<_> = container
            .read_events(None)
            .into_iter()
            .filter_map(|event| event.tag)
            .collect();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].labels, vec!["first", "second"]);
    }

    #[test]
    fn merge_task_into_session() {
        let container = TestContainer::new();
        let mut writer = container.session_writer();
        writer.write_session_start().unwrap();
        writer.start_task_storage().unwrap();

        let events: Vec<Event> = [40, 20, 50, 10, 30].into_iter().map(event).collect();
        let task = run_task(&writer, &events).unwrap();
        let merge_path = writer.merge_task_storage_path(&task).unwrap();
        assert!(writer.check_task_storage_ready_for_merge(&task).unwrap());

        assert!(writer.merge_task_storage(&task).unwrap());
        assert!(!merge_path.exists());
        assert!(!writer.check_task_storage_ready_for_merge(&task).unwrap());

        writer.stop_task_storage(false).unwrap();
        writer.write_session_completion().unwrap();
        writer.close().unwrap();

        let read = container.read_events(None);
        assert_eq!(
            read.iter().map(|event| event.timestamp).collect::<Vec<_>>(),
            vec![10, 20, 30, 40, 50]
        );
        let mut expected = keys(&events);
        expected.sort();
        let mut actual = keys(&read);
        actual.sort();
        assert_eq!(actual, expected);
    }

    #[test]
    fn merge_replays_every_record_kind() {
        let container = TestContainer::new();
        let mut writer = container.session_writer();
        writer.start_task_storage().unwrap();

        let task = Task::new(writer.session().identifier.clone());
        let mut task_writer = writer.create_task_storage(task.clone()).unwrap();
        let tagged = event(7);
        task_writer.add_event(&tagged).unwrap();
        task_writer
            .add_event_source(&evtstore_core::EventSource::new("file_entry", "/x"))
            .unwrap();
        task_writer
            .add_error(&evtstore_core::ExtractionError::new("unreadable"))
            .unwrap();
        task_writer
            .add_event_tag(&uuid_tag(&tagged.uuid, &["merged"]))
            .unwrap();
        task_writer
            .add_analysis_report(&evtstore_core::AnalysisReport::new("counter"))
            .unwrap();
        task_writer.close().unwrap();

        writer.prepare_merge_task_storage(&task).unwrap();
        assert!(writer.merge_task_storage(&task).unwrap());
        writer.stop_task_storage(false).unwrap();
        writer.close().unwrap();

        let mut reader = StorageReader::open(container.path()).unwrap();
        assert_eq!(reader.get_number_of_event_sources().unwrap(), 1);
        assert_eq!(reader.get_errors().unwrap().count(), 1);
        assert_eq!(reader.get_analysis_reports().unwrap().count(), 1);
        assert!(reader.has_event_tags().unwrap());
        let events: Vec<Event> = reader
            .get_events(None)
            .unwrap()
            .collect::<CoreResult<_>>()
            .unwrap();
        assert_eq!(events[0].tag.as_ref().unwrap().labels, vec!["merged"]);
    }

    #[test]
    fn flush_threshold_produces_one_stream_per_overflow() {
        let container = TestContainer::with_config(Config::new().maximum_buffer_size(4096));
        let events: Vec<Event> = (0..200).map(event).collect();
        container.write(&events);

        let data_streams = container
            .members()
            .into_iter()
            .filter(|name| name.starts_with("event_data."))
            .count();
        assert!(data_streams > 1);
        assert_eq!(
            verify_event_offsets(container.path(), SerializationFormat::Json).unwrap(),
            200
        );
        assert_eq!(container.read_timestamps(None), (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn cbor_containers() {
        let config = Config::new().serialization_format(SerializationFormat::Cbor);
        let container = TestContainer::with_config(config);
        container.write_events(&[3, 1, 2]);

        let reader = container.reader();
        assert_eq!(reader.serialization_format(), Some(SerializationFormat::Cbor));
        reader.close().unwrap();
        assert_eq!(container.read_timestamps(None), vec![1, 2, 3]);
        assert_eq!(
            verify_event_offsets(container.path(), SerializationFormat::Cbor).unwrap(),
            3
        );
    }

    #[test]
    fn missing_event_stream_is_reported() {
        let container = TestContainer::new();
        container.write_events(&[1]);
        container.write_events(&[2]);
        std::fs::remove_file(container.path().join("event_data.000001")).unwrap();

        let mut reader = container.reader();
        let result = reader.get_events(None).map(|events| events.count());
        assert!(matches!(result, Err(CoreError::MissingStream { .. })));
    }
}
