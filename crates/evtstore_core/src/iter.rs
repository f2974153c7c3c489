//! Lazy iterators over stored records.

use crate::containers::AttributeContainer;
use crate::dir::ContainerDir;
use crate::error::{CoreError, CoreResult};
use crate::layout::{Layout, StreamKind};
use crate::serializer::SerializationFormat;
use crate::stream::DataStream;
use std::marker::PhantomData;

/// Largest unframed legacy analysis report.
pub const MAXIMUM_LEGACY_REPORT_SIZE: usize = 24 * 1024 * 1024;

/// Iterator over every record in data streams `1..next_stream_number` of
/// one kind, in stream order.
///
/// Streams are opened one at a time. A missing stream in the range yields
/// a `MissingStream` error, after which the iterator is exhausted.
#[derive(Debug)]
pub struct ContainerIter<'a, T> {
    dir: &'a ContainerDir,
    layout: Layout,
    format: SerializationFormat,
    kind: StreamKind,
    next_stream_number: u32,
    end_stream_number: u32,
    unframed: bool,
    current: Option<DataStream>,
    done: bool,
    _record: PhantomData<fn() -> T>,
}

impl<'a, T: AttributeContainer> ContainerIter<'a, T> {
    pub(crate) fn new(
        dir: &'a ContainerDir,
        layout: Layout,
        format: SerializationFormat,
        kind: StreamKind,
        end_stream_number: u32,
    ) -> Self {
        Self {
            dir,
            layout,
            format,
            kind,
            next_stream_number: 1,
            end_stream_number,
            unframed: layout.is_legacy() && kind == StreamKind::AnalysisReportData,
            current: None,
            done: false,
            _record: PhantomData,
        }
    }

    fn next_record(&mut self) -> CoreResult<Option<T>> {
        loop {
            if let Some(stream) = self.current.as_mut() {
                if self.unframed {
                    let data = stream.read_unframed(MAXIMUM_LEGACY_REPORT_SIZE)?;
                    self.current = None;
                    return self.format.deserialize(&data).map(Some);
                }
                if let Some(data) = stream.read_entry()? {
                    return self.format.deserialize(&data).map(Some);
                }
                self.current = None;
            }

            if self.next_stream_number >= self.end_stream_number {
                return Ok(None);
            }
            let name = self.layout.stream_name(self.kind, self.next_stream_number);
            self.next_stream_number += 1;
            if !self.dir.has_member(&name) {
                return Err(CoreError::missing_stream(name));
            }
            self.current = Some(DataStream::open(self.dir, &name)?);
        }
    }
}

impl<T: AttributeContainer> Iterator for ContainerIter<'_, T> {
    type Item = CoreResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                self.current = None;
                Some(Err(err))
            }
        }
    }
}

/// Reads the single record of a marker stream such as `session_start.N`.
pub(crate) fn read_marker<T: AttributeContainer>(
    dir: &ContainerDir,
    format: SerializationFormat,
    name: &str,
) -> CoreResult<T> {
    let mut stream = DataStream::open(dir, name)?;
    let data = stream.read_entry()?.ok_or_else(|| {
        CoreError::malformed_stream(name, format!("empty {} marker", T::CONTAINER_TYPE))
    })?;
    format.deserialize(&data)
}
