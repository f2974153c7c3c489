//! Stream and table members.
//!
//! - [`DataStream`] / [`DataStreamWriter`] - length-prefixed record streams
//! - [`OffsetTable`] / [`TimestampTable`] - fixed-width tables paired with a
//!   data stream
//! - [`TagIndexTable`] - locates tag records by event identifier

mod data;
mod table;
mod tag_index;

pub use data::{DataStream, DataStreamWriter, ENTRY_HEADER_SIZE, MAXIMUM_ENTRY_SIZE};
pub use table::{OffsetTable, Table, TableValue, TimestampTable};
pub use tag_index::{TagIndexEntry, TagIndexTable};
