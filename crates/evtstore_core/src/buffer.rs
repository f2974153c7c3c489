//! Write buffers.
//!
//! Serialized records are buffered in memory until their total size passes
//! the flush threshold. Errors, event sources and analysis reports keep
//! arrival order; events and tags are drained in key order so the streams
//! they are flushed to are sorted.

use crate::containers::EventIdentifier;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};

/// FIFO buffer of serialized records.
#[derive(Debug, Default)]
pub struct ContainersList {
    containers: VecDeque<Vec<u8>>,
    data_size: usize,
}

impl ContainersList {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total size of the buffered records.
    #[must_use]
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Number of buffered records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Appends a record.
    pub fn push(&mut self, data: Vec<u8>) {
        self.data_size += data.len();
        self.containers.push_back(data);
    }

    /// Removes the oldest record.
    pub fn pop(&mut self) -> Option<Vec<u8>> {
        let data = self.containers.pop_front()?;
        self.data_size -= data.len();
        Some(data)
    }

    /// Returns the record at `index`, oldest first.
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&[u8]> {
        self.containers.get(index).map(Vec::as_slice)
    }

    /// Drops every record.
    pub fn empty(&mut self) {
        self.containers.clear();
        self.data_size = 0;
    }
}

#[derive(Debug)]
struct HeapEntry<K> {
    key: K,
    sequence: u64,
    data: Vec<u8>,
}

impl<K: Ord> PartialEq for HeapEntry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: Ord> Eq for HeapEntry<K> {}

impl<K: Ord> PartialOrd for HeapEntry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord> Ord for HeapEntry<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then(self.sequence.cmp(&other.sequence))
    }
}

/// Min-heap of serialized records.
///
/// Records with equal keys come out in insertion order.
#[derive(Debug)]
pub struct OrderedBuffer<K> {
    heap: BinaryHeap<Reverse<HeapEntry<K>>>,
    data_size: usize,
    next_sequence: u64,
}

impl<K: Ord> Default for OrderedBuffer<K> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            data_size: 0,
            next_sequence: 0,
        }
    }
}

impl<K: Ord> OrderedBuffer<K> {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total size of the buffered records.
    #[must_use]
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Number of buffered records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Buffers a record under `key`.
    pub fn push(&mut self, key: K, data: Vec<u8>) {
        self.data_size += data.len();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Reverse(HeapEntry {
            key,
            sequence,
            data,
        }));
    }

    /// Removes the record with the smallest key.
    pub fn pop(&mut self) -> Option<(K, Vec<u8>)> {
        let Reverse(entry) = self.heap.pop()?;
        self.data_size -= entry.data.len();
        Some((entry.key, entry.data))
    }

    /// Drops every record.
    pub fn empty(&mut self) {
        self.heap.clear();
        self.data_size = 0;
    }
}

/// Events keyed by timestamp.
pub type SerializedEventsHeap = OrderedBuffer<i64>;

/// Sort key of a buffered tag: `(store_number, store_index, uuid)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TagSortKey {
    store_number: Option<u32>,
    store_index: Option<u32>,
    uuid: Option<String>,
}

impl TagSortKey {
    /// Returns the identifier the key was built from.
    #[must_use]
    pub fn identifier(&self) -> Option<EventIdentifier> {
        match (&self.uuid, self.store_number, self.store_index) {
            (Some(uuid), _, _) => Some(EventIdentifier::Uuid(uuid.clone())),
            (None, Some(store_number), Some(store_index)) => Some(EventIdentifier::Position {
                store_number,
                store_index,
            }),
            _ => None,
        }
    }
}

impl From<&EventIdentifier> for TagSortKey {
    fn from(identifier: &EventIdentifier) -> Self {
        match identifier {
            EventIdentifier::Position {
                store_number,
                store_index,
            } => Self {
                store_number: Some(*store_number),
                store_index: Some(*store_index),
                uuid: None,
            },
            EventIdentifier::Uuid(uuid) => Self {
                store_number: None,
                store_index: None,
                uuid: Some(uuid.clone()),
            },
        }
    }
}

/// Tags keyed by the identifier of the tagged event.
pub type SerializedTagsHeap = OrderedBuffer<TagSortKey>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containers_list_is_fifo() {
        let mut list = ContainersList::new();
        list.push(b"first".to_vec());
        list.push(b"second!".to_vec());
        assert_eq!(list.data_size(), 12);
        assert_eq!(list.get_by_index(1), Some(&b"second!"[..]));

        assert_eq!(list.pop().unwrap(), b"first");
        assert_eq!(list.data_size(), 7);
        assert_eq!(list.len(), 1);

        list.empty();
        assert!(list.is_empty());
        assert_eq!(list.data_size(), 0);
        assert!(list.pop().is_none());
    }

    #[test]
    fn events_heap_drains_in_timestamp_order() {
        let mut heap = SerializedEventsHeap::new();
        heap.push(50, b"c".to_vec());
        heap.push(10, b"a".to_vec());
        heap.push(30, b"b".to_vec());
        heap.push(10, b"a2".to_vec());
        assert_eq!(heap.data_size(), 5);

        let drained: Vec<_> = std::iter::from_fn(|| heap.pop()).collect();
        assert_eq!(
            drained,
            vec![
                (10, b"a".to_vec()),
                (10, b"a2".to_vec()),
                (30, b"b".to_vec()),
                (50, b"c".to_vec()),
            ]
        );
        assert_eq!(heap.data_size(), 0);
    }

    #[test]
    fn tags_heap_orders_by_identifier() {
        let mut heap = SerializedTagsHeap::new();
        let identifiers = [
            EventIdentifier::Position {
                store_number: 2,
                store_index: 0,
            },
            EventIdentifier::Uuid("b".to_string()),
            EventIdentifier::Position {
                store_number: 1,
                store_index: 5,
            },
            EventIdentifier::Uuid("a".to_string()),
        ];
        for identifier in &identifiers {
            heap.push(TagSortKey::from(identifier), Vec::new());
        }

        let order: Vec<_> = std::iter::from_fn(|| heap.pop())
            .map(|(key, _)| key.identifier().unwrap())
            .collect();
        assert_eq!(
            order,
            vec![
                identifiers[3].clone(),
                identifiers[1].clone(),
                identifiers[2].clone(),
                identifiers[0].clone(),
            ]
        );
    }
}
