//! Bounded cache of loaded tables.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Least-recently-used cache of tables keyed by stream number.
///
/// Holds at most `capacity` tables; inserting into a full cache evicts the
/// table that was touched longest ago.
#[derive(Debug)]
pub struct TableCache<T> {
    capacity: usize,
    tables: HashMap<u32, Arc<T>>,
    recency: VecDeque<u32>,
}

impl<T> TableCache<T> {
    /// Creates an empty cache. A capacity of 0 is treated as 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tables: HashMap::with_capacity(capacity),
            recency: VecDeque::with_capacity(capacity),
        }
    }

    /// Maximum number of cached tables.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cached tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Whether the table of `stream_number` is cached. Does not touch it.
    #[must_use]
    pub fn contains(&self, stream_number: u32) -> bool {
        self.tables.contains_key(&stream_number)
    }

    /// Returns a cached table and marks it most recently used.
    pub fn get(&mut self, stream_number: u32) -> Option<Arc<T>> {
        let table = self.tables.get(&stream_number).cloned()?;
        self.touch(stream_number);
        Some(table)
    }

    /// Caches a table, evicting the least recently used one if full.
    pub fn insert(&mut self, stream_number: u32, table: T) -> Arc<T> {
        let table = Arc::new(table);
        if self.tables.insert(stream_number, Arc::clone(&table)).is_some() {
            self.touch(stream_number);
            return table;
        }

        self.recency.push_back(stream_number);
        while self.tables.len() > self.capacity {
            let Some(oldest) = self.recency.pop_front() else {
                break;
            };
            self.tables.remove(&oldest);
        }
        table
    }

    /// Returns the cached table of `stream_number`, loading it with `load`
    /// on a miss.
    pub fn get_or_try_insert<E>(
        &mut self,
        stream_number: u32,
        load: impl FnOnce() -> Result<T, E>,
    ) -> Result<Arc<T>, E> {
        if let Some(table) = self.get(stream_number) {
            return Ok(table);
        }
        Ok(self.insert(stream_number, load()?))
    }

    /// Drops a cached table.
    pub fn remove(&mut self, stream_number: u32) {
        if self.tables.remove(&stream_number).is_some() {
            self.recency.retain(|number| *number != stream_number);
        }
    }

    /// Drops every cached table.
    pub fn clear(&mut self) {
        self.tables.clear();
        self.recency.clear();
    }

    fn touch(&mut self, stream_number: u32) {
        if let Some(position) = self.recency.iter().position(|n| *n == stream_number) {
            self.recency.remove(position);
        }
        self.recency.push_back(stream_number);
    }
}
