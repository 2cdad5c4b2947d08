//! Concurrency-safe table of loaded plugins.
//!
//! The [`PluginRegistry`] keeps records in insertion order behind a single
//! mutex that serialises every structural change. Indices are only meaningful
//! while that mutex is held, so index-based removal is exposed in two forms:
//! [`PluginRegistry::remove_at_locked`], which takes the lock itself, and
//! [`RegistryGuard::remove_at`], which can only be reached through a guard
//! returned by [`PluginRegistry::lock`].
//!
//! Sequential scans use a [`RegistryCursor`] taken over a snapshot. Every
//! call to [`PluginRegistry::cursor`] produces an independent cursor, so two
//! callers scanning at the same time never disturb each other.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::ControlError;
use crate::record::PluginRecord;

/// Ordered, shared table of plugin records.
///
/// Appends are checked for handle identity only: two distinct records with
/// the same name and version may coexist, and lookups by identity resolve to
/// the first one in insertion order.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use pulse_control::{PluginRecord, PluginRegistry};
///
/// let registry = PluginRegistry::new();
/// let record = Arc::new(PluginRecord::detected("/opt/pulse/plugins/cpu"));
/// registry.append(Arc::clone(&record)).expect("first append succeeds");
/// assert!(registry.append(record).is_err());
/// assert_eq!(registry.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct PluginRegistry {
    table: Mutex<Vec<Arc<PluginRecord>>>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `record` to the end of the table.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::DuplicateEntry`] if this exact handle is
    /// already present.
    pub fn append(&self, record: Arc<PluginRecord>) -> Result<(), ControlError> {
        self.lock().append(record)
    }

    /// Returns the record at `index`.
    ///
    /// The index may be stale as soon as this call returns.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::IndexOutOfRange`] if `index` is not below the
    /// current length.
    pub fn get(&self, index: usize) -> Result<Arc<PluginRecord>, ControlError> {
        self.lock().get(index).map(Arc::clone)
    }

    /// Returns a shallow copy of the table.
    ///
    /// Later appends and removals do not affect the returned list.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<PluginRecord>> {
        self.lock().table.clone()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when the table holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquires the registry lock for a multi-step critical section.
    ///
    /// The lock is released when the guard is dropped. Calling any other
    /// registry method from the same thread while holding the guard
    /// deadlocks.
    #[must_use]
    pub fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            table: self.table.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Removes the record at `index` under the registry lock.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::IndexOutOfRange`] if `index` is not below the
    /// current length.
    pub fn remove_at_locked(&self, index: usize) -> Result<Arc<PluginRecord>, ControlError> {
        self.lock().remove_at(index)
    }

    /// Returns a cursor over a snapshot of the current table.
    #[must_use]
    pub fn cursor(&self) -> RegistryCursor {
        RegistryCursor::new(self.snapshot())
    }
}

/// Exclusive access to the registry table.
///
/// Indices read through a guard stay valid until the guard is dropped or the
/// guard itself removes an element.
#[derive(Debug)]
pub struct RegistryGuard<'a> {
    table: MutexGuard<'a, Vec<Arc<PluginRecord>>>,
}

impl RegistryGuard<'_> {
    /// Appends `record` while the lock is held.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::DuplicateEntry`] if this exact handle is
    /// already present.
    pub fn append(&mut self, record: Arc<PluginRecord>) -> Result<(), ControlError> {
        if let Some(index) = self
            .table
            .iter()
            .position(|existing| Arc::ptr_eq(existing, &record))
        {
            return Err(ControlError::DuplicateEntry { index });
        }
        self.table.push(record);
        Ok(())
    }

    /// Returns the record at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::IndexOutOfRange`] if `index` is not below the
    /// current length.
    pub fn get(&self, index: usize) -> Result<&Arc<PluginRecord>, ControlError> {
        self.table.get(index).ok_or(ControlError::IndexOutOfRange {
            index,
            len: self.table.len(),
        })
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` when the table holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Iterates over `(index, record)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Arc<PluginRecord>)> {
        self.table.iter().enumerate()
    }

    /// Returns the index of the first record matching `predicate`.
    pub fn position<P>(&self, mut predicate: P) -> Option<usize>
    where
        P: FnMut(&PluginRecord) -> bool,
    {
        self.table.iter().position(|record| predicate(record.as_ref()))
    }

    /// Removes the record at `index`, shifting later records down by one.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::IndexOutOfRange`] if `index` is not below the
    /// current length.
    pub fn remove_at(&mut self, index: usize) -> Result<Arc<PluginRecord>, ControlError> {
        let len = self.table.len();
        if index >= len {
            return Err(ControlError::IndexOutOfRange { index, len });
        }
        Ok(self.table.remove(index))
    }
}

/// Sequential scan over a registry snapshot.
///
/// [`advance`](Self::advance) moves to the next record and reports whether
/// one exists; [`current`](Self::current) returns the record the cursor is
/// on. Advancing past the last record rewinds the cursor so the next
/// [`advance`](Self::advance) starts from the beginning again.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use pulse_control::{PluginRecord, PluginRegistry};
///
/// let registry = PluginRegistry::new();
/// registry.append(Arc::new(PluginRecord::detected("/a"))).expect("append");
/// registry.append(Arc::new(PluginRecord::detected("/b"))).expect("append");
///
/// let mut cursor = registry.cursor();
/// let mut seen = Vec::new();
/// while cursor.advance() {
///     if let Some((index, _record)) = cursor.current() {
///         seen.push(index);
///     }
/// }
/// assert_eq!(seen, vec![0, 1]);
/// ```
#[derive(Debug, Clone)]
pub struct RegistryCursor {
    records: Vec<Arc<PluginRecord>>,
    position: usize,
}

impl RegistryCursor {
    fn new(records: Vec<Arc<PluginRecord>>) -> Self {
        Self {
            records,
            position: 0,
        }
    }

    /// Moves to the next record, returning `false` and rewinding at the end.
    pub fn advance(&mut self) -> bool {
        self.position += 1;
        if self.position > self.records.len() {
            self.position = 0;
            return false;
        }
        true
    }

    /// Returns the index and record under the cursor.
    #[must_use]
    pub fn current(&self) -> Option<(usize, Arc<PluginRecord>)> {
        let index = self.position.checked_sub(1)?;
        self.records
            .get(index)
            .map(|record| (index, Arc::clone(record)))
    }

    /// Returns the number of records in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` when the snapshot holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
