//! Per-chapter scratch space for drafts in progress.
//!
//! An [`AccumulatorStore`] belongs to a single job execution. Chapters open a
//! slot, append partial results under string keys while drafting, and close
//! the slot once a final draft exists. The lock is taken per operation only,
//! so no caller holds it across an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use thiserror::Error;

use crate::error::StageError;

/// Well-known keys used by the Draft stage.
pub mod keys {
    /// Text of every drafted part so far, in order.
    pub const DRAFT: &str = "draft_so_far";
    /// One entry per body section, in objective order.
    pub const SECTIONS: &str = "sections";
    /// Artifact requests extracted from body sections.
    pub const ARTIFACTS: &str = "artifacts";
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccumulatorError {
    #[error("accumulator handle {0} is closed or unknown")]
    UnknownHandle(u64),

    #[error("chapter {chapter_id} of job {job_id} already has an open accumulator")]
    AlreadyOpen { job_id: String, chapter_id: String },
}

impl From<AccumulatorError> for StageError {
    fn from(err: AccumulatorError) -> Self {
        StageError::Validation(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccumulatorHandle(u64);

impl AccumulatorHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct Slot {
    job_id: String,
    chapter_id: String,
    values: HashMap<String, Vec<Value>>,
}

#[derive(Debug, Default)]
pub struct AccumulatorStore {
    next_id: AtomicU64,
    slots: Mutex<HashMap<AccumulatorHandle, Slot>>,
}

impl AccumulatorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<AccumulatorHandle, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a slot for one chapter. At most one slot per (job, chapter) is open.
    pub fn open(
        &self,
        job_id: &str,
        chapter_id: &str,
    ) -> Result<AccumulatorHandle, AccumulatorError> {
        let mut slots = self.slots();
        if slots
            .values()
            .any(|s| s.job_id == job_id && s.chapter_id == chapter_id)
        {
            return Err(AccumulatorError::AlreadyOpen {
                job_id: job_id.to_string(),
                chapter_id: chapter_id.to_string(),
            });
        }
        let handle = AccumulatorHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        slots.insert(
            handle,
            Slot {
                job_id: job_id.to_string(),
                chapter_id: chapter_id.to_string(),
                values: HashMap::new(),
            },
        );
        Ok(handle)
    }

    pub fn append(
        &self,
        handle: AccumulatorHandle,
        key: &str,
        value: Value,
    ) -> Result<(), AccumulatorError> {
        let mut slots = self.slots();
        let slot = slots
            .get_mut(&handle)
            .ok_or(AccumulatorError::UnknownHandle(handle.0))?;
        slot.values.entry(key.to_string()).or_default().push(value);
        Ok(())
    }

    /// Everything appended under `key`, or `None` if nothing was.
    pub fn read(
        &self,
        handle: AccumulatorHandle,
        key: &str,
    ) -> Result<Option<Vec<Value>>, AccumulatorError> {
        let slots = self.slots();
        let slot = slots
            .get(&handle)
            .ok_or(AccumulatorError::UnknownHandle(handle.0))?;
        Ok(slot.values.get(key).cloned())
    }

    /// Discard the slot. Closing twice is a no-op.
    pub fn close(&self, handle: AccumulatorHandle) {
        self.slots().remove(&handle);
    }

    pub fn open_count(&self) -> usize {
        self.slots().len()
    }

    /// Open a slot that closes itself when dropped.
    pub fn scoped(
        &self,
        job_id: &str,
        chapter_id: &str,
    ) -> Result<Scratch<'_>, AccumulatorError> {
        let handle = self.open(job_id, chapter_id)?;
        Ok(Scratch {
            store: self,
            handle,
        })
    }
}

/// RAII wrapper over an open slot. Dropping it closes the slot, so early
/// returns with `?` cannot leak it.
#[derive(Debug)]
pub struct Scratch<'s> {
    store: &'s AccumulatorStore,
    handle: AccumulatorHandle,
}

impl Scratch<'_> {
    pub fn handle(&self) -> AccumulatorHandle {
        self.handle
    }

    pub fn append(&self, key: &str, value: impl Into<Value>) -> Result<(), AccumulatorError> {
        self.store.append(self.handle, key, value.into())
    }

    pub fn read(&self, key: &str) -> Result<Option<Vec<Value>>, AccumulatorError> {
        self.store.read(self.handle, key)
    }

    /// String entries under `key` joined with blank lines.
    pub fn read_text(&self, key: &str) -> Result<String, AccumulatorError> {
        let values = self.read(key)?.unwrap_or_default();
        Ok(values
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    pub fn close(self) {
        // Drop does the work.
    }
}

impl Drop for Scratch<'_> {
    fn drop(&mut self) {
        self.store.close(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn append_then_read_preserves_order() {
        let store = AccumulatorStore::new();
        let h = store.open("job-1", "ch-1").unwrap();
        store.append(h, keys::DRAFT, json!("opener")).unwrap();
        store.append(h, keys::DRAFT, json!("body 1")).unwrap();

        assert_eq!(
            store.read(h, keys::DRAFT).unwrap(),
            Some(vec![json!("opener"), json!("body 1")])
        );
        assert_eq!(store.read(h, keys::ARTIFACTS).unwrap(), None);
    }

    #[test]
    fn slots_are_isolated_per_job_and_chapter() {
        let store = AccumulatorStore::new();
        let a = store.open("job-1", "ch-1").unwrap();
        let b = store.open("job-2", "ch-1").unwrap();
        store.append(a, keys::DRAFT, json!("only in a")).unwrap();

        assert_eq!(store.read(b, keys::DRAFT).unwrap(), None);
        assert_eq!(store.open_count(), 2);
    }

    #[test]
    fn second_open_for_same_chapter_is_refused() {
        let store = AccumulatorStore::new();
        let _h = store.open("job-1", "ch-1").unwrap();
        let err = store.open("job-1", "ch-1").unwrap_err();
        assert!(matches!(err, AccumulatorError::AlreadyOpen { .. }));
    }

    #[test]
    fn closed_handle_is_unknown() {
        let store = AccumulatorStore::new();
        let h = store.open("job-1", "ch-1").unwrap();
        store.close(h);
        store.close(h);

        assert_eq!(store.open_count(), 0);
        assert_eq!(
            store.append(h, keys::DRAFT, json!("late")),
            Err(AccumulatorError::UnknownHandle(h.id()))
        );
    }

    #[test]
    fn scratch_closes_on_drop_and_on_error_paths() {
        let store = AccumulatorStore::new();

        fn failing(store: &AccumulatorStore) -> Result<(), AccumulatorError> {
            let scratch = store.scoped("job-1", "ch-1")?;
            scratch.append(keys::DRAFT, "opener")?;
            Err(AccumulatorError::UnknownHandle(99))
        }

        assert!(failing(&store).is_err());
        assert_eq!(store.open_count(), 0);

        let scratch = store.scoped("job-1", "ch-1").unwrap();
        scratch.append(keys::DRAFT, "a").unwrap();
        scratch.append(keys::DRAFT, "b").unwrap();
        assert_eq!(scratch.read_text(keys::DRAFT).unwrap(), "a\n\nb");
        scratch.close();
        assert_eq!(store.open_count(), 0);
    }
}
