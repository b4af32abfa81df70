//! Reader/writer sections keyed by target instance.
//!
//! Locking interceptors enter a section from their entry hook and leave it from their exit
//! hook. Woven code runs exit hooks in a finally region, so an exception inside the body
//! cannot leave a section held. Sections are explicit enter/exit pairs rather than guards
//! because entry and exit happen in different hook calls.
//!
//! Sections are not reentrant and do not track their owner. A writer that enters a section
//! it already holds waits for itself, so an interceptor that locks a method calling another
//! method locked on the same instance deadlocks. Read entries nest only while no writer
//! waits.
//!
//! # Example
//!
//! ```rust
//! use dotweave::runtime::{InstanceLocks, LockKey, ObjectRef};
//!
//! let locks = InstanceLocks::new();
//! let section = locks.section(LockKey::Instance(ObjectRef(1)));
//! section.enter_read();
//! section.enter_read();
//! assert_eq!(section.readers(), 2);
//! section.exit_read();
//! section.exit_read();
//! section.enter_write();
//! assert!(section.is_write_held());
//! section.exit_write();
//! ```

use std::sync::{Arc, Condvar, Mutex, OnceLock};

use dashmap::DashMap;

use crate::runtime::{ObjectRef, Value};

/// What a section protects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// One object
    Instance(ObjectRef),
    /// The shared sentinel of static members
    Static,
}

impl LockKey {
    /// Key of a hook's receiver: the object, or the static sentinel for null and non-object
    /// receivers
    #[must_use]
    pub fn of(instance: &Value) -> LockKey {
        match instance {
            Value::Ref(object) => LockKey::Instance(*object),
            _ => LockKey::Static,
        }
    }
}

#[derive(Debug, Default)]
struct SectionState {
    readers: usize,
    writer: bool,
    waiting_writers: usize,
}

/// A reader/writer section. Readers share it; a writer excludes readers and other writers.
/// Waiting writers block new readers.
#[derive(Debug, Default)]
pub struct SectionLock {
    state: Mutex<SectionState>,
    changed: Condvar,
}

impl SectionLock {
    /// Unheld section
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until no writer holds or awaits the section, then join the readers
    pub fn enter_read(&self) {
        let guard = lock!(self.state);
        let mut state = self
            .changed
            .wait_while(guard, |state| state.writer || state.waiting_writers > 0)
            .expect("Failed to acquire lock");
        state.readers += 1;
    }

    /// Leave a read section
    pub fn exit_read(&self) {
        let mut state = lock!(self.state);
        state.readers = state.readers.saturating_sub(1);
        if state.readers == 0 {
            self.changed.notify_all();
        }
    }

    /// Block until the section is free, then hold it exclusively.
    ///
    /// Not reentrant: calling this again before [`SectionLock::exit_write`] blocks forever.
    pub fn enter_write(&self) {
        let mut state = lock!(self.state);
        state.waiting_writers += 1;
        let mut state = self
            .changed
            .wait_while(state, |state| state.writer || state.readers > 0)
            .expect("Failed to acquire lock");
        state.waiting_writers -= 1;
        state.writer = true;
    }

    /// Leave a write section
    pub fn exit_write(&self) {
        let mut state = lock!(self.state);
        state.writer = false;
        self.changed.notify_all();
    }

    /// Number of readers inside the section
    #[must_use]
    pub fn readers(&self) -> usize {
        lock!(self.state).readers
    }

    /// True while a writer holds the section
    #[must_use]
    pub fn is_write_held(&self) -> bool {
        lock!(self.state).writer
    }
}

/// Process-wide map from target instance to its section, populated on first use.
#[derive(Debug, Default)]
pub struct InstanceLocks {
    sections: DashMap<LockKey, Arc<SectionLock>>,
}

impl InstanceLocks {
    /// Empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The map shared by the whole process
    pub fn global() -> &'static InstanceLocks {
        static LOCKS: OnceLock<InstanceLocks> = OnceLock::new();
        LOCKS.get_or_init(InstanceLocks::new)
    }

    /// Section of `key`, created atomically on first request
    pub fn section(&self, key: LockKey) -> Arc<SectionLock> {
        self.sections
            .entry(key)
            .or_insert_with(|| Arc::new(SectionLock::new()))
            .clone()
    }

    /// Number of sections created so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// True if no section was created yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}
