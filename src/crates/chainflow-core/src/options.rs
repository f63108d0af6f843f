//! The options bag handed to every worker body.
//!
//! An [`Options`] value is an *ordered* list of entries, each either a bare
//! flag or a tag bound to a value. Duplicate tags are permitted and
//! meaningful: lookups are multi-valued and preserve declaration order.
//! Values may carry opaque application data or worker handles, which is how
//! routing tags work: [`WorkerContext::send_to`](crate::WorkerContext::send_to)
//! extracts every handle bound to a tag and delivers to each of them.
//!
//! Before a worker body runs, the library injects exactly one entry
//! `(next, successors)` at the head of its bag; everything the caller
//! declared follows untouched.
//!
//! # Examples
//!
//! ```rust
//! use chainflow_core::{OptionValue, Options};
//! use serde_json::json;
//!
//! let options = Options::new()
//!     .flag("verbose")
//!     .with_data("label", json!("stage-a"))
//!     .with_data("label", json!("stage-b"));
//!
//! assert!(options.has_flag("verbose"));
//! let labels: Vec<_> = options
//!     .get_all("label")
//!     .into_iter()
//!     .map(|value| match value {
//!         OptionValue::Data(data) => data.as_str().unwrap().to_string(),
//!         _ => unreachable!(),
//!     })
//!     .collect();
//! assert_eq!(labels, vec!["stage-a", "stage-b"]);
//! ```

use serde_json::Value;

use crate::worker::WorkerHandle;

/// The reserved tag bound to a worker's downstream successors.
pub const NEXT: &str = "next";

/// A single value bound to a tag in an [`Options`] bag.
#[derive(Debug, Clone)]
pub enum OptionValue {
    /// A single addressable worker.
    Worker(WorkerHandle),
    /// A list of addressable workers bound as one value.
    Workers(Vec<WorkerHandle>),
    /// Opaque application data, passed through untouched. Not addressable:
    /// skipped by message routing.
    Data(Value),
}

/// One entry of an [`Options`] bag.
#[derive(Debug, Clone)]
pub enum OptionEntry {
    /// A bare tag.
    Flag(String),
    /// A tag bound to a value.
    Pair(String, OptionValue),
}

/// Ordered, duplicate-friendly options bag.
#[derive(Debug, Clone, Default)]
pub struct Options {
    entries: Vec<OptionEntry>,
}

impl Options {
    /// Create an empty options bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a bare flag.
    pub fn flag(mut self, tag: impl Into<String>) -> Self {
        self.entries.push(OptionEntry::Flag(tag.into()));
        self
    }

    /// Append a tag bound to any [`OptionValue`].
    pub fn with(mut self, tag: impl Into<String>, value: OptionValue) -> Self {
        self.entries.push(OptionEntry::Pair(tag.into(), value));
        self
    }

    /// Append a tag bound to opaque application data.
    pub fn with_data(self, tag: impl Into<String>, data: Value) -> Self {
        self.with(tag, OptionValue::Data(data))
    }

    /// Append a tag bound to a worker handle, making the tag routable via
    /// [`WorkerContext::send_to`](crate::WorkerContext::send_to).
    pub fn with_worker(self, tag: impl Into<String>, worker: WorkerHandle) -> Self {
        self.with(tag, OptionValue::Worker(worker))
    }

    /// Insert an entry at the head of the bag.
    pub(crate) fn push_front(&mut self, entry: OptionEntry) {
        self.entries.insert(0, entry);
    }

    /// Every value bound to `tag`, in declaration order.
    pub fn get_all(&self, tag: &str) -> Vec<&OptionValue> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                OptionEntry::Pair(key, value) if key == tag => Some(value),
                _ => None,
            })
            .collect()
    }

    /// The first value bound to `tag`, if any.
    pub fn first(&self, tag: &str) -> Option<&OptionValue> {
        self.get_all(tag).into_iter().next()
    }

    /// Whether a bare flag `tag` is present.
    pub fn has_flag(&self, tag: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| matches!(entry, OptionEntry::Flag(key) if key == tag))
    }

    /// Every worker handle bound to `tag`, flattened, in declaration order.
    ///
    /// Non-addressable ([`OptionValue::Data`]) values are skipped.
    pub fn workers(&self, tag: &str) -> Vec<WorkerHandle> {
        let mut handles = Vec::new();
        for value in self.get_all(tag) {
            match value {
                OptionValue::Worker(handle) => handles.push(handle.clone()),
                OptionValue::Workers(list) => handles.extend(list.iter().cloned()),
                OptionValue::Data(_) => {}
            }
        }
        handles
    }

    /// The raw entries, in order.
    pub fn entries(&self) -> &[OptionEntry] {
        &self.entries
    }

    /// Number of entries in the bag.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bag has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
