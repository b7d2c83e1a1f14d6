//! Ordered event log shared between middleware, handlers and hooks.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// A thread-safe, append-only log of labels.
///
/// Clones share the same log, so a recorder can be moved into every
/// closure of a pipeline and inspected afterwards.
///
/// ```
/// use lamina_test::Recorder;
///
/// let recorder = Recorder::new();
/// let clone = recorder.clone();
/// clone.record("end:A");
/// recorder.record("destroy:B");
/// recorder.assert_entries(&["end:A", "destroy:B"]);
/// ```
#[derive(Clone, Default)]
pub struct Recorder {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a label.
    pub fn record(&self, label: impl Into<String>) {
        self.entries.lock().push(label.into());
    }

    /// A snapshot of every label, in order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Labels starting with `prefix`, in order.
    #[must_use]
    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|label| label.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Index of the first occurrence of `label`.
    #[must_use]
    pub fn position(&self, label: &str) -> Option<usize> {
        self.entries.lock().iter().position(|entry| entry == label)
    }

    /// Whether `label` was recorded.
    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.position(label).is_some()
    }

    /// Number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops every label.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Asserts the log equals `expected`.
    ///
    /// # Panics
    ///
    /// Panics if the log differs.
    pub fn assert_entries(&self, expected: &[&str]) {
        let actual = self.entries();
        assert_eq!(actual, expected, "Recorded entries mismatch");
    }

    /// Asserts every label in `expected` was recorded, in that relative order.
    ///
    /// # Panics
    ///
    /// Panics if a label is missing or out of order.
    pub fn assert_order(&self, expected: &[&str]) {
        let actual = self.entries();
        let mut from = 0;
        for label in expected {
            let found = actual[from..]
                .iter()
                .position(|entry| entry == label)
                .unwrap_or_else(|| {
                    panic!("'{label}' not found after index {from} in {actual:?}")
                });
            from += found + 1;
        }
    }
}

impl fmt::Debug for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.lock().iter()).finish()
    }
}
