//! Metric store: named counters plus a comment log.
//!
//! Counters only grow locally. Remote state is folded in with [`MetricStore::merge`],
//! which takes the per-label maximum and aligns comments by position, so replaying
//! the same snapshot any number of times leaves the store unchanged.

use crate::error::{Error, Result};
use crate::snapshot::{Bar, StoreSnapshot};
use crate::visibility::{Rect, Viewport, VisibilityEdgeDetector};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Callback fired with the store name after every mutation.
pub type MutationHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Key set of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schema {
    /// Labels fixed at construction, in display order.
    Fixed(Vec<String>),
    /// Sample series: labels are ordinals appended as samples arrive.
    Open,
}

impl Schema {
    pub fn fixed<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Fixed(labels.into_iter().map(Into::into).collect())
    }
}

/// A finished typing session handed back on submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedComment {
    pub text: String,
    /// Time since the first keystroke of the session (zero if the clock never started).
    pub elapsed: Duration,
}

/// One independently mergeable unit of analytics state.
pub struct MetricStore {
    name: String,
    open: bool,
    /// Display order of `counts`.
    labels: Vec<String>,
    counts: BTreeMap<String, u64>,
    comments: Vec<String>,
    visibility: VisibilityEdgeDetector,
    typing: String,
    typing_started_at: Option<Instant>,
    hook: Option<MutationHook>,
}

impl MetricStore {
    /// Create a store with every label of `schema` at zero.
    pub fn new(name: impl Into<String>, schema: Schema, hook: Option<MutationHook>) -> Self {
        let (open, initial) = match schema {
            Schema::Fixed(labels) => (false, labels),
            Schema::Open => (true, Vec::new()),
        };

        let mut labels = Vec::with_capacity(initial.len());
        let mut counts = BTreeMap::new();
        for label in initial {
            if counts.insert(label.clone(), 0).is_none() {
                labels.push(label);
            }
        }

        Self {
            name: name.into(),
            open,
            labels,
            counts,
            comments: Vec::new(),
            visibility: VisibilityEdgeDetector::new(),
            typing: String::new(),
            typing_started_at: None,
            hook,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the key set grows with samples.
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.counts.contains_key(label)
    }

    /// Current value of a label.
    pub fn count(&self, label: &str) -> Option<u64> {
        self.counts.get(label).copied()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    /// Text currently being typed (not synchronised).
    pub fn typing(&self) -> &str {
        &self.typing
    }

    pub fn is_visible(&self) -> bool {
        self.visibility.is_visible()
    }

    /// Add one to a known label and return the new value.
    pub fn increment(&mut self, label: &str) -> Result<u64> {
        let value = self
            .counts
            .get_mut(label)
            .ok_or_else(|| Error::UnknownLabel {
                store: self.name.clone(),
                label: label.to_string(),
            })?;
        *value += 1;
        let value = *value;
        trace!(store = %self.name, label, value, "Counter incremented");
        self.notify();
        Ok(value)
    }

    /// Append a comment and return its index.
    pub fn append_comment(&mut self, text: impl Into<String>) -> Result<usize> {
        let text = text.into();
        if text.is_empty() {
            return Err(Error::EmptyComment {
                store: self.name.clone(),
            });
        }
        self.comments.push(text);
        self.notify();
        Ok(self.comments.len() - 1)
    }

    /// Record a sample under the next ordinal label (`"1"`, `"2"`, ...).
    pub fn push_sample(&mut self, value: u64) -> Result<String> {
        if !self.open {
            return Err(Error::FixedSchema {
                store: self.name.clone(),
            });
        }
        let mut ordinal = self.counts.len() + 1;
        while self.counts.contains_key(&ordinal.to_string()) {
            ordinal += 1;
        }
        let label = ordinal.to_string();
        self.insert_label(label.clone());
        self.counts.insert(label.clone(), value);
        self.notify();
        Ok(label)
    }

    /// Deep copy of the synchronisable fields.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            comments: self.comments.clone(),
            data: self.counts.clone(),
        }
    }

    /// Fold a remote snapshot into this store.
    ///
    /// Counters take `max(local, remote)`; fixed-schema stores ignore labels they
    /// do not know, open-schema stores adopt them. Comments are aligned by index
    /// and the remote entry wins on collision. Returns the number of fields that
    /// changed.
    pub fn merge(&mut self, remote: &StoreSnapshot) -> usize {
        let mut changed = 0;

        for (label, &theirs) in &remote.data {
            match self.counts.get_mut(label) {
                Some(ours) => {
                    if theirs > *ours {
                        *ours = theirs;
                        changed += 1;
                    }
                }
                None if self.open => {
                    self.insert_label(label.clone());
                    self.counts.insert(label.clone(), theirs);
                    changed += 1;
                }
                None => {
                    trace!(store = %self.name, label = %label, "Ignoring unknown remote label");
                }
            }
        }

        for (index, theirs) in remote.comments.iter().enumerate() {
            match self.comments.get_mut(index) {
                Some(ours) => {
                    if ours != theirs {
                        ours.clone_from(theirs);
                        changed += 1;
                    }
                }
                None => {
                    self.comments.push(theirs.clone());
                    changed += 1;
                }
            }
        }

        if changed > 0 {
            trace!(store = %self.name, changed, "Merged remote snapshot");
            self.notify();
        }
        changed
    }

    /// Counters as chart bars, in label order.
    pub fn data_as_array(&self) -> Vec<Bar> {
        self.labels
            .iter()
            .map(|label| Bar {
                label: label.clone(),
                value: self.counts.get(label).copied().unwrap_or_default(),
            })
            .collect()
    }

    /// Replace the typing buffer, starting the session clock on the first change.
    pub fn set_typing(&mut self, text: impl Into<String>, now: Instant) {
        self.typing = text.into();
        if self.typing_started_at.is_none() {
            self.typing_started_at = Some(now);
        }
    }

    /// End the typing session, returning its text if there was any.
    pub fn take_typing(&mut self, now: Instant) -> Option<TypedComment> {
        if self.typing.is_empty() {
            return None;
        }
        let elapsed = self
            .typing_started_at
            .take()
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default();
        Some(TypedComment {
            text: std::mem::take(&mut self.typing),
            elapsed,
        })
    }

    /// Feed the visibility detector; true when the store just scrolled into view.
    pub fn observe_visibility(&mut self, rect: &Rect, viewport: &Viewport) -> bool {
        self.visibility.observe_rect(rect, viewport)
    }

    /// Place a new sample label so ordinals stay in numeric order.
    fn insert_label(&mut self, label: String) {
        let at = self
            .labels
            .partition_point(|existing| ordinal_order(existing, &label).is_lt());
        self.labels.insert(at, label);
    }

    fn notify(&self) {
        if let Some(hook) = &self.hook {
            hook(&self.name);
        }
    }
}

/// Numeric order for ordinal labels; anything else sorts after them, by text.
fn ordinal_order(a: &str, b: &str) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

impl fmt::Debug for MetricStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricStore")
            .field("name", &self.name)
            .field("open", &self.open)
            .field("counts", &self.counts)
            .field("comments", &self.comments)
            .field("visible", &self.visibility.is_visible())
            .field("typing", &self.typing)
            .finish_non_exhaustive()
    }
}
