//! Sequential funnel tracking on top of a [`MetricStore`].
//!
//! Only in-order completions count. The tracker remembers the last completed
//! step; an event is counted when it is exactly the next one, and anything else
//! (skips, repeats, going backwards) is dropped without touching state.
//! Completing the last step resets the tracker in the same update, so the next
//! traversal can start straight away.

use crate::error::{Error, Result};
use crate::store::MetricStore;
use std::collections::HashMap;
use tracing::trace;

/// Funnel state machine with states `0..=N`.
#[derive(Debug, Clone)]
pub struct FunnelTracker {
    /// Event name -> 1-based position.
    steps: HashMap<String, usize>,
    len: usize,
    last_completed: usize,
}

impl FunnelTracker {
    /// Build a funnel whose steps are all labels of `store`.
    pub fn new<I, S>(steps: I, store: &MetricStore) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut positions = HashMap::new();
        for (index, step) in steps.into_iter().enumerate() {
            let step = step.into();
            if !store.has_label(&step) {
                return Err(Error::UnknownLabel {
                    store: store.name().to_string(),
                    label: step,
                });
            }
            if positions.insert(step.clone(), index + 1).is_some() {
                return Err(Error::DuplicateStep(step));
            }
        }
        if positions.is_empty() {
            return Err(Error::EmptyFunnel);
        }

        Ok(Self {
            len: positions.len(),
            steps: positions,
            last_completed: 0,
        })
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 0 when no step of the current traversal has completed.
    pub fn last_completed(&self) -> usize {
        self.last_completed
    }

    /// Position of an event, if it belongs to the funnel.
    pub fn position(&self, event: &str) -> Option<usize> {
        self.steps.get(event).copied()
    }

    /// Present an event; returns true if it was counted.
    pub fn update(&mut self, store: &mut MetricStore, event: &str) -> Result<bool> {
        let counted = match self.position(event) {
            Some(step) if step == self.last_completed + 1 => {
                store.increment(event)?;
                self.last_completed = step;
                true
            }
            _ => {
                trace!(event, last_completed = self.last_completed, "Dropped out-of-order funnel event");
                false
            }
        };

        if self.last_completed == self.len {
            trace!("Funnel completed, resetting");
            self.last_completed = 0;
        }
        Ok(counted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Schema;

    const STEPS: [&str; 3] = ["V", "C", "S"];

    fn setup() -> (FunnelTracker, MetricStore) {
        let store = MetricStore::new("funnel", Schema::fixed(STEPS), None);
        let tracker = FunnelTracker::new(STEPS, &store).unwrap();
        (tracker, store)
    }

    #[test]
    fn in_order_traversal_counts_each_once_and_resets() {
        let (mut funnel, mut store) = setup();
        assert!(funnel.update(&mut store, "V").unwrap());
        assert_eq!(funnel.last_completed(), 1);
        assert!(funnel.update(&mut store, "C").unwrap());
        assert!(funnel.update(&mut store, "S").unwrap());

        for step in STEPS {
            assert_eq!(store.count(step), Some(1));
        }
        assert_eq!(funnel.last_completed(), 0);
    }

    #[test]
    fn skipping_ahead_counts_nothing() {
        let (mut funnel, mut store) = setup();
        assert!(!funnel.update(&mut store, "S").unwrap());
        assert_eq!(store.count("S"), Some(0));
        assert_eq!(funnel.last_completed(), 0);
    }

    #[test]
    fn repeats_and_backward_steps_are_dropped() {
        let (mut funnel, mut store) = setup();
        funnel.update(&mut store, "V").unwrap();
        assert!(!funnel.update(&mut store, "V").unwrap());
        funnel.update(&mut store, "C").unwrap();
        assert!(!funnel.update(&mut store, "V").unwrap());
        assert_eq!(store.count("V"), Some(1));
        assert_eq!(funnel.last_completed(), 2);
    }

    #[test]
    fn stray_events_after_completion_are_dropped() {
        // view, click, submit, click, submit: the funnel happened once.
        let (mut funnel, mut store) = setup();
        for event in ["V", "C", "S", "C", "S"] {
            funnel.update(&mut store, event).unwrap();
        }
        for step in STEPS {
            assert_eq!(store.count(step), Some(1));
        }
    }

    #[test]
    fn next_traversal_starts_right_after_completion() {
        let (mut funnel, mut store) = setup();
        for event in ["V", "C", "S", "V"] {
            funnel.update(&mut store, event).unwrap();
        }
        assert_eq!(store.count("V"), Some(2));
        assert_eq!(funnel.last_completed(), 1);
    }

    #[test]
    fn unknown_event_is_a_no_op() {
        let (mut funnel, mut store) = setup();
        assert!(!funnel.update(&mut store, "elsewhere").unwrap());
        assert_eq!(funnel.last_completed(), 0);
    }

    #[test]
    fn construction_validates_steps() {
        let store = MetricStore::new("funnel", Schema::fixed(["a", "b"]), None);
        assert!(matches!(
            FunnelTracker::new(["a", "x"], &store),
            Err(Error::UnknownLabel { .. })
        ));
        assert!(matches!(
            FunnelTracker::new(["a", "a"], &store),
            Err(Error::DuplicateStep(_))
        ));
        assert!(matches!(
            FunnelTracker::new(Vec::<String>::new(), &store),
            Err(Error::EmptyFunnel)
        ));
    }
}
