//! Aggregate analytics state of one node.
//!
//! Owns every [`MetricStore`], the funnel that gates the `funnel` store, and the
//! last snapshot handed to the mesh. Stores report mutations through a hook that
//! raises a shared dirty flag; [`StateAggregate::recompute_and_maybe_broadcast`]
//! only serializes and sends when the snapshot really differs from the last one
//! sent, which is what stops two peers from echoing the same state forever.

use crate::dashboard::{
    self, StoreDef, COUNTS, ENTER_KEY, FUNNEL, FUNNEL_STEPS, PAGE_LOADS, SCROLLS, SPEED,
    STEP_CLICK, STEP_SUBMIT, STEP_VIEW, SUBMITS, TEXTBOX_CLICKS, VIEWS,
};
use crate::error::{Error, Result};
use crate::mesh::PeerMesh;
use peerstat_metrics::{
    AggregateSnapshot, FunnelTracker, MetricStore, MutationHook, Rect, Viewport,
};
use peerstat_protocols::codec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// All synchronisable state of a session.
#[derive(Debug)]
pub struct StateAggregate {
    defs: Vec<StoreDef>,
    stores: Vec<MetricStore>,
    index: HashMap<String, usize>,
    /// Tracker plus the index of the store it counts into.
    funnel: Option<(usize, FunnelTracker)>,
    dirty: Arc<AtomicBool>,
    last_broadcast: Option<AggregateSnapshot>,
}

impl StateAggregate {
    /// Build one store per definition, all wired to the shared dirty flag.
    pub fn new(defs: Vec<StoreDef>) -> Result<Self> {
        let dirty = Arc::new(AtomicBool::new(false));
        let mut stores = Vec::with_capacity(defs.len());
        let mut index = HashMap::with_capacity(defs.len());

        for def in &defs {
            if index.contains_key(&def.name) {
                return Err(Error::Config(format!("duplicate store {:?}", def.name)));
            }
            let flag = Arc::clone(&dirty);
            let hook: MutationHook = Arc::new(move |_store| flag.store(true, Ordering::Release));
            index.insert(def.name.clone(), stores.len());
            stores.push(MetricStore::new(def.name.clone(), def.schema.clone(), Some(hook)));
        }

        Ok(Self {
            defs,
            stores,
            index,
            funnel: None,
            dirty,
            last_broadcast: None,
        })
    }

    /// The standard dashboard, with this page load already counted.
    pub fn dashboard() -> Result<Self> {
        let mut state = Self::new(dashboard::definitions())?;
        state.attach_funnel(FUNNEL, FUNNEL_STEPS)?;
        state.record_page_load()?;
        Ok(state)
    }

    /// Gate `store` behind a funnel over `steps`.
    pub fn attach_funnel<I, S>(&mut self, store: &str, steps: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let idx = self.index_of(store)?;
        let tracker = FunnelTracker::new(steps, &self.stores[idx])?;
        self.funnel = Some((idx, tracker));
        Ok(())
    }

    pub fn store(&self, name: &str) -> Option<&MetricStore> {
        self.index.get(name).map(|&i| &self.stores[i])
    }

    /// Stores in construction order.
    pub fn stores(&self) -> impl Iterator<Item = &MetricStore> {
        self.stores.iter()
    }

    pub fn definition(&self, name: &str) -> Option<&StoreDef> {
        self.index.get(name).map(|&i| &self.defs[i])
    }

    pub fn funnel(&self) -> Option<&FunnelTracker> {
        self.funnel.as_ref().map(|(_, tracker)| tracker)
    }

    /// Whether any store changed since the last recompute.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn last_broadcast(&self) -> Option<&AggregateSnapshot> {
        self.last_broadcast.as_ref()
    }

    /// Snapshot of every store.
    pub fn snapshot(&self) -> AggregateSnapshot {
        AggregateSnapshot {
            graphs: self
                .stores
                .iter()
                .map(|store| (store.name().to_string(), store.snapshot()))
                .collect(),
        }
    }

    /// Send the current snapshot to every connection if it differs from the
    /// last one sent. Returns whether a broadcast happened.
    pub fn recompute_and_maybe_broadcast(&mut self, mesh: &PeerMesh) -> Result<bool> {
        let dirty = self.dirty.swap(false, Ordering::AcqRel);
        if !dirty && self.last_broadcast.is_some() {
            return Ok(false);
        }

        let snapshot = self.snapshot();
        if self.last_broadcast.as_ref() == Some(&snapshot) {
            trace!("Snapshot unchanged, not broadcasting");
            return Ok(false);
        }

        let payload = match codec::encode(&snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                return Err(e.into());
            }
        };
        let delivered = mesh.broadcast(&payload);
        debug!(delivered, "Snapshot changed, broadcast to peers");
        self.last_broadcast = Some(snapshot);
        Ok(true)
    }

    /// Merge a peer's snapshot store by store. Unknown stores are ignored.
    /// Returns the number of fields that changed.
    pub fn apply_remote(&mut self, remote: &AggregateSnapshot) -> usize {
        let mut changed = 0;
        for (name, snapshot) in &remote.graphs {
            match self.index.get(name) {
                Some(&i) => changed += self.stores[i].merge(snapshot),
                None => debug!("Ignoring unknown remote store {:?}", name),
            }
        }
        changed
    }

    pub fn on_text_field_change(&mut self, store: &str, text: impl Into<String>) -> Result<()> {
        self.on_text_field_change_at(store, text, Instant::now())
    }

    pub fn on_text_field_change_at(
        &mut self,
        store: &str,
        text: impl Into<String>,
        now: Instant,
    ) -> Result<()> {
        let idx = self.index_of(store)?;
        self.stores[idx].set_typing(text, now);
        Ok(())
    }

    /// Returns true when the key submitted a comment.
    pub fn on_key_up(&mut self, store: &str, key_code: u32) -> Result<bool> {
        self.on_key_up_at(store, key_code, Instant::now())
    }

    pub fn on_key_up_at(&mut self, store: &str, key_code: u32, now: Instant) -> Result<bool> {
        let idx = self.index_of(store)?;
        if key_code != ENTER_KEY {
            return Ok(false);
        }
        let Some(typed) = self.stores[idx].take_typing(now) else {
            return Ok(false);
        };

        let chars = typed.text.chars().count() as u64;
        self.stores[idx].append_comment(typed.text)?;
        self.count(COUNTS, SUBMITS)?;
        self.drive_funnel(STEP_SUBMIT)?;

        let speed = chars_per_minute(chars, typed.elapsed);
        let idx = self.index_of(SPEED)?;
        self.stores[idx].push_sample(speed)?;
        debug!(store, chars, speed, "Comment submitted");
        Ok(true)
    }

    pub fn on_focus(&mut self, store: &str) -> Result<()> {
        self.index_of(store)?;
        self.count(COUNTS, TEXTBOX_CLICKS)?;
        self.drive_funnel(STEP_CLICK)?;
        Ok(())
    }

    /// Returns true when the store just became visible and was counted.
    pub fn on_possible_visibility_change(
        &mut self,
        store: &str,
        rect: &Rect,
        viewport: &Viewport,
    ) -> Result<bool> {
        let idx = self.index_of(store)?;
        if !self.stores[idx].observe_visibility(rect, viewport) {
            return Ok(false);
        }
        self.count(VIEWS, store)?;
        self.drive_funnel(STEP_VIEW)?;
        Ok(true)
    }

    pub fn on_scroll(&mut self) -> Result<()> {
        self.count(COUNTS, SCROLLS).map(|_| ())
    }

    pub fn record_page_load(&mut self) -> Result<()> {
        self.count(COUNTS, PAGE_LOADS).map(|_| ())
    }

    fn index_of(&self, store: &str) -> Result<usize> {
        self.index
            .get(store)
            .copied()
            .ok_or_else(|| Error::UnknownStore(store.to_string()))
    }

    fn count(&mut self, store: &str, label: &str) -> Result<u64> {
        let idx = self.index_of(store)?;
        Ok(self.stores[idx].increment(label)?)
    }

    fn drive_funnel(&mut self, event: &str) -> Result<bool> {
        let Some((idx, tracker)) = self.funnel.as_mut() else {
            return Ok(false);
        };
        Ok(tracker.update(&mut self.stores[*idx], event)?)
    }
}

fn chars_per_minute(chars: u64, elapsed: Duration) -> u64 {
    let millis = elapsed.as_millis().max(1);
    u64::try_from(u128::from(chars) * 60_000 / millis).unwrap_or(u64::MAX)
}
