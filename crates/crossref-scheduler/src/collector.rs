//! Dirty tracking and reindex rate limiting.
//!
//! A document becomes due when one of these holds, whichever comes first:
//! - no content change for `quiet_period`
//! - `max_delay` has passed since the first unflushed change
//!
//! and in both cases at least `min_interval` has passed since its previous
//! reindex. `flush_now` makes a dirty document due immediately.
//!
//! State is process-local and never persisted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crossref_types::{DocumentId, DocumentSnapshot};

use crate::clock::{to_delta, until, Clock};
use crate::config::CollectorConfig;
use crate::timer::TimerScheduler;

/// Whether a change can affect the index or graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Title, body, type, tags, parent or groupings changed
    Content,
    /// Only layout, display name, source or timestamps changed
    Presentational,
}

/// Classify the difference between two versions of a document. `None`
/// means nothing changed at all.
pub fn classify_change(previous: &DocumentSnapshot, next: &DocumentSnapshot) -> Option<ChangeKind> {
    if previous.content_hash() != next.content_hash() {
        return Some(ChangeKind::Content);
    }
    if previous == next {
        None
    } else {
        Some(ChangeKind::Presentational)
    }
}

#[derive(Debug, Clone, Default)]
struct DirtyState {
    first_change: Option<DateTime<Utc>>,
    last_change: Option<DateTime<Utc>>,
    last_reindex: Option<DateTime<Utc>>,
    forced: bool,
}

impl DirtyState {
    fn is_dirty(&self) -> bool {
        self.first_change.is_some()
    }
}

pub struct ChangeCollector {
    config: CollectorConfig,
    clock: Arc<dyn Clock>,
    timers: Option<Arc<dyn TimerScheduler>>,
    state: Mutex<HashMap<DocumentId, DirtyState>>,
}

impl ChangeCollector {
    pub fn new(config: CollectorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            timers: None,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Schedule a timer for every document when it becomes due.
    pub fn with_timers(mut self, timers: Arc<dyn TimerScheduler>) -> Self {
        self.timers = Some(timers);
        self
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<DocumentId, DirtyState>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a change. Presentational changes are ignored. Returns whether
    /// the document is now dirty.
    pub fn mark_dirty(&self, document_id: &DocumentId, kind: ChangeKind) -> bool {
        if kind == ChangeKind::Presentational {
            debug!(document_id = %document_id, "Ignoring presentational change");
            return self.is_dirty(document_id);
        }

        let now = self.clock.now();
        let due = {
            let mut state = self.lock();
            let entry = state.entry(document_id.clone()).or_default();
            entry.first_change.get_or_insert(now);
            entry.last_change = Some(now);
            self.due_at(entry)
        };

        if let (Some(timers), Some(due)) = (&self.timers, due) {
            timers.schedule_after(document_id.clone(), until(now, due));
        }
        debug!(document_id = %document_id, "Marked dirty");
        true
    }

    pub fn is_dirty(&self, document_id: &DocumentId) -> bool {
        self.lock()
            .get(document_id)
            .map(DirtyState::is_dirty)
            .unwrap_or(false)
    }

    /// When a dirty document becomes due. `None` when it is clean.
    pub fn next_due(&self, document_id: &DocumentId) -> Option<DateTime<Utc>> {
        self.lock().get(document_id).and_then(|s| self.due_at(s))
    }

    fn due_at(&self, state: &DirtyState) -> Option<DateTime<Utc>> {
        let first = state.first_change?;
        let last = state.last_change.unwrap_or(first);
        if state.forced {
            return Some(first);
        }

        let quiet = last + to_delta(self.config.quiet_period);
        let ceiling = first + to_delta(self.config.max_delay);
        let debounced = quiet.min(ceiling);
        match state.last_reindex {
            Some(previous) => Some(debounced.max(previous + to_delta(self.config.min_interval))),
            None => Some(debounced),
        }
    }

    pub fn should_reindex(&self, document_id: &DocumentId) -> bool {
        let now = self.clock.now();
        self.next_due(document_id).is_some_and(|due| due <= now)
    }

    /// Make a dirty document due now, bypassing debounce and the minimum
    /// interval. Returns whether it was dirty.
    pub fn flush_now(&self, document_id: &DocumentId) -> bool {
        let mut state = self.lock();
        match state.get_mut(document_id) {
            Some(entry) if entry.is_dirty() => {
                entry.forced = true;
                true
            }
            _ => false,
        }
    }

    /// A reindex of the document completed: it is clean and the minimum
    /// interval restarts.
    pub fn record_reindex(&self, document_id: &DocumentId) {
        let now = self.clock.now();
        {
            let mut state = self.lock();
            let entry = state.entry(document_id.clone()).or_default();
            *entry = DirtyState {
                last_reindex: Some(now),
                ..DirtyState::default()
            };
        }
        if let Some(timers) = &self.timers {
            timers.cancel(document_id);
        }
    }

    /// Dirty documents that are due now, in id order.
    pub fn due_documents(&self) -> Vec<DocumentId> {
        let now = self.clock.now();
        let state = self.lock();
        let mut due: Vec<DocumentId> = state
            .iter()
            .filter(|(_, s)| self.due_at(s).is_some_and(|d| d <= now))
            .map(|(id, _)| id.clone())
            .collect();
        due.sort();
        due
    }

    /// Drop all state for a document.
    pub fn forget(&self, document_id: &DocumentId) {
        self.lock().remove(document_id);
        if let Some(timers) = &self.timers {
            timers.cancel(document_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::timer::ManualTimerScheduler;
    use crossref_types::{Node, NodeGuid, NodeLayout, SemanticType};
    use std::time::Duration;

    fn doc(s: &str) -> DocumentId {
        DocumentId::parse(s).unwrap()
    }

    fn setup() -> (ChangeCollector, FakeClock, Arc<ManualTimerScheduler>) {
        let clock = FakeClock::default();
        let timers = Arc::new(ManualTimerScheduler::new());
        let collector = ChangeCollector::new(CollectorConfig::default(), Arc::new(clock.clone()))
            .with_timers(timers.clone());
        (collector, clock, timers)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_quiet_period_debounce() {
        let (collector, clock, timers) = setup();
        let a = doc("A");
        assert!(!collector.should_reindex(&a));

        collector.mark_dirty(&a, ChangeKind::Content);
        assert_eq!(timers.pending(&a), Some(ms(750)));
        clock.advance(ms(500));
        collector.mark_dirty(&a, ChangeKind::Content);
        clock.advance(ms(500));
        assert!(!collector.should_reindex(&a));
        clock.advance(ms(250));
        assert!(collector.should_reindex(&a));
        assert_eq!(collector.due_documents(), vec![a.clone()]);
    }

    #[test]
    fn test_presentational_change_is_ignored() {
        let (collector, clock, timers) = setup();
        let a = doc("A");
        assert!(!collector.mark_dirty(&a, ChangeKind::Presentational));
        clock.advance(Duration::from_secs(60));
        assert!(!collector.should_reindex(&a));
        assert!(timers.pending(&a).is_none());
    }

    #[test]
    fn test_ceiling_under_continuous_edits() {
        let (collector, clock, _) = setup();
        let a = doc("A");
        for _ in 0..60 {
            collector.mark_dirty(&a, ChangeKind::Content);
            clock.advance(ms(500));
            if collector.should_reindex(&a) {
                break;
            }
        }
        // 30 s ceiling reached while edits never paused for 750 ms.
        assert!(collector.should_reindex(&a));
        let first = collector.next_due(&a).unwrap();
        assert!(first <= clock.now());
    }

    #[test]
    fn test_min_interval_between_reindexes() {
        let (collector, clock, timers) = setup();
        let a = doc("A");
        collector.record_reindex(&a);
        collector.mark_dirty(&a, ChangeKind::Content);
        assert_eq!(timers.pending(&a), Some(Duration::from_secs(5)));

        clock.advance(Duration::from_secs(1));
        assert!(!collector.should_reindex(&a));
        clock.advance(Duration::from_secs(4));
        assert!(collector.should_reindex(&a));
    }

    #[test]
    fn test_flush_now_and_record() {
        let (collector, _clock, timers) = setup();
        let a = doc("A");
        assert!(!collector.flush_now(&a));

        collector.mark_dirty(&a, ChangeKind::Content);
        assert!(collector.flush_now(&a));
        assert!(collector.should_reindex(&a));

        collector.record_reindex(&a);
        assert!(!collector.is_dirty(&a));
        assert!(collector.next_due(&a).is_none());
        assert!(timers.pending(&a).is_none());
    }

    #[test]
    fn test_forget() {
        let (collector, _clock, _) = setup();
        let a = doc("A");
        collector.mark_dirty(&a, ChangeKind::Content);
        collector.forget(&a);
        assert!(!collector.is_dirty(&a));
    }

    fn snapshot(title: &str, layout: NodeLayout, name: &str) -> DocumentSnapshot {
        DocumentSnapshot {
            document_id: doc("D"),
            display_name: name.to_string(),
            source: None,
            nodes: vec![Node {
                guid: NodeGuid::parse("N1").unwrap(),
                legacy_id: None,
                title: title.to_string(),
                body: String::new(),
                semantic_type: SemanticType::Note,
                tags: Default::default(),
                parent: None,
                updated_at: Utc::now(),
                layout,
            }],
            groups: vec![],
        }
    }

    #[test]
    fn test_classify_change() {
        let base = snapshot("A", NodeLayout::default(), "Plan");
        assert_eq!(classify_change(&base, &base.clone()), None);

        let mut moved = snapshot(
            "A",
            NodeLayout {
                x: 10.0,
                y: 3.0,
                collapsed: true,
            },
            "Plan",
        );
        moved.nodes[0].updated_at = base.nodes[0].updated_at;
        assert_eq!(classify_change(&base, &moved), Some(ChangeKind::Presentational));

        let mut renamed = base.clone();
        renamed.display_name = "Plan v2".into();
        assert_eq!(classify_change(&base, &renamed), Some(ChangeKind::Presentational));

        let retitled = snapshot("B", NodeLayout::default(), "Plan");
        assert_eq!(classify_change(&base, &retitled), Some(ChangeKind::Content));
    }
}
