//! Bootstrap hydration: reconcile the lane index with records written by
//! other processes, then pick what fits the context budget.

use tracing::{debug, info};

use dolt_core::{PerLevel, Record, RecordLevel, SessionId};
use dolt_store::DoltStore;
use dolt_telemetry::events::{
    AssemblySnapshot as AssemblySnapshotEvent, BootstrapHydration, TelemetryKind,
};
use dolt_telemetry::{TelemetryBus, TelemetryEvent};

use crate::error::Result;

/// Selection order: summaries first, turns spend what is left.
const SELECTION_ORDER: [RecordLevel; 3] = [RecordLevel::Bindle, RecordLevel::Leaf, RecordLevel::Turn];

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssemblySnapshot {
    pub token_budget: u64,
    pub runtime_reserve_tokens: u64,
    pub effective_budget: u64,
    pub selected_token_total: u64,
    /// Per level, oldest first.
    pub selected: PerLevel<Vec<Record>>,
    pub active_token_totals: PerLevel<u64>,
    /// Records activated by reconciliation on this call.
    pub reconciled: PerLevel<u64>,
}

impl AssemblySnapshot {
    pub fn selected_counts(&self) -> PerLevel<u64> {
        PerLevel {
            turn: self.selected.turn.len() as u64,
            leaf: self.selected.leaf.len() as u64,
            bindle: self.selected.bindle.len() as u64,
        }
    }

    pub fn pointers(&self, level: RecordLevel) -> Vec<String> {
        self.selected.get(level).iter().map(|r| r.pointer.clone()).collect()
    }

    /// Context order: bindles, then leaves, then turns, each oldest first.
    pub fn context_records(&self) -> impl Iterator<Item = &Record> {
        self.selected
            .bindle
            .iter()
            .chain(self.selected.leaf.iter())
            .chain(self.selected.turn.iter())
    }

    pub fn render(&self) -> String {
        self.context_records()
            .map(Record::render_for_context)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Read-only toward history: never deactivates and never rolls up.
#[derive(Clone)]
pub struct BootstrapHydrator {
    store: DoltStore,
    bus: TelemetryBus,
}

impl BootstrapHydrator {
    pub fn new(store: DoltStore, bus: TelemetryBus) -> Self {
        Self { store, bus }
    }

    pub fn hydrate(
        &self,
        session_id: &SessionId,
        session_key: Option<&str>,
        token_budget: u64,
        runtime_reserve_tokens: u64,
    ) -> Result<AssemblySnapshot> {
        let reconciled = self.reconcile(session_id, session_key)?;

        let effective_budget = token_budget.saturating_sub(runtime_reserve_tokens);
        let lanes = self.store.lane_snapshot(session_id)?;
        let mut remaining = effective_budget;
        let mut selected = PerLevel::<Vec<Record>>::default();

        for level in SELECTION_ORDER {
            let active = self.store.list_active_records(session_id, level)?;
            let picked = selected.get_mut(level);
            for record in active.into_iter().rev() {
                if record.token_count > remaining {
                    break;
                }
                remaining -= record.token_count;
                picked.push(record);
            }
            picked.reverse();
        }

        let snapshot = AssemblySnapshot {
            token_budget,
            runtime_reserve_tokens,
            effective_budget,
            selected_token_total: effective_budget - remaining,
            selected,
            active_token_totals: lanes.active_tokens,
            reconciled,
        };

        self.bus.emit(TelemetryEvent::new(
            session_id,
            session_key,
            TelemetryKind::AssemblySnapshot(AssemblySnapshotEvent {
                token_budget,
                runtime_reserve_tokens,
                effective_budget,
                selected_token_total: snapshot.selected_token_total,
                lane_active_token_totals: snapshot.active_token_totals,
                lane_selected_record_counts: snapshot.selected_counts(),
            }),
        ));
        debug!(
            session_id = %session_id,
            effective_budget,
            selected_tokens = snapshot.selected_token_total,
            "assembly snapshot"
        );
        Ok(snapshot)
    }

    /// Activate records with no lane row that no summary claims as a child.
    fn reconcile(&self, session_id: &SessionId, session_key: Option<&str>) -> Result<PerLevel<u64>> {
        let roots = self.store.list_unindexed_roots(session_id)?;
        let activated = if roots.is_empty() {
            PerLevel::default()
        } else {
            self.store.activate_records(&roots)?
        };
        if !roots.is_empty() {
            info!(
                session_id = %session_id,
                turns = activated.turn,
                leaves = activated.leaf,
                bindles = activated.bindle,
                "hydrated unindexed records"
            );
        }
        self.bus.emit(TelemetryEvent::new(
            session_id,
            session_key,
            TelemetryKind::BootstrapHydration(BootstrapHydration {
                hydrated: !roots.is_empty(),
                activated_pointer_counts: activated,
            }),
        ));
        Ok(activated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ingest_turns, seed_active};
    use dolt_core::NewRecord;
    use dolt_telemetry::EventCollector;
    use serde_json::json;

    #[test]
    fn summaries_first_then_newest_turns() {
        let store = DoltStore::in_memory().unwrap();
        let bus = TelemetryBus::new();
        let sid = SessionId::from_raw("s1");
        seed_active(&store, &sid, RecordLevel::Bindle, &[(1, 300)]);
        seed_active(&store, &sid, RecordLevel::Leaf, &[(2, 200), (3, 200)]);
        let turns = ingest_turns(&store, &sid, &[100, 100, 100, 100]);

        let snapshot = BootstrapHydrator::new(store, bus)
            .hydrate(&sid, None, 1_200, 200)
            .unwrap();

        assert_eq!(snapshot.effective_budget, 1_000);
        assert_eq!(snapshot.selected_counts(), PerLevel { turn: 3, leaf: 2, bindle: 1 });
        assert_eq!(snapshot.selected_token_total, 1_000);
        assert_eq!(
            snapshot.pointers(RecordLevel::Turn),
            vec![turns[1].pointer.clone(), turns[2].pointer.clone(), turns[3].pointer.clone()]
        );
        let order: Vec<RecordLevel> = snapshot.context_records().map(|r| r.level).collect();
        assert_eq!(order[0], RecordLevel::Bindle);
        assert_eq!(*order.last().unwrap(), RecordLevel::Turn);
        assert_eq!(snapshot.active_token_totals.turn, 400);
    }

    #[test]
    fn selection_stops_at_first_misfit() {
        let store = DoltStore::in_memory().unwrap();
        let sid = SessionId::from_raw("s1");
        let turns = ingest_turns(&store, &sid, &[10, 500, 10]);

        let snapshot = BootstrapHydrator::new(store, TelemetryBus::new())
            .hydrate(&sid, None, 100, 0)
            .unwrap();
        // The 10-token oldest turn would fit but sits behind the misfit.
        assert_eq!(snapshot.pointers(RecordLevel::Turn), vec![turns[2].pointer.clone()]);
    }

    #[test]
    fn reserve_larger_than_budget_selects_nothing() {
        let store = DoltStore::in_memory().unwrap();
        let sid = SessionId::from_raw("s1");
        ingest_turns(&store, &sid, &[1]);
        let snapshot = BootstrapHydrator::new(store, TelemetryBus::new())
            .hydrate(&sid, None, 100, 500)
            .unwrap();
        assert_eq!(snapshot.effective_budget, 0);
        assert_eq!(snapshot.selected_token_total, 0);
        assert!(snapshot.render().is_empty());
    }

    #[test]
    fn reconciles_unindexed_records_and_reports_them() {
        let store = DoltStore::in_memory().unwrap();
        let bus = TelemetryBus::new();
        let collector = EventCollector::attach(&bus);
        let sid = SessionId::from_raw("s1");
        // Written by another process: record present, no lane row.
        store
            .upsert_record(&NewRecord {
                pointer: "turn:s1:msg:external".into(),
                session_id: sid.clone(),
                session_key: None,
                level: RecordLevel::Turn,
                event_ts_ms: 5,
                token_count: 40,
                payload: json!({"role": "user", "content": "from elsewhere"}),
                finalized_at_reset: false,
            })
            .unwrap();

        let hydrator = BootstrapHydrator::new(store.clone(), bus);
        let snapshot = hydrator.hydrate(&sid, Some("agent:main"), 1_000, 0).unwrap();
        assert_eq!(snapshot.reconciled.turn, 1);
        assert!(store.is_active(&sid, RecordLevel::Turn, "turn:s1:msg:external").unwrap());
        assert!(snapshot.render().contains("user: from elsewhere"));

        let again = hydrator.hydrate(&sid, None, 1_000, 0).unwrap();
        assert_eq!(again.reconciled, PerLevel::default());

        let hydration = collector.of_type("dolt_bootstrap_hydration");
        assert_eq!(hydration.len(), 2);
        match (&hydration[0].kind, &hydration[1].kind) {
            (TelemetryKind::BootstrapHydration(first), TelemetryKind::BootstrapHydration(second)) => {
                assert!(first.hydrated);
                assert_eq!(first.activated_pointer_counts.turn, 1);
                assert!(!second.hydrated);
            }
            other => panic!("unexpected events: {other:?}"),
        }
        assert_eq!(collector.of_type("dolt_assembly_snapshot").len(), 2);
    }

    #[test]
    fn hydration_never_deactivates() {
        let store = DoltStore::in_memory().unwrap();
        let sid = SessionId::from_raw("s1");
        ingest_turns(&store, &sid, &[5_000, 5_000]);
        let before = store.lane_snapshot(&sid).unwrap();
        BootstrapHydrator::new(store.clone(), TelemetryBus::new())
            .hydrate(&sid, None, 100, 0)
            .unwrap();
        assert_eq!(store.lane_snapshot(&sid).unwrap(), before);
    }
}
