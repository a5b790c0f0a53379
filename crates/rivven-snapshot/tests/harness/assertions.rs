//! Assertions over split event streams

use rivven_snapshot::common::{Lsn, SplitEvent, TableId, WatermarkKind};

/// Fluent checks over a collected split event stream.
pub trait SplitEventVecExt {
    /// Events belonging to one split: its watermarks, its completion and the
    /// data changes of its table.
    fn for_split(&self, split_id: &str, table: &TableId) -> Vec<&SplitEvent<Lsn>>;

    fn watermarks(&self, split_id: &str, kind: WatermarkKind) -> Vec<Lsn>;

    fn data_change_count(&self) -> usize;

    fn completions(&self, split_id: &str) -> usize;

    /// Assert LOW → data changes → HIGH → completion for one split, with
    /// LOW ≤ HIGH. Returns the number of data changes.
    fn assert_bracketed(&self, split_id: &str, table: &TableId) -> usize;
}

impl SplitEventVecExt for Vec<SplitEvent<Lsn>> {
    fn for_split(&self, split_id: &str, table: &TableId) -> Vec<&SplitEvent<Lsn>> {
        self.iter()
            .filter(|e| match e {
                SplitEvent::DataChange(dc) => &dc.table_id == table,
                other => other.split_id() == Some(split_id),
            })
            .collect()
    }

    fn watermarks(&self, split_id: &str, kind: WatermarkKind) -> Vec<Lsn> {
        self.iter()
            .filter_map(|e| match e {
                SplitEvent::Watermark(w) if w.split_id == split_id && w.kind == kind => {
                    Some(w.position)
                }
                _ => None,
            })
            .collect()
    }

    fn data_change_count(&self) -> usize {
        self.iter()
            .filter(|e| matches!(e, SplitEvent::DataChange(_)))
            .count()
    }

    fn completions(&self, split_id: &str) -> usize {
        self.iter()
            .filter(|e| matches!(e, SplitEvent::SplitCompleted { split_id: id } if id == split_id))
            .count()
    }

    fn assert_bracketed(&self, split_id: &str, table: &TableId) -> usize {
        let events = self.for_split(split_id, table);
        assert!(events.len() >= 3, "split {split_id} too short: {events:#?}");

        let low = match events[0] {
            SplitEvent::Watermark(w) if w.kind == WatermarkKind::Low => w.position,
            other => panic!("split {split_id} does not start with LOW: {other:?}"),
        };
        let high = match events[events.len() - 2] {
            SplitEvent::Watermark(w) if w.kind == WatermarkKind::High => w.position,
            other => panic!("split {split_id} has no HIGH before completion: {other:?}"),
        };
        assert!(
            matches!(events[events.len() - 1], SplitEvent::SplitCompleted { .. }),
            "split {split_id} does not end with completion"
        );
        assert!(low <= high, "LOW {low} above HIGH {high}");

        let inner = &events[1..events.len() - 2];
        for event in inner {
            assert!(
                matches!(event, SplitEvent::DataChange(_)),
                "unexpected event inside bracket of {split_id}: {event:?}"
            );
        }
        inner.len()
    }
}
