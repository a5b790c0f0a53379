//! Ordered output channel for split events

use crate::common::error::{CdcError, Result};
use crate::common::event::{
    DataChangeEvent, SourcePartition, SplitEvent, WatermarkEvent, WatermarkKind,
};
use crate::common::position::Position;
use crate::common::split::TableId;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Destination of watermark and data change events.
///
/// Calls must be delivered in submission order. Implementations shared by
/// concurrent splits serialize writes internally.
#[async_trait]
pub trait EventSink<P: Position>: Send + Sync {
    async fn emit_watermark(
        &self,
        partition: &SourcePartition,
        split_id: &str,
        position: P,
        kind: WatermarkKind,
    ) -> Result<()>;

    async fn emit_data_change(&self, table_id: &TableId, event: DataChangeEvent<P>) -> Result<()>;

    /// Signal that no further events for `split_id` will arrive.
    async fn complete_split(&self, split_id: &str) -> Result<()>;
}

#[async_trait]
impl<P: Position, K: EventSink<P> + ?Sized> EventSink<P> for Arc<K> {
    async fn emit_watermark(
        &self,
        partition: &SourcePartition,
        split_id: &str,
        position: P,
        kind: WatermarkKind,
    ) -> Result<()> {
        (**self)
            .emit_watermark(partition, split_id, position, kind)
            .await
    }

    async fn emit_data_change(&self, table_id: &TableId, event: DataChangeEvent<P>) -> Result<()> {
        (**self).emit_data_change(table_id, event).await
    }

    async fn complete_split(&self, split_id: &str) -> Result<()> {
        (**self).complete_split(split_id).await
    }
}

/// Event sink over a bounded tokio channel.
///
/// Cloning yields another handle to the same channel. A full channel blocks
/// only the emitting task.
#[derive(Debug)]
pub struct ChannelEventSink<P> {
    tx: mpsc::Sender<SplitEvent<P>>,
}

impl<P> Clone for ChannelEventSink<P> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<P: Position> ChannelEventSink<P> {
    pub fn new(tx: mpsc::Sender<SplitEvent<P>>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiver the merge stage reads from.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SplitEvent<P>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    async fn send(&self, event: SplitEvent<P>) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| CdcError::sink_closed("split event receiver dropped"))
    }
}

#[async_trait]
impl<P: Position> EventSink<P> for ChannelEventSink<P> {
    async fn emit_watermark(
        &self,
        partition: &SourcePartition,
        split_id: &str,
        position: P,
        kind: WatermarkKind,
    ) -> Result<()> {
        self.send(SplitEvent::Watermark(WatermarkEvent {
            partition: partition.clone(),
            split_id: split_id.to_string(),
            kind,
            position,
        }))
        .await
    }

    async fn emit_data_change(&self, _table_id: &TableId, event: DataChangeEvent<P>) -> Result<()> {
        self.send(SplitEvent::DataChange(event)).await
    }

    async fn complete_split(&self, split_id: &str) -> Result<()> {
        self.send(SplitEvent::SplitCompleted {
            split_id: split_id.to_string(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::position::Lsn;

    #[tokio::test]
    async fn test_channel_sink_preserves_order() {
        let (sink, mut rx) = ChannelEventSink::<Lsn>::channel(8);
        let partition = SourcePartition::default();

        sink.emit_watermark(&partition, "s1", Lsn(1), WatermarkKind::Low)
            .await
            .unwrap();
        sink.emit_watermark(&partition, "s1", Lsn(2), WatermarkKind::High)
            .await
            .unwrap();
        sink.complete_split("s1").await.unwrap();

        assert!(rx.recv().await.unwrap().is_watermark(WatermarkKind::Low));
        assert!(rx.recv().await.unwrap().is_watermark(WatermarkKind::High));
        assert_eq!(
            rx.recv().await.unwrap(),
            SplitEvent::SplitCompleted {
                split_id: "s1".into()
            }
        );
    }

    #[tokio::test]
    async fn test_channel_sink_closed() {
        let (sink, rx) = ChannelEventSink::<Lsn>::channel(1);
        drop(rx);
        let err = sink.complete_split("s1").await.unwrap_err();
        assert!(matches!(err, CdcError::SinkClosed(_)));
    }
}
