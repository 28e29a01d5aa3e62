//! Delivery of per-frame outputs to consumers.
//!
//! Each subscriber gets its own bounded channel. A slow subscriber never
//! blocks the pipeline: when its queue is full the oldest undelivered event is
//! discarded to make room.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::detect::DetectionSet;
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::pipeline::{RunSummary, StageTimings};
use crate::stats::StatisticsSnapshot;

/// Default per-subscriber queue depth.
pub const DEFAULT_CAPACITY: usize = 4;

/// The three artifacts of one cycle, built from one detection set.
#[derive(Debug)]
pub struct OutputTriple {
    pub sequence: u64,
    pub annotated: Arc<Frame>,
    pub raw: Arc<Frame>,
    pub detections: Arc<DetectionSet>,
    /// `Err(Schema)` when a detection named a class the label map lacks.
    pub statistics: Result<StatisticsSnapshot, PipelineError>,
    pub timings: StageTimings,
}

#[derive(Clone, Debug)]
pub enum PipelineEvent {
    Frame(Arc<OutputTriple>),
    RunEnded(RunSummary),
}

/// Outcome of one `publish` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Older events evicted to make room.
    pub dropped: usize,
    pub failed: usize,
    pub pruned: usize,
}

struct Slot {
    id: usize,
    sender: Sender<PipelineEvent>,
    // Second handle on the queue, used to evict the oldest event. It keeps
    // the channel connected, so `active` is the only liveness signal.
    drain: Receiver<PipelineEvent>,
    active: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

/// Consumer end of a fanout subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: usize,
    receiver: Receiver<PipelineEvent>,
    active: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn recv(&self) -> Option<PipelineEvent> {
        self.receiver.recv().ok()
    }

    /// `None` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<PipelineEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<PipelineEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Everything currently queued, oldest first.
    pub fn drain(&self) -> Vec<PipelineEvent> {
        self.receiver.try_iter().collect()
    }

    /// Events discarded because this subscriber fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

pub struct OutputFanout {
    slots: Mutex<Vec<Slot>>,
    next_id: AtomicU64,
}

impl OutputFanout {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a consumer with a queue of `capacity` events (at least one).
    pub fn subscribe(&self, capacity: usize) -> Subscription {
        let (sender, receiver) = bounded(capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) as usize;
        let active = Arc::new(AtomicBool::new(true));
        let dropped = Arc::new(AtomicU64::new(0));
        let slot = Slot {
            id,
            sender,
            drain: receiver.clone(),
            active: active.clone(),
            dropped: dropped.clone(),
        };
        self.lock_slots().push(slot);
        log::debug!("fanout: subscriber {} registered (capacity {})", id, capacity.max(1));
        Subscription {
            id,
            receiver,
            active,
            dropped,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_slots()
            .iter()
            .filter(|slot| slot.active.load(Ordering::Acquire))
            .count()
    }

    /// Offer `event` to every live subscriber without blocking.
    pub fn publish(&self, event: PipelineEvent) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut slots = self.lock_slots();

        let before = slots.len();
        slots.retain(|slot| slot.active.load(Ordering::Acquire));
        report.pruned = before - slots.len();
        if report.pruned > 0 {
            log::debug!("fanout: pruned {} closed subscriber(s)", report.pruned);
        }

        for slot in slots.iter() {
            match deliver(slot, event.clone()) {
                Ok(evicted) => {
                    report.delivered += 1;
                    if evicted {
                        report.dropped += 1;
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    log::warn!("fanout: {}", err);
                }
            }
        }
        report
    }
}

impl Default for OutputFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputFanout {
    fn lock_slots(&self) -> std::sync::MutexGuard<'_, Vec<Slot>> {
        // A panic while holding the lock leaves the slot list consistent.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Returns whether an older event had to be evicted.
fn deliver(slot: &Slot, event: PipelineEvent) -> Result<bool, PipelineError> {
    // `drain` holds the channel open, so the only possible failure is Full.
    let event = match slot.sender.try_send(event) {
        Ok(()) => return Ok(false),
        Err(err) => err.into_inner(),
    };

    // The consumer may have raced us and emptied the queue; either way one
    // slot is free after this.
    if slot.drain.try_recv().is_ok() {
        let total = slot.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        log::warn!(
            "fanout: subscriber {} is behind, dropped oldest event ({} total)",
            slot.id,
            total
        );
    }
    slot.sender
        .try_send(event)
        .map(|()| true)
        .map_err(|err| PipelineError::Delivery {
            subscriber: slot.id,
            detail: format!("queue still full after eviction: {}", err),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_event(sequence: u64) -> PipelineEvent {
        let frame = Arc::new(
            Frame::from_rgb(vec![0; 3], 1, 1)
                .unwrap()
                .with_sequence(sequence),
        );
        PipelineEvent::Frame(Arc::new(OutputTriple {
            sequence,
            annotated: frame.clone(),
            raw: frame,
            detections: Arc::new(DetectionSet::default()),
            statistics: Ok(StatisticsSnapshot::default()),
            timings: StageTimings::default(),
        }))
    }

    fn sequences(events: Vec<PipelineEvent>) -> Vec<u64> {
        events
            .into_iter()
            .filter_map(|event| match event {
                PipelineEvent::Frame(triple) => Some(triple.sequence),
                PipelineEvent::RunEnded(_) => None,
            })
            .collect()
    }

    #[test]
    fn every_subscriber_sees_every_event_in_order() {
        let fanout = OutputFanout::new();
        let a = fanout.subscribe(8);
        let b = fanout.subscribe(8);
        for seq in 0..5 {
            let report = fanout.publish(frame_event(seq));
            assert_eq!(report.delivered, 2);
        }
        assert_eq!(sequences(a.drain()), vec![0, 1, 2, 3, 4]);
        assert_eq!(sequences(b.drain()), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn full_queue_drops_oldest() {
        let fanout = OutputFanout::new();
        let slow = fanout.subscribe(2);
        let mut dropped = 0;
        for seq in 0..5 {
            dropped += fanout.publish(frame_event(seq)).dropped;
        }
        assert_eq!(dropped, 3);
        assert_eq!(slow.dropped(), 3);
        assert_eq!(sequences(slow.drain()), vec![3, 4]);
    }

    #[test]
    fn dropped_subscriptions_are_pruned() {
        let fanout = OutputFanout::new();
        let keep = fanout.subscribe(4);
        let gone = fanout.subscribe(4);
        assert_eq!(fanout.subscriber_count(), 2);
        drop(gone);
        let report = fanout.publish(frame_event(0));
        assert_eq!(report.pruned, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(fanout.subscriber_count(), 1);
        assert_eq!(sequences(keep.drain()), vec![0]);
    }

    #[test]
    fn zero_capacity_still_buffers_one_event() {
        let fanout = OutputFanout::new();
        let sub = fanout.subscribe(0);
        fanout.publish(frame_event(1));
        fanout.publish(frame_event(2));
        assert_eq!(sequences(sub.drain()), vec![2]);
    }
}
