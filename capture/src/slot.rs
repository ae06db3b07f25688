use crossbeam_channel::{bounded, Receiver, Sender};
use rewind_common::frame::Frame;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Mutex-guarded "most recent frame" cell shared between an acquisition
/// thread (writer) and the consumer (reader).
///
/// A one-slot channel carries publish notifications to a reader waiting on
/// an empty cell. Tokens may be stale; the reader always rechecks the cell.
#[derive(Debug)]
pub(crate) struct LatestFrame {
    frame: Mutex<Option<Frame>>,
    notify_tx: Sender<()>,
    notify_rx: Receiver<()>,
}

impl Default for LatestFrame {
    fn default() -> Self {
        let (notify_tx, notify_rx) = bounded(1);
        Self {
            frame: Mutex::new(None),
            notify_tx,
            notify_rx,
        }
    }
}

impl LatestFrame {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replace the cached frame and wake a reader waiting for one.
    pub(crate) fn publish(&self, frame: Frame) {
        *self.lock() = Some(frame);
        // Full means a wakeup is already pending.
        let _ = self.notify_tx.try_send(());
    }

    /// Drop the cached frame. Readers will wait again until the next publish.
    pub(crate) fn clear(&self) {
        *self.lock() = None;
    }

    pub(crate) fn latest(&self) -> Option<Frame> {
        self.lock().clone()
    }

    /// Like `latest`, but if the slot is empty wait up to `timeout` for a
    /// publish before giving up.
    pub(crate) fn wait_latest(&self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.latest() {
                return Some(frame);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || self.notify_rx.recv_timeout(remaining).is_err() {
                return self.latest();
            }
            if let Some(frame) = self.latest() {
                // Pass the wakeup on to any other waiting reader.
                let _ = self.notify_tx.try_send(());
                return Some(frame);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Frame>> {
        self.frame.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn empty_slot_times_out() {
        let slot = LatestFrame::new();
        let start = Instant::now();
        assert!(slot.wait_latest(Duration::from_millis(40)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn waiting_reader_sees_publish() {
        let slot = Arc::new(LatestFrame::new());
        let reader = Arc::clone(&slot);
        let handle = std::thread::spawn(move || reader.wait_latest(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));
        slot.publish(Frame::filled(2, 2, 9).unwrap());
        let frame = handle.join().unwrap().expect("frame published");
        assert_eq!(frame.data()[0], 9);
    }

    #[test]
    fn stale_wakeup_after_clear_keeps_waiting() {
        let slot = LatestFrame::new();
        slot.publish(Frame::filled(2, 2, 1).unwrap());
        slot.clear();
        let start = Instant::now();
        assert!(slot.wait_latest(Duration::from_millis(40)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn two_waiting_readers_both_wake() {
        let slot = Arc::new(LatestFrame::new());
        let readers: Vec<_> = (0..2)
            .map(|_| {
                let reader = Arc::clone(&slot);
                std::thread::spawn(move || reader.wait_latest(Duration::from_secs(5)))
            })
            .collect();
        std::thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        slot.publish(Frame::filled(2, 2, 3).unwrap());
        for reader in readers {
            assert!(reader.join().unwrap().is_some());
        }
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn clear_empties_the_slot() {
        let slot = LatestFrame::new();
        slot.publish(Frame::filled(2, 2, 1).unwrap());
        assert!(slot.latest().is_some());
        slot.clear();
        assert!(slot.latest().is_none());
    }
}
