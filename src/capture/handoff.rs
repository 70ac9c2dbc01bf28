// SPDX-License-Identifier: GPL-3.0-only

//! Latest-wins frame handoff from the capture thread to the preview
//!
//! A single shared slot holds the newest frame. Publishing swaps the slot
//! atomically; a frame still sitting there is replaced and counted as
//! dropped. The consumer is told about new frames through a
//! [`FrameNotifier`] and takes the frame with [`FrameConsumer::take_latest`].
//! Neither side ever blocks on the other.

use crate::decoder::PixelFormat;
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
use std::time::Duration;
use tracing::debug;

/// Frames kept by the producer for buffer reuse: one in the slot, one with
/// the consumer, one being filled
const RECYCLE_DEPTH: usize = 3;

/// Which kind of frame a session delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameChannel {
    /// Pixels the renderer draws as they are
    Direct,
    /// 8-bit samples drawn through the active palette
    Indexed,
}

/// One delivered frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub channel: FrameChannel,
    pub width: u32,
    pub height: u32,
    /// Row stride of the first plane in bytes
    pub stride: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    /// Driver capture timestamp
    pub timestamp: Duration,
    /// Driver frame sequence number
    pub sequence: u32,
}

impl DecodedFrame {
    /// Payload length in bytes
    pub fn bytes_used(&self) -> usize {
        self.data.len()
    }
}

/// Wake-up sent to the consumer's dispatch loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// A new frame is waiting on the given channel
    Frame(FrameChannel),
    /// The producer closed; no more frames will come
    Stopped,
}

/// Delivers wake-ups to the consumer
///
/// Called on the capture thread; must not block.
pub trait FrameNotifier: Send {
    fn notify(&self, wake: Wake);
}

impl<F> FrameNotifier for F
where
    F: Fn(Wake) + Send,
{
    fn notify(&self, wake: Wake) {
        self(wake)
    }
}

/// Notifier backed by a one-slot channel
///
/// While a wake is pending further wakes are coalesced into it.
pub struct WakeSender(SyncSender<Wake>);

/// Create a coalescing wake channel
pub fn wake_channel() -> (WakeSender, Receiver<Wake>) {
    let (tx, rx) = sync_channel(1);
    (WakeSender(tx), rx)
}

impl FrameNotifier for WakeSender {
    fn notify(&self, wake: Wake) {
        match self.0.try_send(wake) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                debug!(?wake, "Wake receiver gone");
            }
        }
    }
}

/// Handoff counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandoffStats {
    /// Frames put into the slot
    pub published: u64,
    /// Frames replaced before the consumer took them
    pub dropped: u64,
    /// Frames taken by the consumer
    pub taken: u64,
}

struct Shared {
    slot: ArcSwapOption<DecodedFrame>,
    channel: FrameChannel,
    closed: AtomicBool,
    published: AtomicU64,
    dropped: AtomicU64,
    taken: AtomicU64,
}

impl Shared {
    fn stats(&self) -> HandoffStats {
        HandoffStats {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            taken: self.taken.load(Ordering::Relaxed),
        }
    }
}

/// Capture-thread side of the handoff
pub struct FrameProducer {
    shared: Arc<Shared>,
    notifier: Box<dyn FrameNotifier>,
    /// Frames handed out earlier, reclaimed once nobody else holds them
    recycle: Vec<Arc<DecodedFrame>>,
    closed: bool,
}

/// Consumer side of the handoff
#[derive(Clone)]
pub struct FrameConsumer {
    shared: Arc<Shared>,
}

/// Create a handoff for `channel`
pub fn frame_handoff<N>(channel: FrameChannel, notifier: N) -> (FrameProducer, FrameConsumer)
where
    N: FrameNotifier + 'static,
{
    let shared = Arc::new(Shared {
        slot: ArcSwapOption::empty(),
        channel,
        closed: AtomicBool::new(false),
        published: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
        taken: AtomicU64::new(0),
    });
    (
        FrameProducer {
            shared: Arc::clone(&shared),
            notifier: Box::new(notifier),
            recycle: Vec::with_capacity(RECYCLE_DEPTH),
            closed: false,
        },
        FrameConsumer { shared },
    )
}

impl FrameProducer {
    pub fn channel(&self) -> FrameChannel {
        self.shared.channel
    }

    /// An empty byte buffer for the next frame, reusing a released frame's
    /// allocation when one is available
    pub fn take_buffer(&mut self) -> Vec<u8> {
        let Some(i) = self
            .recycle
            .iter()
            .position(|frame| Arc::strong_count(frame) == 1)
        else {
            return Vec::new();
        };
        match Arc::try_unwrap(self.recycle.swap_remove(i)) {
            Ok(frame) => {
                let mut data = frame.data;
                data.clear();
                data
            }
            Err(frame) => {
                self.recycle.push(frame);
                Vec::new()
            }
        }
    }

    /// Put `frame` into the slot and wake the consumer
    ///
    /// Returns `true` when an unconsumed frame was replaced.
    pub fn publish(&mut self, frame: DecodedFrame) -> bool {
        let frame = Arc::new(frame);
        if self.recycle.len() >= RECYCLE_DEPTH {
            self.recycle.remove(0);
        }
        self.recycle.push(Arc::clone(&frame));

        let replaced = self.shared.slot.swap(Some(frame)).is_some();
        self.shared.published.fetch_add(1, Ordering::Relaxed);
        if replaced {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notifier.notify(Wake::Frame(self.shared.channel));
        replaced
    }

    /// Mark the handoff finished and send the final `Stopped` wake
    ///
    /// A frame still in the slot stays available. Calling again does nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shared.closed.store(true, Ordering::Release);
        self.notifier.notify(Wake::Stopped);
    }

    pub fn stats(&self) -> HandoffStats {
        self.shared.stats()
    }
}

impl Drop for FrameProducer {
    fn drop(&mut self) {
        self.close();
    }
}

impl FrameConsumer {
    pub fn channel(&self) -> FrameChannel {
        self.shared.channel
    }

    /// Take the newest frame, leaving the slot empty
    pub fn take_latest(&self) -> Option<Arc<DecodedFrame>> {
        let frame = self.shared.slot.swap(None);
        if frame.is_some() {
            self.shared.taken.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    /// Whether the producer has closed
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> HandoffStats {
        self.shared.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn frame(sequence: u32, data: Vec<u8>) -> DecodedFrame {
        DecodedFrame {
            channel: FrameChannel::Direct,
            width: 2,
            height: 1,
            stride: 6,
            format: PixelFormat::Rgb24,
            data,
            timestamp: Duration::from_millis(sequence as u64 * 33),
            sequence,
        }
    }

    #[test]
    fn test_latest_wins() {
        let (mut producer, consumer) = frame_handoff(FrameChannel::Direct, |_| {});
        assert!(!producer.publish(frame(1, vec![1; 6])));
        assert!(producer.publish(frame(2, vec![2; 6])));

        let taken = consumer.take_latest().unwrap();
        assert_eq!(taken.sequence, 2);
        assert!(consumer.take_latest().is_none());
        assert_eq!(
            consumer.stats(),
            HandoffStats {
                published: 2,
                dropped: 1,
                taken: 1
            }
        );
    }

    #[test]
    fn test_wakes_and_close() {
        let wakes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&wakes);
        let (mut producer, consumer) = frame_handoff(FrameChannel::Indexed, move |w| {
            sink.lock().unwrap().push(w);
        });
        producer.publish(frame(1, vec![0; 6]));
        producer.close();
        producer.close();
        drop(producer);

        assert!(consumer.is_closed());
        assert_eq!(
            *wakes.lock().unwrap(),
            vec![Wake::Frame(FrameChannel::Indexed), Wake::Stopped]
        );
        // The last frame survives the close
        assert!(consumer.take_latest().is_some());
    }

    #[test]
    fn test_released_buffers_are_recycled() {
        let (mut producer, consumer) = frame_handoff(FrameChannel::Direct, |_| {});
        let mut data = producer.take_buffer();
        data.extend_from_slice(&[9; 64]);
        let ptr = data.as_ptr();
        producer.publish(frame(1, data));

        let held = consumer.take_latest().unwrap();
        // Still held by the consumer
        assert!(producer.take_buffer().capacity() == 0);
        drop(held);

        let reused = producer.take_buffer();
        assert!(reused.is_empty());
        assert_eq!(reused.as_ptr(), ptr);
        assert!(reused.capacity() >= 64);
    }

    #[test]
    fn test_wake_channel_coalesces() {
        let (tx, rx) = wake_channel();
        tx.notify(Wake::Frame(FrameChannel::Direct));
        tx.notify(Wake::Frame(FrameChannel::Direct));
        assert_eq!(rx.try_recv(), Ok(Wake::Frame(FrameChannel::Direct)));
        assert!(rx.try_recv().is_err());
        drop(rx);
        // No panic once the receiver is gone
        tx.notify(Wake::Stopped);
    }

    #[test]
    fn test_cross_thread_order_is_preserved() {
        let (tx, rx) = wake_channel();
        let (mut producer, consumer) = frame_handoff(FrameChannel::Direct, tx);
        let worker = std::thread::spawn(move || {
            for seq in 0..500 {
                let mut data = producer.take_buffer();
                data.resize(6, seq as u8);
                producer.publish(frame(seq, data));
            }
        });

        let mut last = None;
        loop {
            if let Some(f) = consumer.take_latest() {
                if let Some(prev) = last {
                    assert!(f.sequence > prev);
                }
                last = Some(f.sequence);
            }
            if consumer.is_closed() && rx.try_recv().is_err() {
                if let Some(f) = consumer.take_latest() {
                    assert!(Some(f.sequence) > last);
                    last = Some(f.sequence);
                }
                break;
            }
            let _ = rx.recv_timeout(Duration::from_millis(1));
        }
        worker.join().unwrap();
        assert_eq!(last, Some(499));
        let stats = consumer.stats();
        assert_eq!(stats.published, 500);
        assert_eq!(stats.taken + stats.dropped, 500);
    }
}
