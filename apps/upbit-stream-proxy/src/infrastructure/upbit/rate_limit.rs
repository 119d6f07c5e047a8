//! Outbound Rate Limiter
//!
//! FIFO pacing for outbound control frames. Enqueued frames are never
//! dropped and never reordered; the paced consumer yields them separated by
//! at least the configured minimum interval. Delivery failures are the
//! consumer's concern and cannot stall or break the queue.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Producer half: enqueue frames for paced delivery.
#[derive(Debug)]
pub struct RateLimiter<T> {
    tx: mpsc::UnboundedSender<T>,
    cancel: CancellationToken,
}

/// Consumer half: yields frames with at least `min_interval` between them.
#[derive(Debug)]
pub struct PacedReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
    min_interval: Duration,
    last_yield: Option<Instant>,
    cancel: CancellationToken,
}

impl<T: Send + 'static> RateLimiter<T> {
    /// Create a limiter and its paced consumer.
    #[must_use]
    pub fn channel(min_interval: Duration) -> (Self, PacedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        (
            Self {
                tx,
                cancel: cancel.clone(),
            },
            PacedReceiver {
                rx,
                min_interval,
                last_yield: None,
                cancel,
            },
        )
    }

    /// Enqueue a frame. Returns `false` if the limiter was disposed.
    pub fn enqueue(&self, frame: T) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send(frame).is_ok()
    }

    /// Drop all pending frames and stop delivery.
    ///
    /// Idempotent. A frame already yielded by the consumer is unaffected;
    /// nothing else will be delivered.
    pub fn dispose(&self) {
        self.cancel.cancel();
    }
}

impl<T> PacedReceiver<T> {
    /// Receive the next frame, waiting out the pacing interval first.
    ///
    /// Returns `None` once the limiter is disposed or all producers are gone
    /// and the queue has drained.
    pub async fn recv(&mut self) -> Option<T> {
        if self.cancel.is_cancelled() {
            return None;
        }

        if let Some(last) = self.last_yield {
            let ready_at = last + self.min_interval;
            tokio::select! {
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep_until(ready_at) => {}
            }
        }

        tokio::select! {
            () = self.cancel.cancelled() => None,
            frame = self.rx.recv() => {
                if frame.is_some() {
                    self.last_yield = Some(Instant::now());
                }
                frame
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn frames_are_spaced_by_min_interval() {
        let (limiter, mut paced) = RateLimiter::channel(Duration::from_millis(500));

        for i in 0..3 {
            assert!(limiter.enqueue(i));
        }

        let start = Instant::now();
        let mut yields = Vec::new();
        for _ in 0..3 {
            let frame = paced.recv().await.unwrap();
            yields.push((frame, Instant::now() - start));
        }

        assert_eq!(yields[0].0, 0);
        assert_eq!(yields[1].0, 1);
        assert_eq!(yields[2].0, 2);

        assert!(yields[1].1 - yields[0].1 >= Duration::from_millis(500));
        assert!(yields[2].1 - yields[1].1 >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn first_frame_is_immediate() {
        let (limiter, mut paced) = RateLimiter::channel(Duration::from_secs(5));
        limiter.enqueue("subscribe");

        let start = Instant::now();
        assert_eq!(paced.recv().await, Some("subscribe"));
        assert!(Instant::now() - start < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_queue_does_not_accumulate_credit_debt() {
        let (limiter, mut paced) = RateLimiter::channel(Duration::from_millis(100));
        limiter.enqueue(1);
        assert_eq!(paced.recv().await, Some(1));

        // Long idle stretch, then a frame: delivered without extra delay.
        tokio::time::sleep(Duration::from_secs(10)).await;
        limiter.enqueue(2);
        let start = Instant::now();
        assert_eq!(paced.recv().await, Some(2));
        assert!(Instant::now() - start < Duration::from_millis(1));
    }

    #[tokio::test]
    async fn every_frame_is_delivered_exactly_once() {
        let (limiter, mut paced) = RateLimiter::channel(Duration::from_millis(1));

        for i in 0..20 {
            limiter.enqueue(i);
        }
        drop(limiter);

        let mut received = Vec::new();
        while let Some(frame) = paced.recv().await {
            received.push(frame);
        }
        assert_eq!(received, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn dispose_clears_pending_frames() {
        let (limiter, mut paced) = RateLimiter::channel(Duration::from_millis(10));

        limiter.enqueue(1);
        assert_eq!(paced.recv().await, Some(1));

        limiter.enqueue(2);
        limiter.enqueue(3);
        limiter.dispose();

        assert_eq!(paced.recv().await, None);
        assert!(!limiter.enqueue(4));
    }

    #[tokio::test]
    async fn dispose_is_idempotent() {
        let (limiter, mut paced) = RateLimiter::<u32>::channel(Duration::from_millis(10));
        limiter.dispose();
        limiter.dispose();
        assert_eq!(paced.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn consumer_waits_for_late_producers() {
        let (limiter, mut paced) = RateLimiter::channel(Duration::from_millis(50));

        let producer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            limiter.enqueue("late");
            limiter
        });

        assert_eq!(paced.recv().await, Some("late"));
        let limiter = producer.await.unwrap();
        drop(limiter);
        assert_eq!(paced.recv().await, None);
    }
}
