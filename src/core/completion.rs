//! Completion policies deciding when a stressor stops issuing requests

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::info;

/// One-shot callback run when a completion first reports it is done
pub type CompletionHandler = Box<dyn FnOnce() + Send>;

/// Decides whether the stressors of a stage keep going
pub trait Completion: Send + Sync {
    /// Whether another request should be issued
    fn more_to_run(&self) -> bool;

    /// Report progress; returns true if a progress line was written
    fn log_progress(&self, _executed_ops: u64) -> bool {
        false
    }
}

/// Holds the completion handler and guarantees it runs at most once
struct HandlerSlot(Mutex<Option<CompletionHandler>>);

impl HandlerSlot {
    fn new(handler: Option<CompletionHandler>) -> Self {
        Self(Mutex::new(handler))
    }

    fn fire(&self) {
        let handler = self.0.lock().take();
        if let Some(handler) = handler {
            handler();
        }
    }
}

/// Rate limiter for progress lines shared by the stressors of a completion
struct ProgressLog {
    start: Instant,
    interval: Duration,
    /// Nanoseconds since `start` of the last progress line
    last_print: AtomicU64,
    print_lock: Mutex<()>,
}

impl ProgressLog {
    fn new(interval: Duration) -> Self {
        Self {
            start: Instant::now(),
            interval,
            last_print: AtomicU64::new(0),
            print_lock: Mutex::new(()),
        }
    }

    /// Elapsed time if a progress line is due, claiming the slot
    fn due(&self) -> Option<Duration> {
        let interval = self.interval.as_nanos() as u64;
        let now = self.start.elapsed().as_nanos() as u64;
        if now.saturating_sub(self.last_print.load(Ordering::Acquire)) < interval {
            return None;
        }

        let _guard = self.print_lock.lock();
        if now.saturating_sub(self.last_print.load(Ordering::Acquire)) < interval {
            return None;
        }
        self.last_print.store(now, Ordering::Release);
        Some(Duration::from_nanos(now))
    }
}

const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(20);

/// Time-bounded completion
///
/// A zero duration never completes on its own; the stage has to be stopped
/// externally through the [`StopSignal`].
pub struct TimeStressorCompletion {
    start: Instant,
    duration: Duration,
    progress: ProgressLog,
    handler: HandlerSlot,
}

impl TimeStressorCompletion {
    pub fn new(duration: Duration) -> Self {
        Self::with_handler(duration, None)
    }

    pub fn with_handler(duration: Duration, handler: Option<CompletionHandler>) -> Self {
        Self {
            start: Instant::now(),
            duration,
            progress: ProgressLog::new(DEFAULT_PROGRESS_INTERVAL),
            handler: HandlerSlot::new(handler),
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress.interval = interval;
        self
    }
}

impl Completion for TimeStressorCompletion {
    fn more_to_run(&self) -> bool {
        if self.duration.is_zero() {
            return true;
        }
        let more = self.start.elapsed() < self.duration;
        if !more {
            self.handler.fire();
        }
        more
    }

    fn log_progress(&self, executed_ops: u64) -> bool {
        let Some(elapsed) = self.progress.due() else {
            return false;
        };
        let remaining = if self.duration.is_zero() {
            Duration::ZERO
        } else {
            self.duration.saturating_sub(elapsed)
        };
        info!(
            executed_ops,
            elapsed = ?elapsed,
            remaining = ?remaining,
            total = ?self.duration,
            "Stressor progress"
        );
        true
    }
}

/// Completion bounded by the number of issued operations
///
/// Meant to be owned by a single stressor so the limit applies per thread.
pub struct OperationCountCompletion {
    limit: u64,
    issued: AtomicU64,
    progress: ProgressLog,
    handler: HandlerSlot,
}

impl OperationCountCompletion {
    pub fn new(limit: u64) -> Self {
        Self::with_handler(limit, None)
    }

    pub fn with_handler(limit: u64, handler: Option<CompletionHandler>) -> Self {
        Self {
            limit,
            issued: AtomicU64::new(0),
            progress: ProgressLog::new(DEFAULT_PROGRESS_INTERVAL),
            handler: HandlerSlot::new(handler),
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress.interval = interval;
        self
    }

    /// Operations issued so far
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Acquire).min(self.limit)
    }
}

impl Completion for OperationCountCompletion {
    fn more_to_run(&self) -> bool {
        let more = self.issued.fetch_add(1, Ordering::AcqRel) < self.limit;
        if !more {
            self.handler.fire();
        }
        more
    }

    fn log_progress(&self, executed_ops: u64) -> bool {
        let Some(elapsed) = self.progress.due() else {
            return false;
        };
        info!(
            executed_ops,
            elapsed = ?elapsed,
            remaining_ops = self.limit.saturating_sub(executed_ops),
            total_ops = self.limit,
            "Stressor progress"
        );
        true
    }
}

/// Cooperative cancellation flag shared by every stressor of a worker
#[derive(Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear the flag before the next stage starts
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_handler(counter: &Arc<AtomicUsize>) -> Option<CompletionHandler> {
        let counter = counter.clone();
        Some(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_zero_duration_runs_forever() {
        let fired = Arc::new(AtomicUsize::new(0));
        let completion = TimeStressorCompletion::with_handler(Duration::ZERO, counting_handler(&fired));

        for _ in 0..10_000 {
            assert!(completion.more_to_run());
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_fires_once_with_concurrent_callers() {
        let fired = Arc::new(AtomicUsize::new(0));
        let completion = Arc::new(TimeStressorCompletion::with_handler(
            Duration::from_millis(20),
            counting_handler(&fired),
        ));
        assert!(completion.more_to_run());

        std::thread::sleep(Duration::from_millis(40));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let completion = completion.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        assert!(!completion.more_to_run());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_completion_expires() {
        let completion = TimeStressorCompletion::new(Duration::from_secs(5));
        assert!(completion.more_to_run());

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(completion.more_to_run());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!completion.more_to_run());
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_logged_once_per_interval() {
        let completion = Arc::new(
            TimeStressorCompletion::new(Duration::from_secs(60))
                .with_progress_interval(Duration::from_secs(20)),
        );

        assert!(!completion.log_progress(1));

        tokio::time::advance(Duration::from_secs(21)).await;
        let logged: usize = (0..10)
            .map(|i| completion.log_progress(i) as usize)
            .sum();
        assert_eq!(logged, 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!completion.log_progress(100));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(completion.log_progress(200));
    }

    #[test]
    fn test_operation_count_completion() {
        let fired = Arc::new(AtomicUsize::new(0));
        let completion = OperationCountCompletion::with_handler(3, counting_handler(&fired));

        assert!(completion.more_to_run());
        assert!(completion.more_to_run());
        assert!(completion.more_to_run());
        assert!(!completion.more_to_run());
        assert!(!completion.more_to_run());
        assert_eq!(completion.issued(), 3);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_count_progress_logged_once_per_interval() {
        let completion = OperationCountCompletion::new(1_000).with_progress_interval(Duration::from_secs(10));

        assert!(!completion.log_progress(1));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(completion.log_progress(400));
        assert!(!completion.log_progress(401));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(completion.log_progress(800));
    }

    #[test]
    fn test_stop_signal() {
        let signal = StopSignal::new();
        let shared = signal.clone();
        assert!(!shared.is_raised());
        signal.raise();
        assert!(shared.is_raised());
        shared.reset();
        assert!(!signal.is_raised());
    }
}
