use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;

use crate::model::TestSlot;

/// Drains the slot list with `min(workers, slots.len())` tasks. Every task
/// claims the next unclaimed slot through one shared atomic cursor, runs the
/// processor, then sleeps `call_delay` before the next claim to stay under
/// upstream rate limits. The processor is infallible by contract: a slot
/// failure is its job to record, never a reason to stop the pool.
pub async fn run_pool<F, Fut>(
    slots: Arc<Vec<TestSlot>>,
    workers: usize,
    call_delay: Duration,
    process: F,
) where
    F: Fn(TestSlot) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let workers = workers.max(1).min(slots.len());
    if workers == 0 {
        return;
    }
    let cursor = Arc::new(AtomicUsize::new(0));
    let mut pool = JoinSet::new();
    for _ in 0..workers {
        let slots = slots.clone();
        let cursor = cursor.clone();
        let process = process.clone();
        pool.spawn(async move {
            loop {
                let i = cursor.fetch_add(1, Ordering::SeqCst);
                let Some(slot) = slots.get(i).copied() else {
                    break;
                };
                process(slot).await;
                if !call_delay.is_zero() {
                    tokio::time::sleep(call_delay).await;
                }
            }
        });
    }
    while let Some(joined) = pool.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "worker task aborted");
        }
    }
}

/// Tracks completions per scenario so the "scenario complete" milestone
/// fires exactly once, no matter how workers interleave. Counts advance for
/// failed slots too; the milestone means "no more work here", not "all good".
pub struct ProgressBoard {
    inner: Mutex<BTreeMap<String, Progress>>,
}

#[derive(Debug, Clone, Copy)]
struct Progress {
    done: u32,
    total: u32,
}

impl ProgressBoard {
    pub fn new(expected: impl IntoIterator<Item = (String, u32)>) -> Self {
        let inner = expected
            .into_iter()
            .filter(|(_, total)| *total > 0)
            .map(|(id, total)| (id, Progress { done: 0, total }))
            .collect();
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Records one completed slot. Returns `Some((done, total))` only on the
    /// call that exhausts the scenario's expected count.
    pub fn advance(&self, scenario_id: &str) -> Option<(u32, u32)> {
        let mut inner = self.inner.lock().unwrap();
        let progress = inner.get_mut(scenario_id)?;
        progress.done += 1;
        if progress.done == progress.total {
            Some((progress.done, progress.total))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(n: usize) -> Arc<Vec<TestSlot>> {
        Arc::new(
            (0..n)
                .map(|i| TestSlot {
                    profile_idx: 0,
                    scenario_idx: i,
                    repetition: 0,
                })
                .collect(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn every_slot_is_claimed_exactly_once() {
        let claimed = Arc::new(Mutex::new(Vec::new()));
        let slots = slots(17);
        let claimed_in = claimed.clone();
        run_pool(slots, 4, Duration::from_millis(50), move |slot| {
            let claimed = claimed_in.clone();
            async move {
                claimed.lock().unwrap().push(slot.scenario_idx);
            }
        })
        .await;
        let mut seen = claimed.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..17).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn worker_count_never_exceeds_slot_count() {
        let peak = Arc::new(AtomicUsize::new(0));
        let live = Arc::new(AtomicUsize::new(0));
        let peak_in = peak.clone();
        run_pool(slots(2), 8, Duration::ZERO, move |_slot| {
            let peak = peak_in.clone();
            let live = live.clone();
            async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                live.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn empty_slot_list_returns_immediately() {
        run_pool(slots(0), 4, Duration::from_secs(60), |_slot| async {}).await;
    }

    #[test]
    fn milestone_fires_exactly_once() {
        let board = ProgressBoard::new([("s1".to_string(), 3), ("s2".to_string(), 1)]);
        assert_eq!(board.advance("s1"), None);
        assert_eq!(board.advance("s2"), Some((1, 1)));
        assert_eq!(board.advance("s1"), None);
        assert_eq!(board.advance("s1"), Some((3, 3)));
        // further completions (forced reruns) stay silent
        assert_eq!(board.advance("s1"), None);
        assert_eq!(board.advance("unknown"), None);
    }

    #[test]
    fn milestone_once_under_interleaving() {
        use std::sync::atomic::AtomicU32;
        let board = Arc::new(ProgressBoard::new([("s".to_string(), 64)]));
        let fired = Arc::new(AtomicU32::new(0));
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let board = board.clone();
                let fired = fired.clone();
                scope.spawn(move || {
                    for _ in 0..8 {
                        if board.advance("s").is_some() {
                            fired.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
