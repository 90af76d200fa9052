//! Background job execution with at most one running job per key.
//!
//! Jobs for different keys run in parallel, bounded by a shared permit pool.
//! A job is told to stop through its [`CancellationToken`]; cancellation is
//! cooperative, the job decides where to bail out.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

struct RunningJob {
    id: u64,
    token: CancellationToken,
}

type Jobs = Arc<Mutex<HashMap<String, RunningJob>>>;

/// Clears the running marker of a job when its task ends, including on panic.
struct JobGuard {
    jobs: Jobs,
    key: String,
    id: u64,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        let mut jobs = self.jobs.lock();
        // a forced replacement may already own the key
        if jobs.get(&self.key).is_some_and(|job| job.id == self.id) {
            jobs.remove(&self.key);
        }
    }
}

pub struct ConstrainedExecutor {
    jobs: Jobs,
    permits: Arc<Semaphore>,
    next_id: AtomicU64,
}

impl ConstrainedExecutor {
    pub fn new(max_concurrent_jobs: usize) -> Self {
        ConstrainedExecutor {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            next_id: AtomicU64::new(1),
        }
    }

    /// Spawns `job` unless one is already running for `key`.
    /// Returns whether the job was spawned.
    pub fn may_execute<F, Fut>(&self, key: &str, job: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(key) {
            return false;
        }
        let (id, token) = self.register(&mut jobs, key);
        drop(jobs);
        self.spawn(key, id, token.clone(), job(token));
        true
    }

    /// Spawns `job`, cancelling and replacing any job running for `key`.
    /// Returns whether a running job was cancelled.
    pub fn must_execute<F, Fut>(&self, key: &str, job: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut jobs = self.jobs.lock();
        let cancelled = match jobs.remove(key) {
            Some(previous) => {
                previous.token.cancel();
                true
            }
            None => false,
        };
        let (id, token) = self.register(&mut jobs, key);
        drop(jobs);
        self.spawn(key, id, token.clone(), job(token));
        cancelled
    }

    pub fn cancel_running_with_key(&self, key: &str) -> bool {
        match self.jobs.lock().remove(key) {
            Some(job) => {
                job.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn has_running_with_key(&self, key: &str) -> bool {
        self.jobs.lock().contains_key(key)
    }

    pub fn running_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.jobs.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn cancel_all(&self) {
        for (_, job) in self.jobs.lock().drain() {
            job.token.cancel();
        }
    }

    fn register(
        &self,
        jobs: &mut HashMap<String, RunningJob>,
        key: &str,
    ) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        jobs.insert(
            key.to_string(),
            RunningJob {
                id,
                token: token.clone(),
            },
        );
        (id, token)
    }

    fn spawn<Fut>(&self, key: &str, id: u64, token: CancellationToken, job: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let guard = JobGuard {
            jobs: self.jobs.clone(),
            key: key.to_string(),
            id,
        };
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let _permit = tokio::select! {
                _ = token.cancelled() => return,
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            job.await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::wait_until;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_may_execute_once_per_key() {
        let executor = ConstrainedExecutor::new(5);
        let (release, released) = oneshot::channel::<()>();

        assert!(executor.may_execute("repo", |_| async move {
            let _ = released.await;
        }));
        assert!(executor.has_running_with_key("repo"));
        assert!(!executor.may_execute("repo", |_| async {}));
        // other keys are independent
        assert!(executor.may_execute("other", |_| async {}));

        release.send(()).unwrap();
        wait_until(|| !executor.has_running_with_key("repo")).await;
        assert!(executor.may_execute("repo", |_| async {}));
    }

    #[tokio::test]
    async fn test_must_execute_cancels_previous() {
        let executor = ConstrainedExecutor::new(5);
        let first_cancelled = Arc::new(AtomicBool::new(false));
        let flag = first_cancelled.clone();

        assert!(!executor.must_execute("repo", |token| async move {
            token.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        }));

        let second_ran = Arc::new(AtomicBool::new(false));
        let ran = second_ran.clone();
        assert!(executor.must_execute("repo", |_| async move {
            ran.store(true, Ordering::SeqCst);
        }));

        wait_until(|| first_cancelled.load(Ordering::SeqCst)).await;
        wait_until(|| second_ran.load(Ordering::SeqCst)).await;
        wait_until(|| executor.running_keys().is_empty()).await;
    }

    #[tokio::test]
    async fn test_replaced_job_does_not_clear_new_marker() {
        let executor = ConstrainedExecutor::new(5);
        let (release, released) = oneshot::channel::<()>();

        // ignores cancellation and finishes late
        executor.may_execute("repo", |_| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
        });
        executor.must_execute("repo", |_| async move {
            let _ = released.await;
        });
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(executor.has_running_with_key("repo"));

        release.send(()).unwrap();
        wait_until(|| !executor.has_running_with_key("repo")).await;
    }

    #[tokio::test]
    async fn test_panicking_job_clears_marker() {
        let executor = ConstrainedExecutor::new(5);
        executor.may_execute("repo", |_| async {
            panic!("job blew up");
        });
        wait_until(|| !executor.has_running_with_key("repo")).await;
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        let executor = ConstrainedExecutor::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for i in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            executor.may_execute(&format!("repo-{i}"), |_| async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }
        wait_until(|| executor.running_keys().is_empty()).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let executor = ConstrainedExecutor::new(5);
        for key in ["a", "b"] {
            executor.may_execute(key, |token| async move { token.cancelled().await });
        }
        assert_eq!(executor.running_keys(), vec!["a".to_string(), "b".to_string()]);
        executor.cancel_all();
        assert!(executor.running_keys().is_empty());
        assert!(!executor.cancel_running_with_key("a"));
    }
}
