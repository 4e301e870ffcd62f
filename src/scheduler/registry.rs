//! Registry of connected workers and their concurrency shares.
//!
//! Membership changes and the rebalance they trigger happen under one
//! lock, so a reader never observes a partially redistributed budget.
//! The lock is never held across socket I/O: callers receive the new
//! assignment and talk to the worker after the critical section.
//!
//! Only the joining worker is told its share. Workers that joined earlier
//! keep running at the share they were last sent until they reconnect.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::metrics::MetricsCollector;

/// Identifier assigned to a worker when it joins.
pub type WorkerId = Uuid;

/// A registered worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub peer: SocketAddr,
    pub joined_at: DateTime<Utc>,
    /// Share of the budget computed by the last rebalance.
    pub concurrency: usize,
}

/// Result of registering a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerAssignment {
    pub id: WorkerId,
    /// Share to send to the new worker.
    pub concurrency: usize,
    /// Number of registered workers after the join.
    pub workers: usize,
}

/// Splits `total` across `workers` shares in join order.
///
/// Every share is `total / workers`; the first `total % workers` shares get
/// one extra. Returns an empty vector when there are no workers.
pub fn distribute(total: usize, workers: usize) -> Vec<usize> {
    if workers == 0 {
        return Vec::new();
    }
    let base = total / workers;
    let remainder = total % workers;
    (0..workers)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

fn rebalance_locked(workers: &mut [WorkerInfo], total: usize) {
    let shares = distribute(total, workers.len());
    for (worker, share) in workers.iter_mut().zip(shares) {
        worker.concurrency = share;
    }
}

/// Live registry of connected workers, shared by all sessions.
#[derive(Debug, Default)]
pub struct Registry {
    workers: Mutex<Vec<WorkerInfo>>,
    metrics: MetricsCollector,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a worker and rebalances `total` across all workers.
    ///
    /// The caller is responsible for sending the returned concurrency to
    /// the worker.
    pub async fn add_worker(&self, peer: SocketAddr, total: usize) -> WorkerAssignment {
        let mut workers = self.workers.lock().await;

        let id = Uuid::new_v4();
        workers.push(WorkerInfo {
            id,
            peer,
            joined_at: Utc::now(),
            concurrency: 0,
        });
        rebalance_locked(&mut workers, total);

        let concurrency = workers.last().map_or(0, |w| w.concurrency);
        let shares: Vec<usize> = workers.iter().map(|w| w.concurrency).collect();
        self.metrics.record_worker_joined(workers.len());

        info!(
            worker_id = %id,
            peer = %peer,
            concurrency = concurrency,
            workers = workers.len(),
            distribution = ?shares,
            "Worker registered"
        );

        WorkerAssignment {
            id,
            concurrency,
            workers: workers.len(),
        }
    }

    /// Removes a worker and rebalances `total` over the remaining ones.
    ///
    /// Returns false if `id` was not registered.
    pub async fn remove_worker(&self, id: WorkerId, total: usize) -> bool {
        let mut workers = self.workers.lock().await;

        let Some(position) = workers.iter().position(|w| w.id == id) else {
            debug!(worker_id = %id, "Worker already removed");
            return false;
        };
        let removed = workers.remove(position);
        rebalance_locked(&mut workers, total);

        let shares: Vec<usize> = workers.iter().map(|w| w.concurrency).collect();
        self.metrics.record_worker_left(workers.len());

        info!(
            worker_id = %id,
            peer = %removed.peer,
            workers = workers.len(),
            distribution = ?shares,
            "Worker deregistered"
        );
        true
    }

    /// Recomputes every worker's share of `total`.
    pub async fn rebalance(&self, total: usize) {
        let mut workers = self.workers.lock().await;
        rebalance_locked(&mut workers, total);
        debug!(
            workers = workers.len(),
            total = total,
            "Rebalanced concurrency"
        );
    }

    /// Returns a copy of the current registry contents in join order.
    pub async fn inspect(&self) -> Vec<WorkerInfo> {
        self.workers.lock().await.clone()
    }

    /// Number of registered workers.
    pub async fn len(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// Returns true if no worker is registered.
    pub async fn is_empty(&self) -> bool {
        self.workers.lock().await.is_empty()
    }

    /// Sum of all assigned shares.
    pub async fn total_assigned(&self) -> usize {
        self.workers.lock().await.iter().map(|w| w.concurrency).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    async fn shares(registry: &Registry) -> Vec<usize> {
        registry
            .inspect()
            .await
            .iter()
            .map(|w| w.concurrency)
            .collect()
    }

    #[test]
    fn test_distribute_no_workers() {
        assert!(distribute(10, 0).is_empty());
    }

    #[test]
    fn test_distribute_properties() {
        for workers in 1..=12 {
            for total in 0..=60 {
                let shares = distribute(total, workers);
                assert_eq!(shares.len(), workers);
                assert_eq!(shares.iter().sum::<usize>(), total);

                let low = total / workers;
                let high = low + usize::from(total % workers != 0);
                assert!(shares.iter().all(|&s| s == low || s == high));

                // The higher shares go to the earliest joiners.
                let remainder = total % workers;
                assert!(shares[..remainder].iter().all(|&s| s == low + 1));
                assert!(shares[remainder..].iter().all(|&s| s == low));
            }
        }
    }

    #[tokio::test]
    async fn test_single_worker_takes_whole_budget() {
        let registry = Registry::new();
        let assignment = registry.add_worker(peer(1), 5).await;

        assert_eq!(assignment.concurrency, 5);
        assert_eq!(assignment.workers, 1);
        assert_eq!(shares(&registry).await, vec![5]);
    }

    #[tokio::test]
    async fn test_sequential_joins_rebalance_everyone() {
        let registry = Registry::new();

        let first = registry.add_worker(peer(1), 10).await;
        assert_eq!(first.concurrency, 10);
        assert_eq!(shares(&registry).await, vec![10]);

        let second = registry.add_worker(peer(2), 10).await;
        assert_eq!(second.concurrency, 5);
        assert_eq!(shares(&registry).await, vec![5, 5]);

        let third = registry.add_worker(peer(3), 10).await;
        assert_eq!(third.concurrency, 3);
        assert_eq!(shares(&registry).await, vec![4, 3, 3]);
    }

    #[tokio::test]
    async fn test_rebalance_is_idempotent() {
        let registry = Registry::new();
        for port in 1..=3 {
            registry.add_worker(peer(port), 10).await;
        }

        registry.rebalance(10).await;
        let once = shares(&registry).await;
        registry.rebalance(10).await;
        assert_eq!(shares(&registry).await, once);
        assert_eq!(once, vec![4, 3, 3]);
    }

    #[tokio::test]
    async fn test_remove_worker_reclaims_capacity() {
        let registry = Registry::new();
        let first = registry.add_worker(peer(1), 10).await;
        registry.add_worker(peer(2), 10).await;
        registry.add_worker(peer(3), 10).await;

        assert!(registry.remove_worker(first.id, 10).await);
        assert_eq!(shares(&registry).await, vec![5, 5]);
        assert_eq!(registry.total_assigned().await, 10);

        let remaining = registry.inspect().await;
        assert_eq!(remaining[0].peer, peer(2));
        assert_eq!(remaining[1].peer, peer(3));
    }

    #[tokio::test]
    async fn test_remove_unknown_worker_is_a_no_op() {
        let registry = Registry::new();
        registry.add_worker(peer(1), 4).await;

        assert!(!registry.remove_worker(Uuid::new_v4(), 4).await);
        assert_eq!(registry.len().await, 1);
        assert_eq!(shares(&registry).await, vec![4]);
    }

    #[tokio::test]
    async fn test_removing_last_worker_empties_registry() {
        let registry = Registry::new();
        let only = registry.add_worker(peer(1), 4).await;

        assert!(registry.remove_worker(only.id, 4).await);
        assert!(registry.is_empty().await);
        assert_eq!(registry.total_assigned().await, 0);
    }

    #[tokio::test]
    async fn test_inspect_returns_detached_snapshot() {
        let registry = Registry::new();
        registry.add_worker(peer(1), 6).await;

        let snapshot = registry.inspect().await;
        registry.add_worker(peer(2), 6).await;

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].concurrency, 6);
        assert_eq!(shares(&registry).await, vec![3, 3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_keep_budget_invariant() {
        let registry = Arc::new(Registry::new());
        let mut handles = Vec::new();
        for port in 0..40u16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.add_worker(peer(10_000 + port), 100).await
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.len().await, 40);
        assert_eq!(registry.total_assigned().await, 100);
        assert_eq!(shares(&registry).await, distribute(100, 40));
    }
}
