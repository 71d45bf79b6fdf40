//! Health monitor: per-service health state, staleness sweep and
//! status-change fan-out
//!
//! All records live behind one read-write lock. A transition is dispatched to
//! subscribers while that write lock is still held, which keeps per-service
//! ordering intact for every subscriber. Dispatch never blocks: a subscriber
//! whose buffer is full misses the update.

use chrono::{DateTime, Utc};
use shared::{process_debug, process_info, process_warn, HealthStatus, HealthUpdate, ProcessId, ServiceCommand, ServiceId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::HealthConfig;
use crate::error::{SupervisorError, SupervisorResult};

/// Handle identifying one watch subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiving end of a health subscription
pub struct Subscription {
    pub id: SubscriptionId,
    pub updates: mpsc::Receiver<HealthUpdate>,
}

/// Point-in-time view of one service's health
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSnapshot {
    pub name: String,
    pub status: HealthStatus,
    pub last_update: DateTime<Utc>,
    pub last_healthy: Option<DateTime<Utc>>,
}

struct HealthRecord {
    name: String,
    status: HealthStatus,
    /// Monotonic time of the last heartbeat (or registration), used by the sweep
    last_seen: Instant,
    last_update: DateTime<Utc>,
    last_healthy: Option<DateTime<Utc>>,
    pending: VecDeque<ServiceCommand>,
}

impl HealthRecord {
    fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            name: self.name.clone(),
            status: self.status,
            last_update: self.last_update,
            last_healthy: self.last_healthy,
        }
    }
}

struct Subscriber {
    /// Empty means every service
    filter: HashSet<ServiceId>,
    tx: mpsc::Sender<HealthUpdate>,
}

impl Subscriber {
    fn wants(&self, service_id: &ServiceId) -> bool {
        self.filter.is_empty() || self.filter.contains(service_id)
    }
}

pub struct HealthMonitor {
    config: HealthConfig,
    records: RwLock<HashMap<ServiceId, HealthRecord>>,
    subscribers: RwLock<HashMap<SubscriptionId, Subscriber>>,
    next_subscription: AtomicU64,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            records: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Seed a service in `Starting`
    pub async fn add_service(&self, service_id: ServiceId, name: impl Into<String>) {
        let record = HealthRecord {
            name: name.into(),
            status: HealthStatus::Starting,
            last_seen: Instant::now(),
            last_update: Utc::now(),
            last_healthy: None,
            pending: VecDeque::new(),
        };

        let mut records = self.records.write().await;
        records.insert(service_id, record);
    }

    /// Drop health state and pending commands for a service.
    ///
    /// Subscribers see a final transition to `Stopped`. Unknown ids are
    /// ignored, so removal is idempotent.
    pub async fn remove_service(&self, service_id: &ServiceId) -> Option<HealthSnapshot> {
        let mut records = self.records.write().await;
        let mut record = records.remove(service_id)?;

        if record.status != HealthStatus::Stopped {
            let update = transition(&mut record, service_id, HealthStatus::Stopped);
            self.dispatch(&update).await;
        }

        if !record.pending.is_empty() {
            process_debug!(
                ProcessId::current(),
                "Discarding {} pending command(s) for {}",
                record.pending.len(),
                service_id
            );
        }
        Some(record.snapshot())
    }

    /// Move a service to `new_status`.
    ///
    /// Returns the emitted update, or `None` when the id is unknown or the
    /// status did not change.
    pub async fn update_health(&self, service_id: &ServiceId, new_status: HealthStatus) -> Option<HealthUpdate> {
        let mut records = self.records.write().await;
        let record = records.get_mut(service_id)?;
        self.apply(record, service_id, new_status).await
    }

    /// Heartbeat path: refresh liveness, then apply the reported status
    pub async fn record_heartbeat(
        &self,
        service_id: &ServiceId,
        status: HealthStatus,
    ) -> SupervisorResult<Option<HealthUpdate>> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(service_id)
            .ok_or_else(|| SupervisorError::not_found(service_id))?;

        let now = Utc::now();
        record.last_seen = Instant::now();
        record.last_update = now;
        if status == HealthStatus::Healthy {
            record.last_healthy = Some(now);
        }

        Ok(self.apply(record, service_id, status).await)
    }

    /// Mark every service silent for longer than the heartbeat timeout as
    /// unhealthy, measured against `now`
    pub async fn sweep_once(&self, now: Instant) -> Vec<HealthUpdate> {
        let timeout = self.config.heartbeat_timeout;
        let mut records = self.records.write().await;
        let mut updates = Vec::new();

        for (service_id, record) in records.iter_mut() {
            let silent_for = now.saturating_duration_since(record.last_seen);
            if silent_for <= timeout {
                continue;
            }
            if let Some(update) = self.apply(record, service_id, HealthStatus::Unhealthy).await {
                process_warn!(
                    ProcessId::current(),
                    "💔 Service {} ({}) missed heartbeats for {:?}, marked unhealthy",
                    record.name,
                    service_id,
                    silent_for
                );
                updates.push(update);
            }
        }

        updates
    }

    /// Periodic sweep until cancelled
    pub async fn run_sweeper(&self, cancel: CancellationToken) {
        let period = self.config.sweep_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        process_debug!(ProcessId::current(), "Health sweep running every {:?}", period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                now = ticker.tick() => {
                    self.sweep_once(now).await;
                }
            }
        }
        process_debug!(ProcessId::current(), "Health sweep stopped");
    }

    /// Subscribe to transitions of `service_ids`, or of every service when empty
    pub async fn subscribe(&self, service_ids: Vec<ServiceId>) -> Subscription {
        let (tx, updates) = mpsc::channel(self.config.subscriber_capacity);
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));

        let subscriber = Subscriber {
            filter: service_ids.into_iter().collect(),
            tx,
        };
        self.subscribers.write().await.insert(id, subscriber);

        process_debug!(ProcessId::current(), "👀 Health subscriber {:?} attached", id);
        Subscription { id, updates }
    }

    /// Returns false when the subscription was already gone
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.write().await.remove(&id).is_some();
        if removed {
            process_debug!(ProcessId::current(), "Health subscriber {:?} detached", id);
        }
        removed
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Queue a command for delivery on the service's next heartbeat
    pub async fn enqueue_command(&self, service_id: &ServiceId, command: ServiceCommand) -> SupervisorResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(service_id)
            .ok_or_else(|| SupervisorError::not_found(service_id))?;

        process_info!(
            ProcessId::current(),
            "📨 Queued command {:?} for {} ({})",
            command.kind,
            record.name,
            service_id
        );
        record.pending.push_back(command);
        Ok(())
    }

    /// Read and clear the service's pending commands, oldest first
    pub async fn take_pending_commands(&self, service_id: &ServiceId) -> Vec<ServiceCommand> {
        let mut records = self.records.write().await;
        records
            .get_mut(service_id)
            .map(|record| record.pending.drain(..).collect())
            .unwrap_or_default()
    }

    pub async fn status(&self, service_id: &ServiceId) -> Option<HealthSnapshot> {
        self.records.read().await.get(service_id).map(HealthRecord::snapshot)
    }

    pub async fn statuses(&self) -> HashMap<ServiceId, HealthSnapshot> {
        self.records
            .read()
            .await
            .iter()
            .map(|(id, record)| (id.clone(), record.snapshot()))
            .collect()
    }

    async fn apply(
        &self,
        record: &mut HealthRecord,
        service_id: &ServiceId,
        new_status: HealthStatus,
    ) -> Option<HealthUpdate> {
        if record.status == new_status {
            return None;
        }

        let update = transition(record, service_id, new_status);
        process_info!(
            ProcessId::current(),
            "🩺 {} ({}) {} -> {}",
            record.name,
            service_id,
            update.old_status,
            update.new_status
        );
        self.dispatch(&update).await;
        Some(update)
    }

    async fn dispatch(&self, update: &HealthUpdate) {
        let subscribers = self.subscribers.read().await;
        for (id, subscriber) in subscribers.iter() {
            if !subscriber.wants(&update.service_id) {
                continue;
            }
            if subscriber.tx.try_send(update.clone()).is_err() {
                process_debug!(
                    ProcessId::current(),
                    "Dropped health update for {} on subscriber {:?}",
                    update.service_id,
                    id
                );
            }
        }
    }
}

fn transition(record: &mut HealthRecord, service_id: &ServiceId, new_status: HealthStatus) -> HealthUpdate {
    let timestamp = Utc::now();
    let update = HealthUpdate {
        service_id: service_id.clone(),
        old_status: record.status,
        new_status,
        timestamp,
    };

    record.status = new_status;
    record.last_update = timestamp;
    if new_status == HealthStatus::Healthy {
        record.last_healthy = Some(timestamp);
    }
    update
}
