//! Service registry: identity and capabilities of registered services
//!
//! Health state lives in the `HealthMonitor`; the registry joins both into
//! the `ServiceStatus` returned to callers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    process_info, process_warn, HealthStatus, HealthUpdate, ListServicesRequest, ProcessId,
    ServiceCommand, ServiceDescriptor, ServiceId, ServiceStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::health::{HealthMonitor, HealthSnapshot};
use crate::error::{SupervisorError, SupervisorResult};
use crate::traits::HealthView;

struct ServiceRecord {
    name: String,
    capabilities: Vec<String>,
    metrics: HashMap<String, f64>,
    registered_at: DateTime<Utc>,
}

pub struct ServiceRegistry {
    records: RwLock<HashMap<ServiceId, ServiceRecord>>,
    health: Arc<HealthMonitor>,
    /// Handed to every service on registration
    initial_config: RwLock<HashMap<String, String>>,
}

impl ServiceRegistry {
    pub fn new(health: Arc<HealthMonitor>, initial_config: HashMap<String, String>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            health,
            initial_config: RwLock::new(initial_config),
        }
    }

    /// Set one entry of the configuration handed out on registration
    pub async fn set_initial_config(&self, key: impl Into<String>, value: impl Into<String>) {
        self.initial_config.write().await.insert(key.into(), value.into());
    }

    /// Register a service under a fresh identifier, seeded in `Starting`
    pub async fn register_service(
        &self,
        descriptor: &ServiceDescriptor,
        capabilities: Vec<String>,
    ) -> SupervisorResult<(ServiceId, HashMap<String, String>)> {
        if descriptor.name.trim().is_empty() {
            return Err(SupervisorError::config("service name must not be empty"));
        }

        let mut records = self.records.write().await;
        let mut service_id = ServiceId::generate();
        while records.contains_key(&service_id) {
            service_id = ServiceId::generate();
        }

        // Health first, so a heartbeat racing this registration always finds it
        self.health.add_service(service_id.clone(), descriptor.name.clone()).await;
        records.insert(
            service_id.clone(),
            ServiceRecord {
                name: descriptor.name.clone(),
                capabilities,
                metrics: HashMap::new(),
                registered_at: Utc::now(),
            },
        );

        process_info!(
            ProcessId::current(),
            "📝 Registered service {} as {}",
            descriptor.name,
            service_id
        );
        let initial_config = self.initial_config.read().await.clone();
        Ok((service_id, initial_config))
    }

    pub async fn unregister_service(&self, service_id: &ServiceId, reason: &str) -> SupervisorResult<()> {
        let removed = self.records.write().await.remove(service_id);
        self.health.remove_service(service_id).await;

        match removed {
            Some(record) => {
                process_info!(
                    ProcessId::current(),
                    "👋 Unregistered service {} ({}): {}",
                    record.name,
                    service_id,
                    reason
                );
                Ok(())
            }
            None => Err(SupervisorError::not_found(service_id)),
        }
    }

    pub async fn get_service_status(&self, service_id: &ServiceId) -> SupervisorResult<ServiceStatus> {
        let records = self.records.read().await;
        let record = records
            .get(service_id)
            .ok_or_else(|| SupervisorError::not_found(service_id))?;
        let snapshot = self.health.status(service_id).await;
        Ok(build_status(service_id, record, snapshot))
    }

    /// Statuses matching every given filter, ordered by name then id
    pub async fn list_services(&self, request: &ListServicesRequest) -> Vec<ServiceStatus> {
        let health = self.health.statuses().await;
        let records = self.records.read().await;

        let mut statuses: Vec<ServiceStatus> = records
            .iter()
            .filter(|(_, record)| match &request.name_pattern {
                Some(pattern) => record.name.contains(pattern.as_str()),
                None => true,
            })
            .map(|(id, record)| build_status(id, record, health.get(id).cloned()))
            .filter(|status| request.state_filter.map_or(true, |state| status.status == state))
            .collect();

        statuses.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.service_id.cmp(&b.service_id)));
        statuses
    }

    /// Record a heartbeat; unchanged status is not an error
    pub async fn update_heartbeat(
        &self,
        service_id: &ServiceId,
        status: HealthStatus,
        metrics: HashMap<String, f64>,
    ) -> SupervisorResult<Option<HealthUpdate>> {
        {
            let mut records = self.records.write().await;
            let record = records
                .get_mut(service_id)
                .ok_or_else(|| SupervisorError::not_found(service_id))?;
            record.metrics.extend(metrics);
        }

        self.health.record_heartbeat(service_id, status).await
    }

    /// Queue a command for a registered service
    pub async fn enqueue_command(&self, service_id: &ServiceId, command: ServiceCommand) -> SupervisorResult<()> {
        if !self.records.read().await.contains_key(service_id) {
            return Err(SupervisorError::not_found(service_id));
        }
        self.health.enqueue_command(service_id, command).await
    }

    /// Drain pending commands for the service (read-and-clear)
    pub async fn take_pending_commands(&self, service_id: &ServiceId) -> Vec<ServiceCommand> {
        self.health.take_pending_commands(service_id).await
    }

    /// Configured name a service registered under
    pub async fn name_of(&self, service_id: &ServiceId) -> Option<String> {
        self.records.read().await.get(service_id).map(|r| r.name.clone())
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl HealthView for ServiceRegistry {
    async fn health_by_name(&self, name: &str) -> Option<HealthStatus> {
        let ids: Vec<ServiceId> = {
            let records = self.records.read().await;
            records
                .iter()
                .filter(|(_, record)| record.name == name)
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut best: Option<HealthStatus> = None;
        for id in ids {
            let Some(snapshot) = self.health.status(&id).await else {
                process_warn!(ProcessId::current(), "⚠️ Registered service {} has no health record", id);
                continue;
            };
            if best.map_or(true, |current| rank(snapshot.status) > rank(current)) {
                best = Some(snapshot.status);
            }
        }
        best
    }
}

/// Preference when several instances share a name
fn rank(status: HealthStatus) -> u8 {
    match status {
        HealthStatus::Healthy => 4,
        HealthStatus::Degraded => 3,
        HealthStatus::Starting => 2,
        HealthStatus::Unhealthy => 1,
        HealthStatus::Stopped => 0,
    }
}

fn build_status(service_id: &ServiceId, record: &ServiceRecord, snapshot: Option<HealthSnapshot>) -> ServiceStatus {
    let (status, last_update, last_healthy) = match snapshot {
        Some(s) => (s.status, s.last_update, s.last_healthy),
        None => (HealthStatus::Stopped, record.registered_at, None),
    };

    ServiceStatus {
        service_id: service_id.clone(),
        name: record.name.clone(),
        status,
        capabilities: record.capabilities.clone(),
        metrics: record.metrics.clone(),
        registered_at: record.registered_at,
        last_update,
        last_healthy,
    }
}
