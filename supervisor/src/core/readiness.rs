//! Readiness manager: one-way latch over the configured service set
//!
//! The system is ready once every required and enabled service reports
//! `Healthy` or `Degraded`. A required service that never registered keeps
//! the system not ready. The latch never resets.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use shared::{process_info, HealthStatus, ProcessId, ServiceDescriptor, SystemReadiness};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ReadinessConfig;
use crate::traits::HealthView;

type ReadyCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

#[derive(Default)]
struct ReadinessState {
    is_ready: bool,
    ready_at: Option<DateTime<Utc>>,
    last_log: Option<Instant>,
    callbacks: Vec<ReadyCallback>,
}

pub struct ReadinessManager {
    /// Names of the required and enabled services
    required: Vec<String>,
    view: Arc<dyn HealthView>,
    config: ReadinessConfig,
    state: Mutex<ReadinessState>,
}

impl ReadinessManager {
    pub fn new(services: &[ServiceDescriptor], view: Arc<dyn HealthView>, config: ReadinessConfig) -> Self {
        let required = services
            .iter()
            .filter(|s| s.required && s.enabled)
            .map(|s| s.name.clone())
            .collect();

        Self {
            required,
            view,
            config,
            state: Mutex::new(ReadinessState::default()),
        }
    }

    pub fn required_services(&self) -> &[String] {
        &self.required
    }

    pub async fn is_ready(&self) -> bool {
        self.state.lock().await.is_ready
    }

    pub async fn ready_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.ready_at
    }

    pub async fn readiness(&self) -> SystemReadiness {
        let state = self.state.lock().await;
        SystemReadiness {
            ready: state.is_ready,
            ready_at: state.ready_at,
        }
    }

    /// Run `callback` once the system is ready.
    ///
    /// Fires immediately (on its own task) when readiness was already reached.
    pub async fn on_ready<F, Fut>(&self, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let callback: ReadyCallback = Box::new(move || callback().boxed());

        let mut state = self.state.lock().await;
        if state.is_ready {
            drop(state);
            tokio::spawn(callback());
        } else {
            state.callbacks.push(callback);
        }
    }

    /// Evaluate readiness once; returns the latch value afterwards
    pub async fn check_once(&self) -> bool {
        if self.state.lock().await.is_ready {
            return true;
        }

        // Health is read without holding our own lock
        let mut report = Vec::with_capacity(self.required.len());
        for name in &self.required {
            report.push((name.as_str(), self.view.health_by_name(name).await));
        }
        let all_operational = report
            .iter()
            .all(|(_, status)| status.is_some_and(|s| s.is_operational()));

        let callbacks = {
            let mut state = self.state.lock().await;
            if state.is_ready {
                return true;
            }

            if !all_operational {
                let now = Instant::now();
                let due = state
                    .last_log
                    .map_or(true, |last| now.duration_since(last) >= self.config.log_throttle);
                if due {
                    state.last_log = Some(now);
                    process_info!(ProcessId::current(), "⏳ System not ready: {}", describe(&report));
                }
                return false;
            }

            state.is_ready = true;
            state.ready_at = Some(Utc::now());
            std::mem::take(&mut state.callbacks)
        };

        process_info!(
            ProcessId::current(),
            "✅ System ready: all {} required service(s) operational",
            self.required.len()
        );
        for callback in callbacks {
            tokio::spawn(callback());
        }
        true
    }

    /// Check immediately, then on every poll tick until ready or cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if self.check_once().await {
                        return;
                    }
                }
            }
        }
    }
}

fn describe(report: &[(&str, Option<HealthStatus>)]) -> String {
    report
        .iter()
        .map(|(name, status)| match status {
            Some(status) => format!("{name}={status}"),
            None => format!("{name}=UNREGISTERED"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
