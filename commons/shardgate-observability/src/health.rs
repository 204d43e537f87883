use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthState {
    Ok,
    Warning,
    Error,
}

/// A single health signal raised by a component about a service.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub service: String,
    pub source: String,
    pub state: HealthState,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    pub fn new(
        service: impl Into<String>,
        source: impl Into<String>,
        state: HealthState,
        message: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            source: source.into(),
            state,
            message: message.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn error(
        service: impl Into<String>,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(service, source, HealthState::Error, message)
    }
}

/// Sink for health signals. Implementations decide visibility and alerting;
/// reporting never changes the outcome of the request that raised it.
pub trait HealthReporter: Send + Sync {
    fn report(&self, report: HealthReport);
}

/// Keeps the latest report per `(service, source)` and logs every report.
#[derive(Debug, Default)]
pub struct HealthRegistry {
    reports: scc::HashMap<(String, String), HealthReport>,
    errors_total: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub status: HealthState,
    pub errors_total: u64,
    pub reports: Vec<HealthReport>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors_total(&self) -> u64 {
        self.errors_total.load(Ordering::Relaxed)
    }

    pub fn overall_state(&self) -> HealthState {
        let mut state = HealthState::Ok;
        self.reports.scan(|_, report| {
            state = state.max(report.state);
        });
        state
    }

    pub fn summary(&self) -> HealthSummary {
        let mut reports = Vec::new();
        self.reports.scan(|_, report| reports.push(report.clone()));
        reports.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        HealthSummary {
            status: self.overall_state(),
            errors_total: self.errors_total(),
            reports,
        }
    }
}

impl HealthReporter for HealthRegistry {
    fn report(&self, report: HealthReport) {
        match report.state {
            HealthState::Error => {
                self.errors_total.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    service = %report.service,
                    source = %report.source,
                    "health report: {}",
                    report.message
                );
            }
            HealthState::Warning => tracing::warn!(
                service = %report.service,
                source = %report.source,
                "health report: {}",
                report.message
            ),
            HealthState::Ok => tracing::debug!(
                service = %report.service,
                source = %report.source,
                "health report: {}",
                report.message
            ),
        }
        let key = (report.service.clone(), report.source.clone());
        self.reports.entry(key).insert_entry(report);
    }
}
