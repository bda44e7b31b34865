use crate::common::*;
use crate::loggingservice_types::*;
use crate::platform::Platform;
use std::sync::Arc;
use tracing::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionType {
    InProgress,
    Successful,
    Failed,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::InProgress => "In Progress",
            ConditionType::Successful => "Successful",
            ConditionType::Failed => "Failed",
        }
    }
}

/// Owns the condition list of one `LoggingService` for the length of a cycle.
pub struct StatusUpdater {
    platform: Arc<dyn Platform>,
    name: String,
    status: LoggingServiceStatus,
}

impl StatusUpdater {
    pub fn new(platform: Arc<dyn Platform>, ls: &LoggingService) -> Self {
        StatusUpdater {
            platform,
            name: ls.metadata.name.clone().unwrap_or_default(),
            status: ls.status.clone().unwrap_or_default(),
        }
    }

    pub fn conditions(&self) -> &[LoggingServiceCondition] {
        &self.status.conditions
    }

    pub fn get(&self, reason: &str) -> Option<&LoggingServiceCondition> {
        self.status.conditions.iter().find(|c| c.reason == reason)
    }

    pub fn is_failed(&self, reason: &str) -> bool {
        matches!(self.get(reason), Some(c) if c.type_ == ConditionType::Failed.as_str())
    }

    pub async fn update(&mut self, reason: &str, type_: ConditionType, status: bool, message: &str) {
        let condition = LoggingServiceCondition {
            type_: type_.as_str().to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: chrono::Utc::now().to_rfc3339(),
            status,
        };
        match self
            .status
            .conditions
            .iter_mut()
            .find(|c| c.reason == reason)
        {
            Some(existing) => {
                if type_ == ConditionType::Failed
                    && existing.type_ == condition.type_
                    && existing.message == condition.message
                    && existing.status == condition.status
                {
                    return;
                }
                *existing = condition;
            }
            None => self.status.conditions.push(condition),
        }
        self.persist().await;
    }

    /// Moves `reason` to "In Progress" unless a failure is already recorded for it.
    pub async fn start(&mut self, reason: &str, message: &str) {
        if !self.is_failed(reason) {
            self.update(reason, ConditionType::InProgress, false, message)
                .await;
        }
    }

    pub async fn fail(&mut self, reason: &str, message: &str) {
        self.update(reason, ConditionType::Failed, false, message)
            .await;
    }

    pub async fn remove(&mut self, reason: &str) {
        let before = self.status.conditions.len();
        self.status.conditions.retain(|c| c.reason != reason);
        if self.status.conditions.len() != before {
            self.persist().await;
        }
    }

    /// Drops leftovers of earlier cycles, keeping the cycle condition, pending
    /// failures and failures of components that are still installed.
    pub async fn remove_temporary(&mut self, spec: &LoggingServiceSpec) {
        let before = self.status.conditions.len();
        let failed = ConditionType::Failed.as_str();
        self.status.conditions.retain(|c| {
            c.reason == CYCLE_STATUS
                || (c.type_ == failed
                    && (c.reason == COMPONENT_PENDING_STATUS || installed(spec, &c.reason)))
        });
        if self.status.conditions.len() != before {
            self.persist().await;
        }
    }

    async fn persist(&self) {
        if let Err(e) = self.platform.patch_status(&self.name, &self.status).await {
            error!(name = %self.name, error = %e, "Failed to update status");
        }
    }
}

fn installed(spec: &LoggingServiceSpec, reason: &str) -> bool {
    match reason {
        GRAYLOG_STATUS => matches!(spec.graylog(), Install::Enabled(_)),
        FLUENTD_STATUS => matches!(spec.fluentd(), Install::Enabled(_)),
        FLUENTBIT_STATUS => matches!(spec.fluentbit(), Install::Enabled(_)),
        HA_FLUENT_STATUS => matches!(spec.fluentbit_tier(), Install::Enabled(_)),
        EVENTS_READER_STATUS => matches!(spec.events_reader(), Install::Enabled(_)),
        _ => false,
    }
}
