use crate::{
    backend::{BackendKind, ClusterHandle},
    health::HealthResult,
    registry::RegistryBinding,
    workload::{RolloutOutcome, RolloutState},
    Result,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Stages of the deploy flow, in execution order. The report carries the
/// last one that completed so a reader of a failed run sees how far it got.
#[derive(Serialize, Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    BackendSelected,
    ClusterProvisioned,
    RegistryBridged,
    ManifestsApplied,
    RolloutChecked,
    HealthChecked,
}

/// Structured end-of-run report: the contract surface for whoever drives
/// this orchestrator. Emitted on every run, fatal aborts included.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub generated: DateTime<Utc>,
    pub backend: Option<BackendKind>,
    pub cluster: Option<ClusterHandle>,
    pub registry: Option<RegistryBinding>,
    pub rollout: Option<RolloutOutcome>,
    pub health: Option<HealthResult>,
    pub last_completed: Option<Stage>,
    pub error: Option<String>,
    /// non-fatal conditions the run continued past
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl RunReport {
    #[must_use]
    pub fn new() -> RunReport {
        RunReport {
            generated: Utc::now(),
            backend: None,
            cluster: None,
            registry: None,
            rollout: None,
            health: None,
            last_completed: None,
            error: None,
            warnings: Vec::new(),
        }
    }

    pub fn complete(&mut self, stage: Stage) {
        self.last_completed = Some(stage);
    }

    /// Record a condition the run continued past. Warnings never change the
    /// exit code; they exist so the report reflects the partial state.
    pub fn warn(&mut self, message: &str) {
        tracing::warn!("{message}");
        self.warnings.push(message.to_string());
    }

    /// Exit code contract: 0 deployed (health is advisory), 2 rollout timed
    /// out or errored, 1 any fatal stage failure.
    pub fn exit_code(&self) -> i32 {
        if self.error.is_some() {
            return 1;
        }
        match self.rollout.as_ref().map(|r| r.state) {
            Some(RolloutState::Succeeded) => 0,
            Some(_) => 2,
            None => 1,
        }
    }

    /// One line verdict for the logs.
    pub fn summary(&self) -> String {
        match (self.rollout.as_ref().map(|r| r.state), self.health.as_ref()) {
            (Some(RolloutState::Succeeded), Some(h)) if h.reachable => {
                "deployed and healthy".to_string()
            }
            (Some(RolloutState::Succeeded), Some(_)) => {
                "deployed, health check failed".to_string()
            }
            (Some(RolloutState::Succeeded), None) => "deployed, health not checked".to_string(),
            (Some(RolloutState::TimedOut), _) => "rollout timed out".to_string(),
            (Some(RolloutState::Errored), _) => "rollout errored".to_string(),
            (Some(s), _) => format!("rollout left in {s:?}"),
            (None, _) => match &self.error {
                Some(e) => format!("aborted: {e}"),
                None => "nothing deployed".to_string(),
            },
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::RolloutObservation;

    fn succeeded_rollout() -> RolloutOutcome {
        RolloutOutcome {
            state: RolloutState::Succeeded,
            last: Some(RolloutObservation { desired: 1, ready: 1 }),
            snapshot: None,
            message: None,
        }
    }

    #[test]
    fn test_exit_code_success() {
        let mut report = RunReport::new();
        report.rollout = Some(succeeded_rollout());
        report.health = Some(HealthResult {
            endpoint: "http://localhost:8080/".to_string(),
            reachable: true,
            latency_ms: Some(12),
            body: Some(r#"{"status":"healthy"}"#.to_string()),
        });
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.summary(), "deployed and healthy");
    }

    #[test]
    fn test_failed_health_does_not_invalidate_a_succeeded_rollout() {
        let mut report = RunReport::new();
        report.rollout = Some(succeeded_rollout());
        report.health = Some(HealthResult {
            endpoint: "http://localhost:8080/".to_string(),
            reachable: false,
            latency_ms: None,
            body: None,
        });
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.summary(), "deployed, health check failed");
    }

    #[test]
    fn test_timed_out_rollout_is_distinct_from_fatal_and_success() {
        let mut timed_out = RunReport::new();
        timed_out.rollout = Some(RolloutOutcome {
            state: RolloutState::TimedOut,
            last: Some(RolloutObservation { desired: 1, ready: 0 }),
            snapshot: None,
            message: Some("not ready within 300s".to_string()),
        });
        let mut fatal = RunReport::new();
        fatal.error = Some("Cluster provisioning failed: kind: boom".to_string());
        assert_eq!(timed_out.exit_code(), 2);
        assert_eq!(fatal.exit_code(), 1);
        assert_ne!(timed_out.exit_code(), 0);
    }

    #[test]
    fn test_warnings_render_without_changing_the_exit_code() {
        let mut report = RunReport::new();
        report.rollout = Some(succeeded_rollout());
        report.warn("registry bridge failed, continuing: network kind not found");
        let yaml = report.to_yaml().unwrap();
        assert!(yaml.contains("registry bridge failed, continuing"));
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_report_renders_on_fatal_abort() {
        let mut report = RunReport::new();
        report.backend = Some(BackendKind::Kind);
        report.complete(Stage::BackendSelected);
        report.error = Some("Registry bridge failed: network kind not found".to_string());
        let yaml = report.to_yaml().unwrap();
        assert!(yaml.contains("backend: kind"));
        assert!(yaml.contains("lastCompleted: backend-selected"));
        assert!(yaml.contains("Registry bridge failed"));
    }
}
