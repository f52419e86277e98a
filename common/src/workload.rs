use crate::{manifests::DeploymentTarget, Result};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Pod, Service},
};
use kube::{
    api::{Api, ListParams},
    Client, ResourceExt,
};
use serde::Serialize;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Rollout state machine. TimedOut and Errored are terminal outcomes, not
/// retryable errors; whether to re-run the whole flow is the caller's call.
#[derive(Serialize, Copy, Clone, Debug, PartialEq, Eq)]
pub enum RolloutState {
    Pending,
    Progressing,
    Succeeded,
    TimedOut,
    Errored,
}

/// Replica counts as last read from the deployment status.
#[derive(Serialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct RolloutObservation {
    pub desired: i32,
    pub ready: i32,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodBrief {
    pub name: String,
    pub phase: Option<String>,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBrief {
    pub name: String,
    pub cluster_ip: Option<String>,
    pub node_ports: Vec<i32>,
}

/// Terminal pod/service state, for diagnostics in the end-of-run report.
#[derive(Serialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct WorkloadSnapshot {
    pub pods: Vec<PodBrief>,
    pub services: Vec<ServiceBrief>,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RolloutOutcome {
    pub state: RolloutState,
    pub last: Option<RolloutObservation>,
    pub snapshot: Option<WorkloadSnapshot>,
    pub message: Option<String>,
}

impl RolloutOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == RolloutState::Succeeded
    }
}

/// Seam over the rollout/status reads so state machine behavior is testable
/// with simulated replica sequences.
pub trait RolloutProbe {
    fn observe(&mut self) -> impl std::future::Future<Output = Result<RolloutObservation>> + Send;
    fn snapshot(&mut self) -> impl std::future::Future<Output = Result<WorkloadSnapshot>> + Send;
}

/// Poll the rollout status at a fixed interval until the deployment reports
/// all desired replicas ready, the wait budget elapses, or the API fails.
/// Polling rather than a watch stream: push semantics are not guaranteed
/// available on every backend.
pub async fn watch_rollout<P: RolloutProbe>(
    probe: &mut P,
    budget: Duration,
    interval: Duration,
) -> RolloutOutcome {
    let deadline = Instant::now() + budget;
    let mut state = RolloutState::Pending;
    let mut first: Option<RolloutObservation> = None;
    let mut last: Option<RolloutObservation> = None;
    let mut message = None;
    loop {
        match probe.observe().await {
            Ok(obs) => {
                tracing::debug!("rollout: {}/{} ready", obs.ready, obs.desired);
                if obs.desired > 0 && obs.ready == obs.desired {
                    state = RolloutState::Succeeded;
                    last = Some(obs);
                    break;
                }
                match &first {
                    None => first = Some(obs.clone()),
                    Some(f) if *f != obs => state = RolloutState::Progressing,
                    _ => {}
                }
                last = Some(obs);
            }
            Err(e) => {
                state = RolloutState::Errored;
                message = Some(e.to_string());
                break;
            }
        }
        if Instant::now() >= deadline {
            state = RolloutState::TimedOut;
            message = Some(format!("not ready within {}s", budget.as_secs()));
            break;
        }
        sleep(interval).await;
    }
    // best-effort terminal snapshot; a failing read never masks the outcome
    let snapshot = probe.snapshot().await.ok();
    RolloutOutcome {
        state,
        last,
        snapshot,
        message,
    }
}

/// Real probe over the deployment and its labelled pods/services.
pub struct DeploymentProbe {
    deploys: Api<Deployment>,
    pods: Api<Pod>,
    services: Api<Service>,
    target: DeploymentTarget,
}

impl DeploymentProbe {
    #[must_use]
    pub fn new(client: Client, target: DeploymentTarget) -> DeploymentProbe {
        DeploymentProbe {
            deploys: Api::namespaced(client.clone(), &target.namespace),
            pods: Api::namespaced(client.clone(), &target.namespace),
            services: Api::namespaced(client, &target.namespace),
            target,
        }
    }
}

impl RolloutProbe for DeploymentProbe {
    async fn observe(&mut self) -> Result<RolloutObservation> {
        let d = self.deploys.get(&self.target.name).await?;
        let desired = d
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(self.target.replicas);
        let ready = d
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        Ok(RolloutObservation { desired, ready })
    }

    async fn snapshot(&mut self) -> Result<WorkloadSnapshot> {
        let lp = ListParams::default().labels(&self.target.selector);
        let pods = self
            .pods
            .list(&lp)
            .await?
            .into_iter()
            .map(|p| PodBrief {
                phase: p.status.as_ref().and_then(|s| s.phase.clone()),
                name: p.name_any(),
            })
            .collect();
        let services = self
            .services
            .list(&lp)
            .await?
            .into_iter()
            .map(|s| ServiceBrief {
                name: s.name_any(),
                cluster_ip: s.spec.as_ref().and_then(|sp| sp.cluster_ip.clone()),
                node_ports: s
                    .spec
                    .as_ref()
                    .and_then(|sp| sp.ports.as_ref())
                    .map(|ports| ports.iter().filter_map(|p| p.node_port).collect())
                    .unwrap_or_default(),
            })
            .collect();
        Ok(WorkloadSnapshot { pods, services })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::Error;
    use std::collections::VecDeque;

    #[derive(Clone, Debug)]
    pub enum FakeStep {
        Obs(i32, i32),
        Fail(String),
    }

    /// Simulated replica-ready sequence; repeats its last step forever once
    /// the scripted part is exhausted.
    pub struct FakeProbe {
        steps: VecDeque<FakeStep>,
        pub snapshots: usize,
    }

    impl FakeProbe {
        pub fn new(steps: Vec<FakeStep>) -> FakeProbe {
            FakeProbe {
                steps: steps.into(),
                snapshots: 0,
            }
        }
    }

    impl RolloutProbe for FakeProbe {
        async fn observe(&mut self) -> Result<RolloutObservation> {
            let step = if self.steps.len() > 1 {
                self.steps.pop_front().unwrap()
            } else {
                self.steps
                    .front()
                    .cloned()
                    .ok_or_else(|| Error::Other("probe sequence empty".to_string()))?
            };
            match step {
                FakeStep::Obs(desired, ready) => Ok(RolloutObservation { desired, ready }),
                FakeStep::Fail(msg) => Err(Error::Other(msg)),
            }
        }

        async fn snapshot(&mut self) -> Result<WorkloadSnapshot> {
            self.snapshots += 1;
            Ok(WorkloadSnapshot {
                pods: vec![PodBrief {
                    name: "pipeline-demo-abc".to_string(),
                    phase: Some("Running".to_string()),
                }],
                services: Vec::new(),
            })
        }
    }

    const FAST: Duration = Duration::from_millis(2);

    #[tokio::test]
    async fn test_rollout_reaching_desired_succeeds() {
        let mut probe = FakeProbe::new(vec![
            FakeStep::Obs(1, 0),
            FakeStep::Obs(1, 0),
            FakeStep::Obs(1, 1),
        ]);
        let outcome = watch_rollout(&mut probe, Duration::from_secs(5), FAST).await;
        assert_eq!(outcome.state, RolloutState::Succeeded);
        assert_eq!(outcome.last, Some(RolloutObservation { desired: 1, ready: 1 }));
        assert!(outcome.snapshot.is_some());
    }

    #[tokio::test]
    async fn test_rollout_ready_on_first_observation() {
        let mut probe = FakeProbe::new(vec![FakeStep::Obs(2, 2)]);
        let outcome = watch_rollout(&mut probe, Duration::from_secs(5), FAST).await;
        assert_eq!(outcome.state, RolloutState::Succeeded);
    }

    #[tokio::test]
    async fn test_rollout_never_ready_times_out_at_the_bound() {
        let budget = Duration::from_millis(40);
        let mut probe = FakeProbe::new(vec![FakeStep::Obs(1, 0)]);
        let started = std::time::Instant::now();
        let outcome = watch_rollout(&mut probe, budget, FAST).await;
        let elapsed = started.elapsed();
        assert_eq!(outcome.state, RolloutState::TimedOut);
        // terminal within budget plus a few poll intervals
        assert!(elapsed >= budget);
        assert!(elapsed < budget + Duration::from_millis(500));
        assert!(outcome.snapshot.is_some());
    }

    #[tokio::test]
    async fn test_rollout_zero_desired_is_not_success() {
        let mut probe = FakeProbe::new(vec![FakeStep::Obs(0, 0)]);
        let outcome = watch_rollout(&mut probe, Duration::from_millis(20), FAST).await;
        assert_eq!(outcome.state, RolloutState::TimedOut);
    }

    #[tokio::test]
    async fn test_rollout_api_failure_is_terminal_errored() {
        let mut probe = FakeProbe::new(vec![
            FakeStep::Obs(1, 0),
            FakeStep::Fail("deployments.apps \"pipeline-demo\" not found".to_string()),
            FakeStep::Obs(1, 1),
        ]);
        let outcome = watch_rollout(&mut probe, Duration::from_secs(5), FAST).await;
        assert_eq!(outcome.state, RolloutState::Errored);
        assert!(outcome.message.unwrap().contains("not found"));
    }
}
