use crate::{
    backend::ClusterHandle,
    httphandler::HttpFetch,
    manifests::{apply_manifests, ManifestSet, ResourceApplier},
    registry,
    report::{RunReport, Stage},
    shellhandler::CommandRunner,
    workload::{watch_rollout, RolloutProbe},
    Result,
};
use std::time::Duration;

/// Knobs of the post-provisioning half of the flow.
#[derive(Clone, Debug)]
pub struct DeployOptions {
    pub rollout_budget: Duration,
    pub poll_interval: Duration,
    pub health_attempts: u32,
    pub health_backoff: Duration,
    /// optional container image override applied after the manifests
    pub image: Option<ImageOverride>,
}

#[derive(Clone, Debug)]
pub struct ImageOverride {
    pub container: String,
    pub image: String,
}

impl Default for DeployOptions {
    fn default() -> Self {
        DeployOptions {
            rollout_budget: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
            health_attempts: 5,
            health_backoff: Duration::from_secs(2),
            image: None,
        }
    }
}

/// Bridge the registry to the cluster network, applying the continuation
/// policy: a bridge failure aborts unless `keep_going` is set, in which case
/// it is recorded as a warning and the flow proceeds (later image pulls may
/// fail, which the rollout watcher will surface).
pub fn bridge_registry<R: CommandRunner>(
    runner: &R,
    handle: &ClusterHandle,
    keep_going: bool,
    report: &mut RunReport,
) -> Result<()> {
    match registry::ensure_registry_reachable(runner, handle) {
        Ok(binding) => {
            report.registry = Some(binding);
            report.complete(Stage::RegistryBridged);
            Ok(())
        }
        Err(e) if keep_going && e.is_continuable() => {
            report.warn(&format!("registry bridge failed, continuing: {e}"));
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Apply, watch, verify: the strictly forward second half of a run, once a
/// cluster is reachable. Fills the report as far as the flow gets; a rollout
/// that does not succeed skips the health check but is not an `Err` (the
/// report's exit code carries the distinction). The endpoint is resolved
/// only when the health stage is reached, and a resolution failure skips the
/// check as a warning since health is advisory.
#[allow(clippy::too_many_arguments)]
pub async fn deploy_workload<R, A, P, H>(
    runner: &R,
    handle: &ClusterHandle,
    applier: &A,
    probe: &mut P,
    fetcher: &H,
    namespace: &str,
    set: &ManifestSet,
    opts: &DeployOptions,
    report: &mut RunReport,
) -> Result<()>
where
    R: CommandRunner,
    A: ResourceApplier,
    P: RolloutProbe,
    H: HttpFetch,
{
    apply_manifests(applier, namespace, set).await?;
    report.complete(Stage::ManifestsApplied);

    if let Some(image) = &opts.image {
        let target = set.target(namespace)?;
        applier
            .set_image(&target, &image.container, &image.image)
            .await?;
    }

    let outcome = watch_rollout(probe, opts.rollout_budget, opts.poll_interval).await;
    let deployed = outcome.succeeded();
    report.rollout = Some(outcome);
    report.complete(Stage::RolloutChecked);

    if deployed {
        match crate::health::resolve_endpoint(runner, handle) {
            Ok(endpoint) => {
                let health = crate::health::verify_health(
                    fetcher,
                    &endpoint,
                    opts.health_attempts,
                    opts.health_backoff,
                )
                .await;
                report.health = Some(health);
                report.complete(Stage::HealthChecked);
            }
            Err(e) => {
                report.warn(&format!("health endpoint not resolved, check skipped: {e}"));
            }
        }
    } else {
        tracing::warn!("rollout did not succeed, skipping health verification");
    }
    Ok(())
}
