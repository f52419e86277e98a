use crate::{
    backend::{BackendKind, ClusterHandle},
    httphandler::HttpFetch,
    shellhandler::CommandRunner,
    Error, Result, HTTP_HOST_PORT, SERVICE_NODE_PORT,
};
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;
use url::Url;

/// Advisory health verdict. A failed probe never demotes a succeeded
/// rollout; the two are reported independently.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthResult {
    pub endpoint: String,
    pub reachable: bool,
    pub latency_ms: Option<u64>,
    pub body: Option<String>,
}

/// Externally reachable base URL for the backend in use. The minikube VM ip
/// is queried live on every run since it can change between VM restarts.
pub fn resolve_endpoint<R: CommandRunner>(runner: &R, handle: &ClusterHandle) -> Result<Url> {
    let url = match handle.backend {
        BackendKind::Kind => format!("http://localhost:{HTTP_HOST_PORT}"),
        BackendKind::Minikube => {
            let out = runner.run("minikube", &["ip", "-p", &handle.name])?;
            if !out.success {
                return Err(Error::Other(out.failure_text("minikube ip")));
            }
            format!("http://{}:{SERVICE_NODE_PORT}", out.stdout.trim())
        }
    };
    Url::parse(&url).map_err(Error::UrlError)
}

/// Poll the health path with a bounded number of attempts and linear
/// backoff. Non-2xx and connection failures are reachable=false, not
/// protocol errors; the final failure is advisory diagnostic output only.
pub async fn verify_health<H: HttpFetch>(
    fetcher: &H,
    endpoint: &Url,
    attempts: u32,
    backoff: Duration,
) -> HealthResult {
    let health_url = match endpoint.join("health") {
        Ok(u) => u,
        Err(e) => {
            tracing::warn!("unusable health endpoint '{endpoint}': {e}");
            return HealthResult {
                endpoint: endpoint.to_string(),
                reachable: false,
                latency_ms: None,
                body: None,
            };
        }
    };
    let mut body = None;
    for attempt in 1..=attempts {
        let started = std::time::Instant::now();
        match fetcher.fetch(&health_url).await {
            Ok((status, text)) if (200..300).contains(&status) => {
                let latency = started.elapsed().as_millis() as u64;
                tracing::info!("health check passed in {latency}ms");
                return HealthResult {
                    endpoint: endpoint.to_string(),
                    reachable: true,
                    latency_ms: Some(latency),
                    body: Some(text),
                };
            }
            Ok((status, text)) => {
                tracing::debug!("health attempt {attempt}/{attempts}: HTTP {status}");
                body = Some(text);
            }
            Err(e) => {
                tracing::debug!("health attempt {attempt}/{attempts}: {e}");
            }
        }
        if attempt < attempts {
            sleep(backoff * attempt).await;
        }
    }
    tracing::warn!(
        "{}",
        Error::HealthCheckFailed(
            endpoint.to_string(),
            format!("no healthy answer after {attempts} attempts")
        )
    );
    HealthResult {
        endpoint: endpoint.to_string(),
        reachable: false,
        latency_ms: None,
        body,
    }
}
