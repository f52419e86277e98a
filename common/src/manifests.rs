use crate::{Error, Result, MANAGER};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Namespace, Service},
};
use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams, PostParams},
    Client, ResourceExt,
};
use serde::{Deserialize, Serialize};

/// One workload manifest, classified by kind. Only the fixed deploy set is
/// accepted; anything else in the manifest directory is a hard error rather
/// than something to silently skip.
#[derive(Clone, Debug)]
pub enum Manifest {
    Namespace(Namespace),
    Deployment(Deployment),
    Service(Service),
}

impl Manifest {
    fn rank(&self) -> u8 {
        match self {
            Manifest::Namespace(_) => 0,
            Manifest::Deployment(_) => 1,
            Manifest::Service(_) => 2,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Manifest::Namespace(_) => "Namespace",
            Manifest::Deployment(_) => "Deployment",
            Manifest::Service(_) => "Service",
        }
    }

    pub fn resource_id(&self) -> String {
        let name = match self {
            Manifest::Namespace(o) => o.name_any(),
            Manifest::Deployment(o) => o.name_any(),
            Manifest::Service(o) => o.name_any(),
        };
        format!("{}/{}", self.kind_name().to_lowercase(), name)
    }

    /// Parse every document of a (possibly multi-doc) YAML stream.
    pub fn parse_all(yaml: &str) -> Result<Vec<Manifest>> {
        let mut out = Vec::new();
        for doc in serde_yaml::Deserializer::from_str(yaml) {
            let value = serde_yaml::Value::deserialize(doc).map_err(Error::YamlError)?;
            if value.is_null() {
                continue;
            }
            let kind = value
                .get("kind")
                .and_then(|k| k.as_str())
                .unwrap_or_default()
                .to_string();
            let m = match kind.as_str() {
                "Namespace" => Manifest::Namespace(serde_yaml::from_value(value)?),
                "Deployment" => Manifest::Deployment(serde_yaml::from_value(value)?),
                "Service" => Manifest::Service(serde_yaml::from_value(value)?),
                other => {
                    return Err(Error::Other(format!(
                        "unsupported manifest kind '{other}' in deploy set"
                    )))
                }
            };
            out.push(m);
        }
        Ok(out)
    }
}

/// The fixed ordered deploy set {namespace, deployment, service}. A set
/// presented out of order (service before deployment, workload before its
/// namespace) is rejected here, before anything reaches the cluster API:
/// probes and selectors in later manifests may reference earlier ones.
#[derive(Clone, Debug)]
pub struct ManifestSet {
    manifests: Vec<Manifest>,
}

impl ManifestSet {
    pub fn new(manifests: Vec<Manifest>) -> Result<ManifestSet> {
        let mut prev: Option<&Manifest> = None;
        for m in &manifests {
            if let Some(p) = prev {
                if m.rank() < p.rank() {
                    // the earlier-ranked resource is where it belongs; the
                    // one before it is the misplaced one
                    return Err(Error::ManifestApplyFailed {
                        resource: p.resource_id(),
                        reason: format!(
                            "{} is ordered before the {} it must follow; required order is namespace, deployment, service",
                            p.kind_name(),
                            m.kind_name()
                        ),
                    });
                }
            }
            prev = Some(m);
        }
        if !manifests.iter().any(|m| matches!(m, Manifest::Deployment(_))) {
            return Err(Error::Other("deploy set contains no deployment".to_string()));
        }
        Ok(ManifestSet { manifests })
    }

    pub fn iter(&self) -> std::slice::Iter<Manifest> {
        self.manifests.iter()
    }

    /// Extract the rollout target from the set's deployment.
    pub fn target(&self, namespace: &str) -> Result<DeploymentTarget> {
        let deploy = self
            .manifests
            .iter()
            .find_map(|m| match m {
                Manifest::Deployment(d) => Some(d),
                _ => None,
            })
            .ok_or_else(|| Error::Other("deploy set contains no deployment".to_string()))?;
        let spec = deploy
            .spec
            .as_ref()
            .ok_or_else(|| Error::Other("deployment manifest has no spec".to_string()))?;
        let selector = spec
            .selector
            .match_labels
            .as_ref()
            .map(|labels| {
                labels
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<String>>()
                    .join(",")
            })
            .unwrap_or_default();
        Ok(DeploymentTarget {
            name: deploy.name_any(),
            namespace: namespace.to_string(),
            replicas: spec.replicas.unwrap_or(1),
            selector,
        })
    }
}

/// What the rollout watcher and image updates act upon.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentTarget {
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
    pub selector: String,
}

/// Seam over the cluster API for namespace creation and manifest apply, so
/// the stage sequencing is testable without a cluster.
pub trait ResourceApplier {
    /// Create-if-absent. Returns true when the namespace was created by this
    /// call, false when it already existed (which is success).
    fn ensure_namespace(&self, name: &str) -> impl std::future::Future<Output = Result<bool>> + Send;
    fn apply(&self, manifest: &Manifest) -> impl std::future::Future<Output = Result<()>> + Send;
    fn set_image(
        &self,
        target: &DeploymentTarget,
        container: &str,
        image: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Real applier over the kube client, using server-side apply so re-applying
/// identical content is a no-op and conflicting content merges per the API
/// server's semantics.
#[derive(Clone)]
pub struct KubeApplier {
    client: Client,
    namespace: String,
}

impl KubeApplier {
    #[must_use]
    pub fn new(client: Client, namespace: &str) -> KubeApplier {
        KubeApplier {
            client,
            namespace: namespace.to_string(),
        }
    }
}

impl ResourceApplier for KubeApplier {
    async fn ensure_namespace(&self, name: &str) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => {
                tracing::info!("created namespace '{name}'");
                Ok(true)
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                tracing::debug!("namespace '{name}' already exists");
                Ok(false)
            }
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    async fn apply(&self, manifest: &Manifest) -> Result<()> {
        let ps = PatchParams::apply(MANAGER).force();
        match manifest {
            Manifest::Namespace(ns) => {
                let api: Api<Namespace> = Api::all(self.client.clone());
                api.patch(&ns.name_any(), &ps, &Patch::Apply(ns)).await?;
            }
            Manifest::Deployment(d) => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);
                api.patch(&d.name_any(), &ps, &Patch::Apply(d)).await?;
            }
            Manifest::Service(s) => {
                let api: Api<Service> = Api::namespaced(self.client.clone(), &self.namespace);
                api.patch(&s.name_any(), &ps, &Patch::Apply(s)).await?;
            }
        }
        tracing::info!("applied {}", manifest.resource_id());
        Ok(())
    }

    async fn set_image(
        &self,
        target: &DeploymentTarget,
        container: &str,
        image: &str,
    ) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &target.namespace);
        let patch = serde_json::json!({
            "spec": { "template": { "spec": { "containers": [
                { "name": container, "image": image }
            ]}}}
        });
        api.patch(
            &target.name,
            &PatchParams::default(),
            &Patch::Strategic(patch),
        )
        .await?;
        tracing::info!("set image of {}/{} to {image}", target.namespace, target.name);
        Ok(())
    }
}

/// Apply the set in its fixed order, namespace creation first. The first
/// failure aborts the remaining applies; whatever was applied stays as-is
/// since the API offers no atomic multi-resource apply.
pub async fn apply_manifests<A: ResourceApplier>(
    applier: &A,
    namespace: &str,
    set: &ManifestSet,
) -> Result<()> {
    applier
        .ensure_namespace(namespace)
        .await
        .map_err(|e| Error::ManifestApplyFailed {
            resource: format!("namespace/{namespace}"),
            reason: e.to_string(),
        })?;
    for manifest in set.iter() {
        applier
            .apply(manifest)
            .await
            .map_err(|e| Error::ManifestApplyFailed {
                resource: manifest.resource_id(),
                reason: e.to_string(),
            })?;
    }
    Ok(())
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::Mutex;

    pub const DEMO_SET: &str = r#"
apiVersion: v1
kind: Namespace
metadata:
  name: demo
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: pipeline-demo
  namespace: demo
spec:
  replicas: 1
  selector:
    matchLabels:
      app: pipeline-demo
  template:
    metadata:
      labels:
        app: pipeline-demo
    spec:
      containers:
      - name: api
        image: localhost:5001/pipeline-demo:latest
        ports:
        - containerPort: 8000
---
apiVersion: v1
kind: Service
metadata:
  name: pipeline-demo
  namespace: demo
spec:
  type: NodePort
  selector:
    app: pipeline-demo
  ports:
  - port: 8000
    nodePort: 30080
"#;

    /// Recording fake used here and by the pipeline tests.
    #[derive(Default)]
    pub struct RecordingApplier {
        pub applied: Mutex<Vec<String>>,
        pub namespaces: Mutex<Vec<String>>,
        pub images: Mutex<Vec<String>>,
        pub fail_on: Option<String>,
        pub namespace_exists: bool,
    }

    impl ResourceApplier for RecordingApplier {
        async fn ensure_namespace(&self, name: &str) -> Result<bool> {
            self.namespaces.lock().unwrap().push(name.to_string());
            Ok(!self.namespace_exists)
        }

        async fn apply(&self, manifest: &Manifest) -> Result<()> {
            let id = manifest.resource_id();
            if self.fail_on.as_deref() == Some(id.as_str()) {
                return Err(Error::Other("server rejected the manifest".to_string()));
            }
            self.applied.lock().unwrap().push(id);
            Ok(())
        }

        async fn set_image(
            &self,
            target: &DeploymentTarget,
            container: &str,
            image: &str,
        ) -> Result<()> {
            self.images
                .lock()
                .unwrap()
                .push(format!("{}/{container}={image}", target.name));
            Ok(())
        }
    }

    fn demo_set() -> ManifestSet {
        ManifestSet::new(Manifest::parse_all(DEMO_SET).unwrap()).unwrap()
    }

    #[test]
    fn test_parse_all_classifies_the_fixed_set() {
        let manifests = Manifest::parse_all(DEMO_SET).unwrap();
        let kinds: Vec<&str> = manifests.iter().map(|m| m.kind_name()).collect();
        assert_eq!(kinds, vec!["Namespace", "Deployment", "Service"]);
    }

    #[test]
    fn test_parse_all_rejects_unknown_kind() {
        let yaml = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm\n";
        assert!(Manifest::parse_all(yaml).is_err());
    }

    #[test]
    fn test_set_rejects_service_before_deployment() {
        let mut manifests = Manifest::parse_all(DEMO_SET).unwrap();
        manifests.swap(1, 2);
        let err = ManifestSet::new(manifests).unwrap_err();
        // the diagnostic names the misplaced service, not the deployment
        // that exposed it
        match err {
            Error::ManifestApplyFailed { resource, reason } => {
                assert_eq!(resource, "service/pipeline-demo");
                assert!(reason.contains("Service is ordered before the Deployment"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_set_requires_a_deployment() {
        let yaml = "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: demo\n";
        let manifests = Manifest::parse_all(yaml).unwrap();
        assert!(ManifestSet::new(manifests).is_err());
    }

    #[test]
    fn test_target_extraction() {
        let target = demo_set().target("demo").unwrap();
        assert_eq!(target.name, "pipeline-demo");
        assert_eq!(target.replicas, 1);
        assert_eq!(target.selector, "app=pipeline-demo");
    }

    #[tokio::test]
    async fn test_apply_walks_the_set_in_order() {
        let applier = RecordingApplier::default();
        apply_manifests(&applier, "demo", &demo_set()).await.unwrap();
        assert_eq!(applier.namespaces.lock().unwrap().clone(), vec!["demo"]);
        assert_eq!(
            applier.applied.lock().unwrap().clone(),
            vec![
                "namespace/demo",
                "deployment/pipeline-demo",
                "service/pipeline-demo"
            ]
        );
    }

    #[tokio::test]
    async fn test_apply_existing_namespace_is_success() {
        let applier = RecordingApplier {
            namespace_exists: true,
            ..RecordingApplier::default()
        };
        assert!(apply_manifests(&applier, "demo", &demo_set()).await.is_ok());
    }

    #[tokio::test]
    async fn test_apply_aborts_after_first_failure() {
        let applier = RecordingApplier {
            fail_on: Some("deployment/pipeline-demo".to_string()),
            ..RecordingApplier::default()
        };
        let err = apply_manifests(&applier, "demo", &demo_set())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ManifestApplyFailed { ref resource, .. } if resource == "deployment/pipeline-demo"
        ));
        // the service apply never happened, and nothing is rolled back
        assert_eq!(
            applier.applied.lock().unwrap().clone(),
            vec!["namespace/demo"]
        );
    }
}
