//! Rendering desired deployment state into state repository files.
//!
//! Layout, per stage:
//!
//! ```text
//! state/{stage}/kube-resources/riser-managed/{namespace}/deployments/{name}/
//!     deployment.{name}.json
//!     trafficsplit.{name}.json
//! state/{stage}/riser-config/{namespace}/{name}.json
//! ```

use riser_id::{AppId, RiserRevision};
use riser_state_repo::ResourceFile;
use riser_traffic::TrafficConfig;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::model::{DeploymentConfig, Reservation};

const API_VERSION: &str = "apps.riser.dev/v1";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("error serializing {kind}: {source}")]
    Serialize {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything needed to render one deployment in one stage.
#[derive(Debug, Clone, Copy)]
pub struct DesiredState<'a> {
    pub reservation: &'a Reservation,
    pub stage: &'a str,
    pub riser_revision: RiserRevision,
    pub traffic: &'a TrafficConfig,
    pub config: &'a DeploymentConfig,
}

/// Turns desired state into repository files.
///
/// Implementations are pure: no I/O and the same input always yields the
/// same files.
pub trait ResourceRenderer: Send + Sync {
    fn render(&self, state: &DesiredState<'_>) -> Result<Vec<ResourceFile>, RenderError>;

    /// Files removing every trace of a deployment from a stage.
    fn render_removal(&self, name: &str, namespace: &str, stage: &str) -> Vec<ResourceFile>;
}

/// Renders JSON manifests for the cluster-side agent.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestRenderer;

impl ManifestRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl ResourceRenderer for ManifestRenderer {
    fn render(&self, state: &DesiredState<'_>) -> Result<Vec<ResourceFile>, RenderError> {
        let reservation = state.reservation;
        let (name, namespace) = (reservation.name.as_str(), reservation.namespace.as_str());
        let spec_hash = SpecHash::of(state.config)?;
        let dir = resources_dir(state.stage, namespace, name);

        let workload = json!({
            "apiVersion": API_VERSION,
            "kind": "Deployment",
            "metadata": metadata(state, &spec_hash),
            "spec": {
                "revisionName": state.riser_revision.revision_name(name),
                "image": state.config.image,
                "port": state.config.port,
                "env": state
                    .config
                    .environment
                    .iter()
                    .map(|(k, v)| json!({"name": k, "value": v}))
                    .collect::<Vec<_>>(),
            },
        });

        let traffic_split = json!({
            "apiVersion": API_VERSION,
            "kind": "TrafficSplit",
            "metadata": metadata(state, &spec_hash),
            "spec": {
                "routes": state.traffic,
            },
        });

        let config = ConfigDocument {
            app_id: reservation.app_id,
            name,
            namespace,
            stage: state.stage,
            riser_revision: state.riser_revision,
            spec_hash: spec_hash.as_str(),
            config: state.config,
        };

        Ok(vec![
            ResourceFile::write(
                format!("{dir}/deployment.{name}.json"),
                to_file("deployment", &workload)?,
            ),
            ResourceFile::write(
                format!("{dir}/trafficsplit.{name}.json"),
                to_file("traffic split", &traffic_split)?,
            ),
            ResourceFile::write(
                config_path(state.stage, namespace, name),
                to_file("config", &config)?,
            ),
        ])
    }

    fn render_removal(&self, name: &str, namespace: &str, stage: &str) -> Vec<ResourceFile> {
        vec![
            ResourceFile::delete(resources_dir(stage, namespace, name)),
            ResourceFile::delete(config_path(stage, namespace, name)),
        ]
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigDocument<'a> {
    app_id: AppId,
    name: &'a str,
    namespace: &'a str,
    stage: &'a str,
    riser_revision: RiserRevision,
    spec_hash: &'a str,
    config: &'a DeploymentConfig,
}

fn metadata(state: &DesiredState<'_>, spec_hash: &SpecHash) -> serde_json::Value {
    let reservation = state.reservation;
    json!({
        "name": reservation.name,
        "namespace": reservation.namespace,
        "labels": {
            "riser.dev/app": reservation.app_id,
            "riser.dev/deployment": reservation.name,
            "riser.dev/stage": state.stage,
        },
        "annotations": {
            "riser.dev/revision": state.riser_revision.to_string(),
            "riser.dev/spec-hash": spec_hash.as_str(),
        },
    })
}

pub fn resources_dir(stage: &str, namespace: &str, name: &str) -> String {
    format!("state/{stage}/kube-resources/riser-managed/{namespace}/deployments/{name}")
}

pub fn config_path(stage: &str, namespace: &str, name: &str) -> String {
    format!("state/{stage}/riser-config/{namespace}/{name}.json")
}

fn to_file(kind: &'static str, value: &impl Serialize) -> Result<Vec<u8>, RenderError> {
    let mut bytes = serde_json::to_vec_pretty(value)
        .map_err(|source| RenderError::Serialize { kind, source })?;
    bytes.push(b'\n');
    Ok(bytes)
}

// =============================================================================
// Spec Hash
// =============================================================================

/// Content hash of a deployment config, for detecting config changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpecHash(String);

impl SpecHash {
    /// Hash the canonical JSON form of `config`.
    pub fn of(config: &DeploymentConfig) -> Result<Self, RenderError> {
        // Going through `Value` sorts object keys, which makes the bytes canonical.
        let value = serde_json::to_value(config).map_err(|source| RenderError::Serialize {
            kind: "config",
            source,
        })?;
        let canonical = serde_json::to_vec(&value).map_err(|source| RenderError::Serialize {
            kind: "config",
            source,
        })?;
        let digest = Sha256::digest(&canonical);
        Ok(Self(format!("sha256:{}", hex::encode(&digest[..16]))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpecHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use riser_traffic::TrafficRule;

    use super::*;

    fn config(image: &str) -> DeploymentConfig {
        DeploymentConfig {
            image: image.to_string(),
            environment: BTreeMap::from([
                ("LOG_LEVEL".to_string(), "debug".to_string()),
                ("A_FIRST".to_string(), "1".to_string()),
            ]),
            port: Some(8080),
        }
    }

    fn parse(file: &ResourceFile) -> serde_json::Value {
        serde_json::from_slice(&file.contents).unwrap()
    }

    #[test]
    fn test_render_writes_resources_and_config() {
        let reservation = Reservation::new(AppId::new(), "myapp", "apps");
        let traffic = TrafficConfig::new(vec![
            TrafficRule::new("myapp", RiserRevision::new(4), 0),
            TrafficRule::new("myapp", RiserRevision::new(3), 100),
        ]);
        let config = config("myapp:4");
        let state = DesiredState {
            reservation: &reservation,
            stage: "prod",
            riser_revision: RiserRevision::new(4),
            traffic: &traffic,
            config: &config,
        };

        let files = ManifestRenderer::new().render(&state).unwrap();

        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "state/prod/kube-resources/riser-managed/apps/deployments/myapp/deployment.myapp.json",
                "state/prod/kube-resources/riser-managed/apps/deployments/myapp/trafficsplit.myapp.json",
                "state/prod/riser-config/apps/myapp.json",
            ]
        );
        assert!(files.iter().all(|f| !f.delete));

        let workload = parse(&files[0]);
        assert_eq!(workload["kind"], "Deployment");
        assert_eq!(workload["spec"]["revisionName"], "myapp-4");
        assert_eq!(workload["spec"]["env"][0]["name"], "A_FIRST");
        assert_eq!(workload["metadata"]["annotations"]["riser.dev/revision"], "4");

        let split = parse(&files[1]);
        assert_eq!(split["spec"]["routes"][0]["revisionName"], "myapp-4");
        assert_eq!(split["spec"]["routes"][0]["percent"], 0);
        assert_eq!(split["spec"]["routes"][1]["riserRevision"], 3);

        let doc = parse(&files[2]);
        assert_eq!(doc["riserRevision"], 4);
        assert_eq!(doc["config"]["image"], "myapp:4");
        assert_eq!(
            doc["specHash"],
            SpecHash::of(&config).unwrap().as_str()
        );
    }

    #[test]
    fn test_removal_deletes_resource_dir_and_config() {
        let files = ManifestRenderer::new().render_removal("myapp", "apps", "dev");
        assert_eq!(
            files,
            vec![
                ResourceFile::delete("state/dev/kube-resources/riser-managed/apps/deployments/myapp"),
                ResourceFile::delete("state/dev/riser-config/apps/myapp.json"),
            ]
        );
    }

    #[test]
    fn test_spec_hash_deterministic() {
        let a = SpecHash::of(&config("myapp:1")).unwrap();
        let b = SpecHash::of(&config("myapp:1")).unwrap();
        let c = SpecHash::of(&config("myapp:2")).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("sha256:"));
        assert_eq!(a.as_str().len(), "sha256:".len() + 32);
    }
}
