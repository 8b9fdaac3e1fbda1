//! Kubernetes implementation of the cluster workload gateway.
//!
//! Pools map onto cluster objects as follows:
//!
//! ```text
//! ConfigMap <own-ns>/circleci-k8s-agent   runners=ns/pool,ns/pool
//! ConfigMap <ns>/circleci-<pool>          resourceclass, image, cpu, memory
//! Secret    <ns>/circleci-<pool>          circle-token, runner-token
//! Secret    <ns>/circleci-<pool>-env      extra worker variables (optional)
//! Pod       label circleci-runner=<pool>  one per live worker
//! Job       generateName <pool>-          one per launched worker
//! ```

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use fleet_id::{parse_pool_list, EnvKey, IdError, PoolRef, ResourceClass};
use fleet_reconcile::POOL_LABEL;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, EnvVar, EnvVarSource, Pod, PodSpec, PodTemplateSpec,
    ResourceRequirements, Secret, SecretKeySelector,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ListParams, PostParams};
use kube::Api;
use tracing::debug;

use crate::cluster::{
    pool_env_record_name, pool_record_name, ClusterWorkloads, EnvSource, LaunchedWorker,
    PoolSpec, WorkerTemplate, QUEUE_TOKEN_KEY,
};
use crate::config::Config;
use crate::credential::Credential;
use crate::error::{ScaleError, ScaleResult};

/// Service name used in errors and logs.
pub const KUBERNETES_SERVICE: &str = "kubernetes-api";

/// Key of the pool list in the fleet ConfigMap.
pub const RUNNERS_KEY: &str = "runners";

/// Pod phases that count as an active worker.
const ACTIVE_PHASES: [&str; 2] = ["Running", "Pending"];

/// Kubernetes API gateway.
pub struct KubernetesGateway {
    client: kube::Client,
    fleet_config_map: String,
}

impl KubernetesGateway {
    /// Create a gateway from the pod's service account, or from the local
    /// kubeconfig outside a cluster.
    pub async fn infer(config: &Config) -> ScaleResult<Self> {
        let mut kube_config = kube::Config::infer()
            .await
            .map_err(|e| setup_error(e.to_string()))?;
        kube_config.connect_timeout = Some(config.http_timeout);
        kube_config.read_timeout = Some(config.http_timeout);
        kube_config.write_timeout = Some(config.http_timeout);

        let client =
            kube::Client::try_from(kube_config).map_err(|e| setup_error(e.to_string()))?;
        Ok(Self::new(client, &config.fleet_config_map))
    }

    /// Create a gateway from an existing client.
    pub fn new(client: kube::Client, fleet_config_map: &str) -> Self {
        Self {
            client,
            fleet_config_map: fleet_config_map.to_string(),
        }
    }

    /// Namespace the autoscaler runs in.
    pub fn namespace(&self) -> &str {
        self.client.default_namespace()
    }

    async fn config_map(
        &self,
        api: Api<ConfigMap>,
        namespace: &str,
        name: &str,
    ) -> ScaleResult<RecordData> {
        debug!(namespace = %namespace, name = %name, "Fetching configmap");
        let object = api
            .get_opt(name)
            .await
            .map_err(|e| ScaleError::cluster(KUBERNETES_SERVICE, e))?
            .ok_or_else(|| ScaleError::MissingRecord {
                kind: "configmap",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;

        Ok(RecordData {
            name: format!("configmap {namespace}/{name}"),
            data: object.data.unwrap_or_default(),
        })
    }

    async fn secret(&self, pool: &PoolRef, name: &str) -> ScaleResult<Option<Secret>> {
        debug!(namespace = %pool.namespace, name = %name, "Fetching secret");
        Api::<Secret>::namespaced(self.client.clone(), pool.namespace.as_str())
            .get_opt(name)
            .await
            .map_err(|e| ScaleError::cluster(KUBERNETES_SERVICE, e))
    }
}

#[async_trait]
impl ClusterWorkloads for KubernetesGateway {
    async fn fleet_pools(&self) -> ScaleResult<Vec<PoolRef>> {
        let api = Api::<ConfigMap>::default_namespaced(self.client.clone());
        let record = self
            .config_map(api, self.namespace(), &self.fleet_config_map)
            .await?;
        let runners = record.require(RUNNERS_KEY)?;
        parse_pool_list(runners).map_err(|e| record.invalid(e))
    }

    async fn pool_spec(&self, pool: &PoolRef) -> ScaleResult<PoolSpec> {
        let api = Api::<ConfigMap>::namespaced(self.client.clone(), pool.namespace.as_str());
        let record = self
            .config_map(api, pool.namespace.as_str(), &pool_record_name(&pool.name))
            .await?;

        let resource_class = ResourceClass::parse(record.require("resourceclass")?)
            .map_err(|e| record.invalid(e))?;

        Ok(PoolSpec {
            pool: pool.clone(),
            resource_class,
            image: record.require_value("image")?,
            cpu: record.require_value("cpu")?,
            memory: record.require_value("memory")?,
        })
    }

    async fn extra_env_keys(&self, pool: &PoolRef) -> ScaleResult<BTreeSet<EnvKey>> {
        let name = pool_env_record_name(&pool.name);
        let Some(secret) = self.secret(pool, &name).await? else {
            return Ok(BTreeSet::new());
        };

        secret
            .data
            .unwrap_or_default()
            .keys()
            .map(|key| {
                EnvKey::parse(key).map_err(|e| ScaleError::InvalidValue {
                    record: format!("secret {}/{name}", pool.namespace),
                    source: e,
                })
            })
            .collect()
    }

    async fn credential(&self, pool: &PoolRef) -> ScaleResult<Credential> {
        let name = pool_record_name(&pool.name);
        let record = format!("secret {}/{name}", pool.namespace);
        let secret = self
            .secret(pool, &name)
            .await?
            .ok_or_else(|| ScaleError::MissingRecord {
                kind: "secret",
                namespace: pool.namespace.to_string(),
                name: name.clone(),
            })?;

        let token = secret
            .data
            .and_then(|mut data| data.remove(QUEUE_TOKEN_KEY))
            .ok_or_else(|| ScaleError::MissingField {
                record: record.clone(),
                field: QUEUE_TOKEN_KEY,
            })?;
        let token = String::from_utf8(token.0).map_err(|_| ScaleError::InvalidCredential {
            record: record.clone(),
        })?;

        Credential::new(token).ok_or(ScaleError::MissingField {
            record,
            field: QUEUE_TOKEN_KEY,
        })
    }

    async fn active_workers(&self, pool: &PoolRef) -> ScaleResult<u32> {
        let selector = format!("{POOL_LABEL}={}", pool.name);
        let pods = Api::<Pod>::namespaced(self.client.clone(), pool.namespace.as_str())
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| ScaleError::cluster(KUBERNETES_SERVICE, e))?;

        Ok(count_active(&pods.items))
    }

    async fn launch_worker(&self, worker: &WorkerTemplate) -> ScaleResult<LaunchedWorker> {
        let created = Api::<Job>::namespaced(self.client.clone(), worker.pool.namespace.as_str())
            .create(&PostParams::default(), &job_manifest(worker))
            .await
            .map_err(|e| ScaleError::cluster(KUBERNETES_SERVICE, e))?;

        Ok(LaunchedWorker {
            name: created.metadata.name.unwrap_or_default(),
        })
    }
}

/// Build the Job for one worker.
pub fn job_manifest(worker: &WorkerTemplate) -> Job {
    let env = worker
        .env
        .iter()
        .map(|var| match &var.source {
            EnvSource::Value(value) => EnvVar {
                name: var.name.clone(),
                value: Some(value.clone()),
                ..Default::default()
            },
            EnvSource::SecretKey { secret, key } => EnvVar {
                name: var.name.clone(),
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: secret.clone(),
                        key: key.clone(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        })
        .collect();

    let resources = BTreeMap::from([
        ("cpu".to_string(), Quantity(worker.cpu.clone())),
        ("memory".to_string(), Quantity(worker.memory.clone())),
    ]);

    Job {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-", worker.pool.name)),
            namespace: Some(worker.pool.namespace.to_string()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(BTreeMap::from([(
                        POOL_LABEL.to_string(),
                        worker.pool.name.to_string(),
                    )])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: "runner".to_string(),
                        image: Some(worker.image.clone()),
                        image_pull_policy: Some("IfNotPresent".to_string()),
                        env: Some(env),
                        resources: Some(ResourceRequirements {
                            requests: Some(resources.clone()),
                            limits: Some(resources),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn count_active(pods: &[Pod]) -> u32 {
    let count = pods
        .iter()
        .filter_map(|pod| pod.status.as_ref()?.phase.as_deref())
        .filter(|phase| ACTIVE_PHASES.contains(phase))
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

fn setup_error(message: String) -> ScaleError {
    ScaleError::ClientSetup {
        service: KUBERNETES_SERVICE,
        message,
    }
}

/// The `data` map of a ConfigMap, with the record name for errors.
struct RecordData {
    name: String,
    data: BTreeMap<String, String>,
}

impl RecordData {
    fn require(&self, field: &'static str) -> ScaleResult<&str> {
        self.data
            .get(field)
            .map(String::as_str)
            .ok_or_else(|| ScaleError::MissingField {
                record: self.name.clone(),
                field,
            })
    }

    /// Like [`RecordData::require`], treating a blank value as missing.
    fn require_value(&self, field: &'static str) -> ScaleResult<String> {
        let value = self.require(field)?.trim();
        if value.is_empty() {
            return Err(ScaleError::MissingField {
                record: self.name.clone(),
                field,
            });
        }
        Ok(value.to_string())
    }

    fn invalid(&self, source: IdError) -> ScaleError {
        ScaleError::InvalidValue {
            record: self.name.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::PodStatus;
    use serde_json::json;

    use super::*;

    fn template() -> WorkerTemplate {
        let spec = PoolSpec {
            pool: "ci/docker".parse().unwrap(),
            resource_class: "acme/docker".parse().unwrap(),
            image: "circleci/runner:launch-agent".to_string(),
            cpu: "500m".to_string(),
            memory: "1Gi".to_string(),
        };
        let keys = ["NPM_TOKEN".parse().unwrap()].into_iter().collect();
        WorkerTemplate::for_pool(&spec, &keys)
    }

    fn pod(phase: Option<&str>) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: phase.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_job_manifest_shape() {
        let job = serde_json::to_value(job_manifest(&template())).unwrap();

        assert_eq!(job["apiVersion"], "batch/v1");
        assert_eq!(job["kind"], "Job");
        assert_eq!(job["metadata"]["generateName"], "docker-");
        assert_eq!(job["metadata"]["namespace"], "ci");

        let pod = &job["spec"]["template"];
        assert_eq!(pod["metadata"]["labels"]["circleci-runner"], "docker");
        assert_eq!(pod["spec"]["restartPolicy"], "Never");

        let container = &pod["spec"]["containers"][0];
        assert_eq!(container["name"], "runner");
        assert_eq!(container["image"], "circleci/runner:launch-agent");
        assert_eq!(container["imagePullPolicy"], "IfNotPresent");
        assert_eq!(container["resources"]["requests"]["cpu"], "500m");
        assert_eq!(container["resources"]["limits"]["cpu"], "500m");
        assert_eq!(container["resources"]["requests"]["memory"], "1Gi");
        assert_eq!(container["resources"]["limits"]["memory"], "1Gi");
    }

    #[test]
    fn test_job_manifest_env() {
        let job = serde_json::to_value(job_manifest(&template())).unwrap();
        let env = job["spec"]["template"]["spec"]["containers"][0]["env"]
            .as_array()
            .unwrap()
            .clone();

        assert_eq!(env.len(), 4);
        assert_eq!(env[0]["name"], "CIRCLECI_RESOURCE_CLASS");
        assert_eq!(env[0]["value"], "acme/docker");
        assert_eq!(env[1]["name"], "LAUNCH_AGENT_RUNNER_MODE");
        assert_eq!(env[1]["value"], "single-task");
        assert_eq!(env[2]["name"], "CIRCLECI_API_TOKEN");
        assert_eq!(
            env[2]["valueFrom"]["secretKeyRef"],
            json!({ "name": "circleci-docker", "key": "runner-token" })
        );
        assert_eq!(env[3]["name"], "NPM_TOKEN");
        assert_eq!(
            env[3]["valueFrom"]["secretKeyRef"],
            json!({ "name": "circleci-docker-env", "key": "NPM_TOKEN" })
        );
        assert!(env[2].get("value").is_none());
    }

    #[test]
    fn test_dotted_pool_name_in_manifest() {
        let spec = PoolSpec {
            pool: "ci/docker.large".parse().unwrap(),
            resource_class: "acme/docker".parse().unwrap(),
            image: "runner".to_string(),
            cpu: "1".to_string(),
            memory: "1Gi".to_string(),
        };
        let job = job_manifest(&WorkerTemplate::for_pool(&spec, &BTreeSet::new()));

        assert_eq!(job.metadata.generate_name.as_deref(), Some("docker.large-"));
        let labels = job.spec.unwrap().template.metadata.unwrap().labels.unwrap();
        assert_eq!(labels["circleci-runner"], "docker.large");
    }

    #[test]
    fn test_count_active() {
        let pods = vec![
            pod(Some("Running")),
            pod(Some("Pending")),
            pod(Some("Succeeded")),
            pod(Some("Failed")),
            pod(None),
            Pod::default(),
        ];
        assert_eq!(count_active(&pods), 2);
        assert_eq!(count_active(&[]), 0);
    }

    #[test]
    fn test_record_require() {
        let record = RecordData {
            name: "configmap ci/circleci-docker".to_string(),
            data: BTreeMap::from([
                ("image".to_string(), "x".to_string()),
                ("cpu".to_string(), "  ".to_string()),
            ]),
        };
        assert_eq!(record.require("image").unwrap(), "x");
        let err = record.require("memory").unwrap_err();
        assert_eq!(err.to_string(), "memory not specified in configmap ci/circleci-docker");
        assert!(matches!(
            record.require_value("cpu").unwrap_err(),
            ScaleError::MissingField { field: "cpu", .. }
        ));
    }
}
