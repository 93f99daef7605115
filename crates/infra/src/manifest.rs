//! Kubernetes manifests applied inside the cluster stack.
//!
//! Pure functions producing the Secret, Deployment and Service for the
//! `api` workload. The Deployment never inlines secret values: every
//! environment variable is a `secretKeyRef` into the Secret, and its names
//! are exactly the Secret's key set.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::Result;

/// Name shared by the Secret, Deployment, container and Service.
pub const APP_LABEL: &str = "api";

/// Port the container listens on.
pub const CONTAINER_PORT: i32 = 8080;

/// Image tag deployed by the manifests and pushed by the pipeline.
pub const IMAGE_TAG: &str = "latest";

const ANNOTATION_SSL_CERT: &str = "service.beta.kubernetes.io/aws-load-balancer-ssl-cert";
const ANNOTATION_BACKEND_PROTOCOL: &str =
    "service.beta.kubernetes.io/aws-load-balancer-backend-protocol";
const ANNOTATION_SSL_PORTS: &str = "service.beta.kubernetes.io/aws-load-balancer-ssl-ports";

/// Flat secret record: variable name to literal value.
pub type SecretData = BTreeMap<String, String>;

/// Reference to one key of a Secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRef {
    pub name: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

/// Source of an environment variable value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueFrom {
    pub secret_key_ref: KeyRef,
}

/// Container environment binding sourced from the Secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerEnv {
    pub name: String,
    pub value_from: ValueFrom,
}

/// `app: api`
fn app_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), APP_LABEL.to_string())])
}

/// Environment bindings for every key of `secret`, in key order.
#[must_use]
pub fn container_env(secret: &SecretData) -> Vec<ContainerEnv> {
    secret
        .keys()
        .map(|key| ContainerEnv {
            name: key.clone(),
            value_from: ValueFrom {
                secret_key_ref: KeyRef {
                    name: APP_LABEL.to_string(),
                    key: key.clone(),
                    optional: None,
                },
            },
        })
        .collect()
}

/// Secret named `api` holding `values` as `stringData`.
///
/// # Errors
///
/// Returns an error if the manifest does not deserialize into a `Secret`.
pub fn secret(values: &SecretData) -> Result<Secret> {
    let manifest = json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": APP_LABEL },
        "stringData": values,
    });

    Ok(serde_json::from_value(manifest)?)
}

/// Single-replica Deployment running `<image_url>:latest`.
///
/// # Errors
///
/// Returns an error if the manifest does not deserialize into a `Deployment`.
pub fn deployment(image_url: &str, env: &[ContainerEnv]) -> Result<Deployment> {
    let labels = app_labels();
    let manifest = json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": APP_LABEL },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": labels },
            "template": {
                "metadata": { "labels": labels },
                "spec": {
                    "restartPolicy": "Always",
                    "containers": [{
                        "name": APP_LABEL,
                        "image": format!("{image_url}:{IMAGE_TAG}"),
                        "ports": [{ "containerPort": CONTAINER_PORT }],
                        "env": env,
                    }],
                },
            },
        },
    });

    Ok(serde_json::from_value(manifest)?)
}

/// LoadBalancer Service terminating TLS with `certificate_arn` and forwarding
/// plain HTTP to the container port.
///
/// # Errors
///
/// Returns an error if the manifest does not deserialize into a `Service`.
pub fn service(certificate_arn: &str) -> Result<Service> {
    let manifest = json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": APP_LABEL,
            "annotations": {
                ANNOTATION_SSL_CERT: certificate_arn,
                ANNOTATION_BACKEND_PROTOCOL: "http",
                ANNOTATION_SSL_PORTS: "https",
            },
        },
        "spec": {
            "type": "LoadBalancer",
            "ports": [
                { "name": "https", "protocol": "TCP", "port": 443, "targetPort": CONTAINER_PORT },
                { "name": "http", "protocol": "TCP", "port": 80, "targetPort": CONTAINER_PORT },
            ],
            "selector": app_labels(),
        },
    });

    Ok(serde_json::from_value(manifest)?)
}

/// The three manifests applied to the cluster as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadManifests {
    pub service: Service,
    pub secret: Secret,
    pub deployment: Deployment,
}

impl WorkloadManifests {
    /// Build all three manifests; env bindings are derived from `secret`.
    ///
    /// # Errors
    ///
    /// Returns an error if any manifest fails to build.
    pub fn build(secret_data: &SecretData, image_url: &str, certificate_arn: &str) -> Result<Self> {
        Ok(Self {
            service: service(certificate_arn)?,
            secret: secret(secret_data)?,
            deployment: deployment(image_url, &container_env(secret_data))?,
        })
    }

    /// Manifests as JSON values, in apply order (Service, Secret, Deployment).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_values(&self) -> Result<Vec<serde_json::Value>> {
        Ok(vec![
            serde_json::to_value(&self.service)?,
            serde_json::to_value(&self.secret)?,
            serde_json::to_value(&self.deployment)?,
        ])
    }

    /// Multi-document YAML, in apply order.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        let documents = [
            serde_yaml::to_string(&self.service)?,
            serde_yaml::to_string(&self.secret)?,
            serde_yaml::to_string(&self.deployment)?,
        ];
        Ok(documents.join("---\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn sample_secret() -> SecretData {
        SecretData::from([
            ("DATABASE_URL".to_string(), "mysql://a:b@h:3306/d".to_string()),
            ("AWS_REGION".to_string(), "ap-northeast-1".to_string()),
        ])
    }

    #[test]
    fn test_secret_shape() {
        let value = serde_json::to_value(secret(&sample_secret()).unwrap()).unwrap();
        assert_eq!(value["apiVersion"], "v1");
        assert_eq!(value["kind"], "Secret");
        assert_eq!(value["metadata"]["name"], "api");
        assert_eq!(value["stringData"]["AWS_REGION"], "ap-northeast-1");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_deployment_env_matches_secret_keys() {
        let data = sample_secret();
        let value =
            serde_json::to_value(deployment("repo", &container_env(&data)).unwrap()).unwrap();

        let container = &value["spec"]["template"]["spec"]["containers"][0];
        let names: BTreeSet<&str> = container["env"]
            .as_array()
            .unwrap()
            .iter()
            .map(|env| env["name"].as_str().unwrap())
            .collect();
        let keys: BTreeSet<&str> = data.keys().map(String::as_str).collect();
        assert_eq!(names, keys);

        for env in container["env"].as_array().unwrap() {
            assert!(env.get("value").is_none(), "secret values must not be inlined");
            assert_eq!(env["valueFrom"]["secretKeyRef"]["name"], "api");
            assert_eq!(env["valueFrom"]["secretKeyRef"]["key"], env["name"]);
        }
    }

    #[test]
    fn test_deployment_shape() {
        let value = serde_json::to_value(deployment("123.dkr.ecr/sample", &[]).unwrap()).unwrap();
        assert_eq!(value["apiVersion"], "apps/v1");
        assert_eq!(value["spec"]["replicas"], 1);
        assert_eq!(value["spec"]["selector"]["matchLabels"]["app"], "api");
        let pod = &value["spec"]["template"]["spec"];
        assert_eq!(pod["restartPolicy"], "Always");
        assert_eq!(pod["containers"][0]["image"], "123.dkr.ecr/sample:latest");
        assert_eq!(pod["containers"][0]["ports"][0]["containerPort"], 8080);
    }

    #[test]
    fn test_service_shape() {
        let value = serde_json::to_value(service("arn:cert").unwrap()).unwrap();
        let annotations = &value["metadata"]["annotations"];
        assert_eq!(annotations[ANNOTATION_SSL_CERT], "arn:cert");
        assert_eq!(annotations[ANNOTATION_BACKEND_PROTOCOL], "http");
        assert_eq!(annotations[ANNOTATION_SSL_PORTS], "https");

        assert_eq!(value["spec"]["type"], "LoadBalancer");
        let ports = value["spec"]["ports"].as_array().unwrap();
        let exposed: BTreeSet<i64> = ports.iter().map(|p| p["port"].as_i64().unwrap()).collect();
        assert_eq!(exposed, BTreeSet::from([80, 443]));
        assert!(ports.iter().all(|p| p["targetPort"] == 8080));
    }

    #[test]
    fn test_manifests_survive_yaml() {
        let manifests =
            WorkloadManifests::build(&sample_secret(), "repo", "arn:cert").unwrap();
        let yaml = manifests.to_yaml().unwrap();

        let docs: Vec<serde_json::Value> = yaml
            .split("---\n")
            .map(|doc| serde_yaml::from_str(doc).unwrap())
            .collect();
        assert_eq!(docs, manifests.to_values().unwrap());
    }
}
