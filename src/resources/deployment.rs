//! Control plane and data plane workload deployments.

use super::{child_meta, selector_labels, GenerateError};
use crate::constants::*;
use crate::crd::{ControlPlane, DataPlane};
use crate::owned::OwnerIdentity;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use serde::Serialize;
use std::collections::BTreeMap;

const CLUSTER_CERTIFICATE_VOLUME: &str = "cluster-certificate";
const CLUSTER_CERTIFICATE_PATH: &str = "/var/cluster-certificate";
const WEBHOOK_CERTIFICATE_VOLUME: &str = "admission-webhook-certificate";
const WEBHOOK_CERTIFICATE_PATH: &str = "/admission-webhook";

/// Inputs of the control plane deployment besides the parent spec
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ControlPlaneDeploymentInputs {
    pub image: String,
    pub service_account: String,
    pub admin_cert_secret: String,
    /// Serving certificate of the admission webhook, when provisioned
    pub webhook_cert_secret: Option<String>,
    /// Validated watch namespaces; empty watches all namespaces
    pub watch_namespaces: Vec<String>,
    /// `<namespace>/<service>` of the data plane ingress service
    pub publish_service: Option<String>,
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..EnvVar::default()
    }
}

/// Insert or replace env vars by name, keeping user-provided entries otherwise
fn upsert_env(container: &mut Container, vars: Vec<EnvVar>) {
    let current = container.env.get_or_insert_with(Vec::new);
    for var in vars {
        match current.iter_mut().find(|e| e.name == var.name) {
            Some(slot) => *slot = var,
            None => current.push(var),
        }
    }
}

fn remove_env(container: &mut Container, name: &str) {
    if let Some(current) = container.env.as_mut() {
        current.retain(|e| e.name != name);
    }
}

fn upsert_volume(spec: &mut PodSpec, name: &str, secret: &str) {
    let volume = Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            ..SecretVolumeSource::default()
        }),
        ..Volume::default()
    };
    let volumes = spec.volumes.get_or_insert_with(Vec::new);
    match volumes.iter_mut().find(|v| v.name == name) {
        Some(slot) => *slot = volume,
        None => volumes.push(volume),
    }
}

fn upsert_mount(container: &mut Container, name: &str, path: &str) {
    let mount = VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..VolumeMount::default()
    };
    let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
    match mounts.iter_mut().find(|m| m.name == name) {
        Some(slot) => *slot = mount,
        None => mounts.push(mount),
    }
}

/// User template with the named container guaranteed to exist
fn base_template(user: Option<&PodTemplateSpec>, container: &str) -> PodTemplateSpec {
    let mut template = user.cloned().unwrap_or_default();
    let spec = template.spec.get_or_insert_with(PodSpec::default);
    if !spec.containers.iter().any(|c| c.name == container) {
        spec.containers.push(Container {
            name: container.to_string(),
            ..Container::default()
        });
    }
    template
}

fn container_mut<'a>(
    template: &'a mut PodTemplateSpec,
    name: &'static str,
) -> Result<&'a mut Container, GenerateError> {
    template
        .spec
        .as_mut()
        .and_then(|spec| spec.containers.iter_mut().find(|c| c.name == name))
        .ok_or(GenerateError::ContainerNotFound(name))
}

fn finish_template(template: &mut PodTemplateSpec, selector: &BTreeMap<String, String>) {
    let meta = template.metadata.get_or_insert_with(ObjectMeta::default);
    meta.labels
        .get_or_insert_with(BTreeMap::new)
        .extend(selector.clone());
}

fn deployment(
    owner: &OwnerIdentity,
    replicas: Option<i32>,
    template: PodTemplateSpec,
    selector: BTreeMap<String, String>,
) -> Deployment {
    let mut deployment = Deployment {
        metadata: child_meta(owner, Some(&owner.namespace), ""),
        spec: Some(DeploymentSpec {
            replicas,
            selector: LabelSelector {
                match_labels: Some(selector),
                ..LabelSelector::default()
            },
            template,
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    };
    owner.mark(&mut deployment);
    deployment
}

/// Controller deployment of a ControlPlane.
///
/// Stays dormant (zero replicas) while no DataPlane is set.
pub fn generate_control_plane_deployment(
    cp: &ControlPlane,
    owner: &OwnerIdentity,
    inputs: &ControlPlaneDeploymentInputs,
) -> Result<Deployment, GenerateError> {
    let selector = selector_labels(owner);
    let mut template = base_template(
        cp.spec.deployment.pod_template_spec.as_ref(),
        CONTROL_PLANE_CONTAINER,
    );

    {
        let container = container_mut(&mut template, CONTROL_PLANE_CONTAINER)?;
        container.image = Some(inputs.image.clone());

        let mut vars = vec![
            env(
                "CONTROLLER_KONG_ADMIN_TLS_CLIENT_CERT_FILE",
                format!("{CLUSTER_CERTIFICATE_PATH}/tls.crt"),
            ),
            env(
                "CONTROLLER_KONG_ADMIN_TLS_CLIENT_KEY_FILE",
                format!("{CLUSTER_CERTIFICATE_PATH}/tls.key"),
            ),
            env(
                "CONTROLLER_KONG_ADMIN_CA_CERT_FILE",
                format!("{CLUSTER_CERTIFICATE_PATH}/ca.crt"),
            ),
        ];
        if !inputs.watch_namespaces.is_empty() {
            vars.push(env(
                "CONTROLLER_WATCH_NAMESPACE",
                inputs.watch_namespaces.join(","),
            ));
        }
        if inputs.webhook_cert_secret.is_some() {
            vars.push(env(
                "CONTROLLER_ADMISSION_WEBHOOK_LISTEN",
                format!("0.0.0.0:{ADMISSION_WEBHOOK_LISTEN_PORT}"),
            ));
            upsert_mount(container, WEBHOOK_CERTIFICATE_VOLUME, WEBHOOK_CERTIFICATE_PATH);
        }
        match inputs.publish_service.as_deref() {
            Some(service) => vars.push(env(PUBLISH_SERVICE_ENV, service)),
            None => remove_env(container, PUBLISH_SERVICE_ENV),
        }
        upsert_env(container, vars);
        upsert_mount(container, CLUSTER_CERTIFICATE_VOLUME, CLUSTER_CERTIFICATE_PATH);
    }

    if let Some(spec) = template.spec.as_mut() {
        spec.service_account_name = Some(inputs.service_account.clone());
        upsert_volume(spec, CLUSTER_CERTIFICATE_VOLUME, &inputs.admin_cert_secret);
        if let Some(secret) = inputs.webhook_cert_secret.as_deref() {
            upsert_volume(spec, WEBHOOK_CERTIFICATE_VOLUME, secret);
        }
    }
    finish_template(&mut template, &selector);

    let replicas = if cp.data_plane_name().is_some() {
        Some(cp.spec.deployment.replicas.unwrap_or(1))
    } else {
        Some(REPLICAS_WHEN_NO_DATA_PLANE)
    };
    Ok(deployment(owner, replicas, template, selector))
}

/// Proxy deployment of a DataPlane
pub fn generate_data_plane_deployment(
    dp: &DataPlane,
    owner: &OwnerIdentity,
    image: &str,
) -> Result<Deployment, GenerateError> {
    let selector = selector_labels(owner);
    let mut template = base_template(
        dp.spec.deployment.pod_template_spec.as_ref(),
        DATA_PLANE_CONTAINER,
    );

    {
        let container = container_mut(&mut template, DATA_PLANE_CONTAINER)?;
        container.image = Some(image.to_string());
        upsert_env(
            container,
            vec![
                env(
                    "KONG_PROXY_LISTEN",
                    format!(
                        "0.0.0.0:{DATA_PLANE_PROXY_PORT} reuseport backlog=16384, 0.0.0.0:{DATA_PLANE_PROXY_SSL_PORT} http2 ssl reuseport backlog=16384"
                    ),
                ),
                env("KONG_ADMIN_LISTEN", format!("0.0.0.0:{DATA_PLANE_ADMIN_PORT} http2 ssl")),
                env("KONG_DATABASE", "off"),
            ],
        );
        if container.ports.is_none() {
            container.ports = Some(vec![
                port("proxy", DATA_PLANE_PROXY_PORT),
                port("proxy-ssl", DATA_PLANE_PROXY_SSL_PORT),
                port("admin-ssl", DATA_PLANE_ADMIN_PORT),
            ]);
        }
    }
    finish_template(&mut template, &selector);

    Ok(deployment(
        owner,
        Some(dp.spec.deployment.replicas.unwrap_or(1)),
        template,
        selector,
    ))
}

fn port(name: &str, container_port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port,
        protocol: Some("TCP".to_string()),
        ..ContainerPort::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MANAGED_BY_DATA_PLANE;
    use crate::crd::DataPlaneSpec;
    use crate::resources::test_support::{control_plane, owner};

    fn inputs() -> ControlPlaneDeploymentInputs {
        ControlPlaneDeploymentInputs {
            image: "kong/kubernetes-ingress-controller:3.4.1".to_string(),
            service_account: "controlplane-kong-sa".to_string(),
            admin_cert_secret: "controlplane-kong-admin".to_string(),
            ..ControlPlaneDeploymentInputs::default()
        }
    }

    fn env_value(d: &Deployment, name: &str) -> Option<String> {
        d.spec.as_ref()?.template.spec.as_ref()?.containers[0]
            .env
            .as_ref()?
            .iter()
            .find(|e| e.name == name)?
            .value
            .clone()
    }

    #[test]
    fn test_dormant_without_data_plane() {
        let mut cp = control_plane("kong", "gateway");
        cp.spec.deployment.replicas = Some(3);
        let d = generate_control_plane_deployment(&cp, &owner(&cp), &inputs()).unwrap();
        assert_eq!(d.spec.as_ref().and_then(|s| s.replicas), Some(0));
        assert_eq!(env_value(&d, PUBLISH_SERVICE_ENV), None);
    }

    #[test]
    fn test_declared_replicas_and_publish_service_with_data_plane() {
        let mut cp = control_plane("kong", "gateway");
        cp.spec.deployment.replicas = Some(3);
        cp.spec.data_plane = Some("dp".to_string());
        let inputs = ControlPlaneDeploymentInputs {
            publish_service: Some("gateway/dataplane-ingress-dp-abcde".to_string()),
            ..inputs()
        };
        let d = generate_control_plane_deployment(&cp, &owner(&cp), &inputs).unwrap();
        assert_eq!(d.spec.as_ref().and_then(|s| s.replicas), Some(3));
        assert_eq!(
            env_value(&d, PUBLISH_SERVICE_ENV).as_deref(),
            Some("gateway/dataplane-ingress-dp-abcde")
        );
    }

    #[test]
    fn test_user_publish_service_removed_when_data_plane_unset() {
        let mut cp = control_plane("kong", "gateway");
        cp.spec.deployment.pod_template_spec = Some(PodTemplateSpec {
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: CONTROL_PLANE_CONTAINER.to_string(),
                    env: Some(vec![env(PUBLISH_SERVICE_ENV, "stale/svc"), env("KEEP", "me")]),
                    ..Container::default()
                }],
                ..PodSpec::default()
            }),
            ..PodTemplateSpec::default()
        });
        let d = generate_control_plane_deployment(&cp, &owner(&cp), &inputs()).unwrap();
        assert_eq!(env_value(&d, PUBLISH_SERVICE_ENV), None);
        assert_eq!(env_value(&d, "KEEP").as_deref(), Some("me"));
    }

    #[test]
    fn test_watch_namespaces_and_selector() {
        let cp = control_plane("kong", "gateway");
        let owner = owner(&cp);
        let inputs = ControlPlaneDeploymentInputs {
            watch_namespaces: vec!["a".to_string(), "gateway".to_string()],
            ..inputs()
        };
        let d = generate_control_plane_deployment(&cp, &owner, &inputs).unwrap();
        assert_eq!(
            env_value(&d, "CONTROLLER_WATCH_NAMESPACE").as_deref(),
            Some("a,gateway")
        );
        let spec = d.spec.unwrap();
        assert_eq!(spec.selector.match_labels, Some(selector_labels(&owner)));
        assert_eq!(
            spec.template.spec.unwrap().service_account_name.as_deref(),
            Some("controlplane-kong-sa")
        );
    }

    #[test]
    fn test_data_plane_defaults() {
        let mut dp = DataPlane::new("dp", DataPlaneSpec::default());
        dp.metadata.namespace = Some("gateway".to_string());
        dp.metadata.uid = Some("dp-uid".to_string());
        let owner = OwnerIdentity::of(&dp, MANAGED_BY_DATA_PLANE).unwrap();
        let d = generate_data_plane_deployment(&dp, &owner, "kong:3.9").unwrap();
        let spec = d.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.containers[0].name, DATA_PLANE_CONTAINER);
        assert_eq!(pod.containers[0].image.as_deref(), Some("kong:3.9"));
        assert_eq!(pod.containers[0].ports.as_ref().map(Vec::len), Some(3));
    }
}
