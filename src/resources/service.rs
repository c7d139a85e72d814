//! Services of the control plane webhook and the data plane proxy.

use super::{child_meta, selector_labels, with_label};
use crate::constants::*;
use crate::crd::DataPlane;
use crate::owned::OwnerIdentity;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

const DEFAULT_INGRESS_SERVICE_TYPE: &str = "LoadBalancer";

fn service_port(name: &str, port: i32, target: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(target)),
        protocol: Some("TCP".to_string()),
        ..ServicePort::default()
    }
}

fn service(owner: &OwnerIdentity, role: &str, spec: ServiceSpec) -> Service {
    let meta = with_label(
        child_meta(owner, Some(&owner.namespace), &format!("{role}-")),
        SERVICE_ROLE_LABEL,
        role,
    );
    let mut service = Service {
        metadata: meta,
        spec: Some(spec),
        ..Service::default()
    };
    owner.mark(&mut service);
    service
}

/// Admission webhook service in front of the controller pods
pub fn generate_webhook_service(owner: &OwnerIdentity) -> Service {
    service(
        owner,
        USAGE_WEBHOOK,
        ServiceSpec {
            selector: Some(selector_labels(owner)),
            ports: Some(vec![service_port(
                USAGE_WEBHOOK,
                ADMISSION_WEBHOOK_SERVICE_PORT,
                ADMISSION_WEBHOOK_LISTEN_PORT,
            )]),
            ..ServiceSpec::default()
        },
    )
}

/// Public proxy service of a DataPlane
pub fn generate_ingress_service(dp: &DataPlane, owner: &OwnerIdentity) -> Service {
    let options = &dp.spec.network.services.ingress;
    let ports = if options.ports.is_empty() {
        vec![
            service_port("http", 80, DATA_PLANE_PROXY_PORT),
            service_port("https", 443, DATA_PLANE_PROXY_SSL_PORT),
        ]
    } else {
        options
            .ports
            .iter()
            .map(|p| {
                service_port(
                    &p.name,
                    p.port,
                    p.target_port.unwrap_or(DATA_PLANE_PROXY_PORT),
                )
            })
            .collect()
    };

    let mut svc = service(
        owner,
        USAGE_INGRESS,
        ServiceSpec {
            type_: Some(
                options
                    .r#type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_INGRESS_SERVICE_TYPE.to_string()),
            ),
            selector: Some(selector_labels(owner)),
            ports: Some(ports),
            ..ServiceSpec::default()
        },
    );
    if !options.annotations.is_empty() {
        svc.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .extend(options.annotations.clone());
    }
    svc
}

/// Headless admin API service the control plane discovers proxy pods through
pub fn generate_admin_service(owner: &OwnerIdentity) -> Service {
    service(
        owner,
        USAGE_ADMIN,
        ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(selector_labels(owner)),
            ports: Some(vec![service_port(
                "admin",
                DATA_PLANE_ADMIN_PORT,
                DATA_PLANE_ADMIN_PORT,
            )]),
            publish_not_ready_addresses: Some(true),
            ..ServiceSpec::default()
        },
    )
}
