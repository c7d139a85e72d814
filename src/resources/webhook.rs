//! Validating webhook configuration pointing the API server at the controller.

use super::{child_meta, GenerateError};
use crate::constants::*;
use crate::owned::OwnerIdentity;
use k8s_openapi::api::admissionregistration::v1::{
    RuleWithOperations, ServiceReference, ValidatingWebhook, ValidatingWebhookConfiguration,
    WebhookClientConfig,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;

const CA_BUNDLE_KEY: &str = "ca.crt";

fn rule(group: &str, resources: &[&str]) -> RuleWithOperations {
    RuleWithOperations {
        api_groups: Some(vec![group.to_string()]),
        api_versions: Some(vec!["*".to_string()]),
        operations: Some(vec!["CREATE".to_string(), "UPDATE".to_string()]),
        resources: Some(resources.iter().map(|r| (*r).to_string()).collect()),
        scope: None,
    }
}

fn webhook(
    name: &str,
    client_config: WebhookClientConfig,
    rules: Vec<RuleWithOperations>,
    object_selector: Option<LabelSelector>,
) -> ValidatingWebhook {
    ValidatingWebhook {
        name: name.to_string(),
        admission_review_versions: vec!["v1".to_string()],
        client_config,
        failure_policy: Some("Fail".to_string()),
        match_policy: Some("Equivalent".to_string()),
        side_effects: "None".to_string(),
        timeout_seconds: Some(10),
        rules: Some(rules),
        object_selector,
        ..ValidatingWebhook::default()
    }
}

/// Webhook configuration for the controller behind `service`.
///
/// The controller container must be present in the generated deployment, and
/// the webhook certificate secret must carry a CA bundle.
pub fn generate_validating_webhook_configuration(
    owner: &OwnerIdentity,
    deployment: &Deployment,
    service: &str,
    certificate: &Secret,
) -> Result<ValidatingWebhookConfiguration, GenerateError> {
    let has_controller = deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .is_some_and(|pod| pod.containers.iter().any(|c| c.name == CONTROL_PLANE_CONTAINER));
    if !has_controller {
        return Err(GenerateError::ContainerNotFound(CONTROL_PLANE_CONTAINER));
    }

    let ca_bundle: ByteString = certificate
        .data
        .as_ref()
        .and_then(|d| d.get(CA_BUNDLE_KEY))
        .filter(|ca| !ca.0.is_empty())
        .cloned()
        .ok_or(GenerateError::CaBundleMissing)?;

    let client_config = WebhookClientConfig {
        ca_bundle: Some(ca_bundle),
        service: Some(ServiceReference {
            name: service.to_string(),
            namespace: owner.namespace.clone(),
            port: Some(ADMISSION_WEBHOOK_SERVICE_PORT),
            path: Some("/".to_string()),
        }),
        url: None,
    };

    let credential_selector = LabelSelector {
        match_labels: Some(BTreeMap::from([(
            "konghq.com/credential".to_string(),
            "true".to_string(),
        )])),
        ..LabelSelector::default()
    };

    let mut configuration = ValidatingWebhookConfiguration {
        metadata: child_meta(owner, None, ""),
        webhooks: Some(vec![
            webhook(
                "validations.kong.konghq.com",
                client_config.clone(),
                vec![
                    rule(
                        "configuration.konghq.com",
                        &[
                            "kongconsumers",
                            "kongconsumergroups",
                            "kongplugins",
                            "kongclusterplugins",
                            "kongingresses",
                            "kongvaults",
                            "kongcustomentities",
                        ],
                    ),
                    rule("gateway.networking.k8s.io", &["gateways", "httproutes"]),
                    rule("networking.k8s.io", &["ingresses"]),
                ],
                None,
            ),
            webhook(
                "secrets.credentials.validation.ingress-controller.konghq.com",
                client_config,
                vec![rule("", &["secrets"])],
                Some(credential_selector),
            ),
        ]),
    };
    owner.mark(&mut configuration);
    Ok(configuration)
}
