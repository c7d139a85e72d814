//! # ControlPlane reconciliation
//!
//! Converges the controller of a ControlPlane: service account, partitioned
//! RBAC, admin and webhook certificates, the deployment and the validating
//! webhook configuration.
//!
//! RBAC steps return [`Pass::Requeue`] as soon as they change something so the
//! next step always sees the names the API server generated.

use super::extension::extension_applied_condition;
use super::status::{settle, write_status, Pass};
use super::{backoff_key, enforce_config, purpose_selector, Engine, Reconciler, ReconcilerError};
use crate::certificates::{self, KeyUsage, LeafRequest, Provisioning};
use crate::constants::*;
use crate::crd::{
    condition_reason, condition_type, find_condition, remove_condition, set_condition, Condition,
    ConditionStatus, ControlPlane, ControlPlaneStatus,
};
use crate::fingerprint::Fingerprint;
use crate::grants::validate_watch_namespaces;
use crate::observability::{self, metrics};
use crate::owned::{self, Desired, OwnerIdentity};
use crate::rbac::{partition_rules, Partition};
use crate::resources::{
    control_plane_cluster_role_template, generate_cluster_role, generate_cluster_role_binding,
    generate_control_plane_deployment, generate_role, generate_role_binding,
    generate_service_account, generate_validating_webhook_configuration,
    generate_webhook_service, resolve_image, validate_control_plane_image,
    ControlPlaneDeploymentInputs,
};
use k8s_openapi::api::admissionregistration::v1::ValidatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{finalizer, Event};
use kube::{Api, Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

const KIND: &str = "ControlPlane";

/// Controller entry point for a ControlPlane
#[instrument(skip_all, fields(trace_id = %observability::get_trace_id(), name = %cp.name_any(), namespace = %cp.namespace().unwrap_or_default()))]
pub async fn reconcile_control_plane(
    cp: Arc<ControlPlane>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    metrics::increment_reconciliations(KIND);
    let namespace = cp.namespace().unwrap_or_default();
    let api: Api<ControlPlane> = Api::namespaced(ctx.client.clone(), &namespace);

    let result = finalizer(&api, CLEANUP_FINALIZER, cp, |event| async {
        match event {
            Event::Apply(cp) => apply(&cp, &ctx).await,
            Event::Cleanup(cp) => {
                ctx.engine.cleanup_control_plane(&cp).await?;
                Ok(Action::await_change())
            }
        }
    })
    .await
    .map_err(|e| ReconcilerError::Finalizer(Box::new(e)));

    metrics::observe_reconciliation_duration(KIND, start.elapsed().as_secs_f64());
    result
}

async fn apply(cp: &ControlPlane, ctx: &Reconciler) -> Result<Action, ReconcilerError> {
    let mut status = cp.status.clone().unwrap_or_default();
    let outcome = ctx.engine.provision_control_plane(cp, &mut status).await;
    status.observed_generation = cp.meta().generation;
    let written = write_status(&ctx.client, cp, cp.status.as_ref(), &status).await?;

    let pass = settle(outcome, written)?;
    ctx.reset_backoff(&backoff_key(cp));
    Ok(pass.action())
}

fn provisioned(
    status: &mut ControlPlaneStatus,
    generation: Option<i64>,
    value: bool,
    reason: &str,
    message: impl Into<String>,
) {
    set_condition(
        &mut status.conditions,
        Condition::new(
            condition_type::PROVISIONED,
            ConditionStatus::from(value),
            reason,
            message,
        )
        .with_generation(generation),
    );
}

fn used_by(usage: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(SECRET_USED_BY_LABEL.to_string(), usage.to_string())])
}

impl Engine {
    /// Converge the children of a ControlPlane and compute its status.
    ///
    /// Conditions describing a failure are written into `status` before the
    /// error is returned.
    pub async fn provision_control_plane(
        &self,
        cp: &ControlPlane,
        status: &mut ControlPlaneStatus,
    ) -> Result<Pass, ReconcilerError> {
        let generation = cp.meta().generation;
        let namespace = cp.namespace().unwrap_or_default();
        let owner = OwnerIdentity::of(cp, MANAGED_BY_CONTROL_PLANE)?;
        let enforce = enforce_config(cp);

        if find_condition(&status.conditions, condition_type::PROVISIONED).is_none() {
            provisioned(
                status,
                generation,
                false,
                condition_reason::PODS_NOT_READY,
                "ControlPlane resource is scheduled for provisioning",
            );
        }

        let watch_namespaces = match validate_watch_namespaces(cp, self.grants.as_ref()).await {
            Ok(namespaces) => {
                set_condition(
                    &mut status.conditions,
                    Condition::new(
                        condition_type::WATCH_NAMESPACES_GRANTED,
                        ConditionStatus::True,
                        condition_reason::GRANTED,
                        "Watch namespaces are granted",
                    )
                    .with_generation(generation),
                );
                namespaces
            }
            Err(e) => {
                set_condition(
                    &mut status.conditions,
                    Condition::new(
                        condition_type::WATCH_NAMESPACES_GRANTED,
                        ConditionStatus::False,
                        condition_reason::GRANT_MISSING,
                        e.to_string(),
                    )
                    .with_generation(generation),
                );
                return Err(e.into());
            }
        };
        status.watch_namespaces = watch_namespaces.clone();

        if cp.data_plane_name().is_none() {
            provisioned(
                status,
                generation,
                false,
                condition_reason::NO_DATA_PLANE,
                "DataPlane is not set",
            );
        } else if find_condition(&status.conditions, condition_type::PROVISIONED)
            .is_some_and(|c| c.reason == condition_reason::NO_DATA_PLANE)
        {
            provisioned(
                status,
                generation,
                false,
                condition_reason::PODS_NOT_READY,
                "DataPlane was set, ControlPlane resource is scheduled for provisioning",
            );
        }

        match extension_applied_condition(self.parents.as_ref(), cp).await? {
            Some(condition) => {
                set_condition(&mut status.conditions, condition);
            }
            None => {
                remove_condition(&mut status.conditions, condition_type::KONNECT_EXTENSION_APPLIED);
            }
        }

        let image = resolve_image(
            cp.spec.deployment.pod_template_spec.as_ref(),
            CONTROL_PLANE_CONTAINER,
            &self.config.default_control_plane_image,
            KIND,
        )
        .and_then(|image| {
            if self.config.validate_images {
                validate_control_plane_image(&image)?;
            }
            Ok(image)
        });
        let image = match image {
            Ok(image) => image,
            Err(e) => {
                provisioned(
                    status,
                    generation,
                    false,
                    condition_reason::INVALID_SPEC,
                    e.to_string(),
                );
                return Err(e.into());
            }
        };

        let (_, service_account) = owned::ensure_owned(
            &*self.stores.service_accounts,
            Desired::new(generate_service_account(&owner), Fingerprint::of(&())?, owner.selector()),
            enforce,
        )
        .await?;
        let service_account = service_account.name_any();

        let rbac = self
            .ensure_rbac(&owner, &service_account, &watch_namespaces, enforce)
            .await?;
        if rbac == Pass::Requeue {
            return Ok(Pass::Requeue);
        }

        let admin_secret = self.ensure_admin_certificate(cp, &owner).await?;
        let webhook = if self.config.admission_webhook_enabled {
            Some(self.ensure_webhook_prerequisites(&owner, enforce).await?)
        } else {
            self.remove_webhook(&owner).await?;
            None
        };

        let publish_service = match cp.data_plane_name() {
            Some(name) => self
                .parents
                .data_plane(&namespace, name)
                .await?
                .and_then(|dp| dp.status.and_then(|s| s.service))
                .map(|service| format!("{namespace}/{service}")),
            None => None,
        };

        let inputs = ControlPlaneDeploymentInputs {
            image,
            service_account,
            admin_cert_secret: admin_secret.name_any(),
            webhook_cert_secret: webhook.as_ref().map(|(_, secret)| secret.name_any()),
            watch_namespaces,
            publish_service,
        };
        let desired = generate_control_plane_deployment(cp, &owner, &inputs)?;
        let fingerprint = Fingerprint::of(&(&cp.spec.deployment, &inputs))?;
        let (_, deployment) = owned::ensure_owned(
            &*self.stores.deployments,
            Desired::new(desired, fingerprint, owner.selector()),
            enforce,
        )
        .await?;

        if let Some((service, secret)) = webhook.as_ref() {
            let configuration = generate_validating_webhook_configuration(
                &owner,
                &deployment,
                &service.name_any(),
                secret,
            )?;
            let fingerprint = Fingerprint::of(&configuration.webhooks)?;
            owned::ensure_owned(
                &*self.stores.webhooks,
                Desired::new(configuration, fingerprint, owner.selector()),
                enforce,
            )
            .await?;
        }

        if cp.data_plane_name().is_some() {
            if pods_ready(&deployment) {
                provisioned(
                    status,
                    generation,
                    true,
                    condition_reason::PODS_READY,
                    "pods for all Deployments are ready",
                );
            } else {
                provisioned(
                    status,
                    generation,
                    false,
                    condition_reason::PODS_NOT_READY,
                    "Waiting for controller pods to become ready",
                );
            }
        }
        debug!("ControlPlane converged");

        Ok(Pass::Done)
    }

    /// Cluster role, its binding, then one role and binding per watched namespace.
    ///
    /// With no watch namespaces the controller watches everything and the whole
    /// template is granted cluster-wide.
    async fn ensure_rbac(
        &self,
        owner: &OwnerIdentity,
        service_account: &str,
        watch_namespaces: &[String],
        enforce: bool,
    ) -> Result<Pass, ReconcilerError> {
        let template = control_plane_cluster_role_template();
        let partition = if watch_namespaces.is_empty() {
            Partition {
                namespaced: Vec::new(),
                cluster: template,
            }
        } else {
            let mapping = self.discovery.snapshot().await?;
            partition_rules(&template, &mapping)
        };

        let fingerprint = Fingerprint::of(&partition.cluster)?;
        let (result, cluster_role) = owned::ensure_owned(
            &*self.stores.cluster_roles,
            Desired::new(
                generate_cluster_role(owner, partition.cluster),
                fingerprint,
                owner.selector(),
            ),
            enforce,
        )
        .await?;
        if result.changed() {
            return Ok(Pass::Requeue);
        }

        let cluster_role = cluster_role.name_any();
        let fingerprint = Fingerprint::of(&(&cluster_role, service_account))?;
        let (result, _) = owned::ensure_owned(
            &*self.stores.cluster_role_bindings,
            Desired::new(
                generate_cluster_role_binding(owner, &cluster_role, service_account),
                fingerprint,
                owner.selector(),
            ),
            enforce,
        )
        .await?;
        if result.changed() {
            return Ok(Pass::Requeue);
        }

        let namespaced = if partition.namespaced.is_empty() {
            &[][..]
        } else {
            watch_namespaces
        };

        let mut roles = BTreeMap::new();
        let mut changed = false;
        for namespace in namespaced {
            let fingerprint = Fingerprint::of(&partition.namespaced)?;
            let (result, role) = owned::ensure_owned(
                &*self.stores.roles,
                Desired::new(
                    generate_role(owner, namespace, partition.namespaced.clone()),
                    fingerprint,
                    owner.selector(),
                ),
                enforce,
            )
            .await?;
            changed |= result.changed();
            roles.insert(namespace.clone(), role.name_any());
        }
        if changed {
            return Ok(Pass::Requeue);
        }

        for (namespace, role) in &roles {
            let fingerprint = Fingerprint::of(&(role, service_account))?;
            let (result, _) = owned::ensure_owned(
                &*self.stores.role_bindings,
                Desired::new(
                    generate_role_binding(owner, namespace, role, service_account),
                    fingerprint,
                    owner.selector(),
                ),
                enforce,
            )
            .await?;
            changed |= result.changed();
        }
        if changed {
            return Ok(Pass::Requeue);
        }

        let in_scope =
            |namespace: Option<String>| namespace.is_some_and(|ns| roles.contains_key(&ns));
        owned::prune_owned(&*self.stores.roles, None, &owner.selector(), |r: &Role| {
            in_scope(r.namespace())
        })
        .await?;
        owned::prune_owned(
            &*self.stores.role_bindings,
            None,
            &owner.selector(),
            |b: &RoleBinding| in_scope(b.namespace()),
        )
        .await?;

        Ok(Pass::Done)
    }

    async fn ensure_admin_certificate(
        &self,
        cp: &ControlPlane,
        owner: &OwnerIdentity,
    ) -> Result<Secret, ReconcilerError> {
        let request = certificates::request_for(
            owner,
            "admin-",
            used_by(USAGE_ADMIN),
            LeafRequest {
                common_name: format!("{}.{}", cp.name_any(), owner.namespace),
                dns_names: vec![],
                usages: vec![
                    KeyUsage::KeyEncipherment,
                    KeyUsage::DigitalSignature,
                    KeyUsage::ClientAuth,
                ],
                validity_days: self.config.certificate_validity_days,
            },
        );
        let (_, secret) = certificates::ensure_certificate(
            &*self.stores.secrets,
            &request,
            &self.ca_ref(),
            &Provisioning::Automatic,
        )
        .await?;
        secret.ok_or_else(|| {
            ReconcilerError::Dependency("admin certificate secret is not available".to_string())
        })
    }

    fn webhook_certificate_request(
        &self,
        owner: &OwnerIdentity,
        service: &str,
    ) -> certificates::CertificateRequest {
        let host = format!("{service}.{}.svc", owner.namespace);
        certificates::request_for(
            owner,
            "webhook-",
            used_by(USAGE_WEBHOOK),
            LeafRequest {
                common_name: host.clone(),
                dns_names: vec![host],
                usages: vec![
                    KeyUsage::KeyEncipherment,
                    KeyUsage::DigitalSignature,
                    KeyUsage::ServerAuth,
                ],
                validity_days: self.config.certificate_validity_days,
            },
        )
    }

    /// Webhook service and its serving certificate
    async fn ensure_webhook_prerequisites(
        &self,
        owner: &OwnerIdentity,
        enforce: bool,
    ) -> Result<(Service, Secret), ReconcilerError> {
        let (_, service) = owned::ensure_owned(
            &*self.stores.services,
            Desired::new(
                generate_webhook_service(owner),
                Fingerprint::of(&ADMISSION_WEBHOOK_SERVICE_PORT)?,
                purpose_selector(owner, SERVICE_ROLE_LABEL, USAGE_WEBHOOK),
            ),
            enforce,
        )
        .await?;

        let request = self.webhook_certificate_request(owner, &service.name_any());
        let (_, secret) = certificates::ensure_certificate(
            &*self.stores.secrets,
            &request,
            &self.ca_ref(),
            &Provisioning::Automatic,
        )
        .await?;
        let secret = secret.ok_or_else(|| {
            ReconcilerError::Dependency("webhook certificate secret is not available".to_string())
        })?;
        Ok((service, secret))
    }

    /// Delete the webhook service, certificate and configuration
    async fn remove_webhook(&self, owner: &OwnerIdentity) -> Result<(), ReconcilerError> {
        owned::delete_owned::<Service, _>(
            &*self.stores.services,
            Some(&owner.namespace),
            &purpose_selector(owner, SERVICE_ROLE_LABEL, USAGE_WEBHOOK),
        )
        .await?;
        let request = self.webhook_certificate_request(owner, "");
        certificates::ensure_certificate(
            &*self.stores.secrets,
            &request,
            &self.ca_ref(),
            &Provisioning::Disabled,
        )
        .await?;
        owned::delete_owned::<ValidatingWebhookConfiguration, _>(
            &*self.stores.webhooks,
            None,
            &owner.selector(),
        )
        .await?;
        Ok(())
    }

    /// Delete the children owner references cannot collect: cluster-scoped
    /// kinds and RBAC in other namespaces
    pub async fn cleanup_control_plane(&self, cp: &ControlPlane) -> Result<(), ReconcilerError> {
        let owner = OwnerIdentity::of(cp, MANAGED_BY_CONTROL_PLANE)?;
        let selector = owner.selector();

        owned::delete_owned::<ValidatingWebhookConfiguration, _>(
            &*self.stores.webhooks,
            None,
            &selector,
        )
        .await?;
        owned::delete_owned::<ClusterRoleBinding, _>(
            &*self.stores.cluster_role_bindings,
            None,
            &selector,
        )
        .await?;
        owned::delete_owned::<ClusterRole, _>(&*self.stores.cluster_roles, None, &selector).await?;

        let own = owner.namespace.clone();
        owned::prune_owned(&*self.stores.role_bindings, None, &selector, |b: &RoleBinding| {
            b.namespace().as_deref() == Some(own.as_str())
        })
        .await?;
        owned::prune_owned(&*self.stores.roles, None, &selector, |r: &Role| {
            r.namespace().as_deref() == Some(own.as_str())
        })
        .await?;

        info!(name = %cp.name_any(), namespace = %owner.namespace, "ControlPlane released");
        Ok(())
    }
}

fn pods_ready(deployment: &Deployment) -> bool {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    desired > 0 && ready >= desired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatorConfig;
    use crate::controller::reconciler::test_support::{engine, stores_with_ca, MemoryStores};
    use crate::controller::reconciler::{ErrorClass, StaticParents};
    use crate::crd::{
        ControlPlaneSpec, DataPlane, DataPlaneSpec, DataPlaneStatus, WatchNamespaceGrant,
        WatchNamespaceGrantFrom, WatchNamespaceGrantSpec, WatchNamespaces, WatchNamespacesType,
    };
    use crate::grants::StaticGrants;
    use k8s_openapi::api::apps::v1::DeploymentStatus;

    fn control_plane(data_plane: Option<&str>) -> ControlPlane {
        let mut cp = ControlPlane::new(
            "kong",
            ControlPlaneSpec {
                data_plane: data_plane.map(str::to_string),
                ..ControlPlaneSpec::default()
            },
        );
        cp.metadata.namespace = Some("gateway".to_string());
        cp.metadata.uid = Some("cp-uid".to_string());
        cp.metadata.generation = Some(1);
        cp
    }

    fn watching(mut cp: ControlPlane, r#type: WatchNamespacesType, list: &[&str]) -> ControlPlane {
        cp.spec.watch_namespaces = Some(WatchNamespaces {
            r#type,
            list: list.iter().map(|s| (*s).to_string()).collect(),
        });
        cp
    }

    fn grant(namespace: &str) -> WatchNamespaceGrant {
        let mut grant = WatchNamespaceGrant::new(
            "allow",
            WatchNamespaceGrantSpec {
                from: vec![WatchNamespaceGrantFrom {
                    group: OPERATOR_GROUP.to_string(),
                    kind: "ControlPlane".to_string(),
                    namespace: "gateway".to_string(),
                }],
            },
        );
        grant.metadata.namespace = Some(namespace.to_string());
        grant
    }

    fn data_plane_with_service(service: &str) -> DataPlane {
        let mut dp = DataPlane::new("proxy", DataPlaneSpec::default());
        dp.metadata.namespace = Some("gateway".to_string());
        dp.status = Some(DataPlaneStatus {
            service: Some(service.to_string()),
            ..DataPlaneStatus::default()
        });
        dp
    }

    /// Run passes until one completes without requeueing
    async fn converge(engine: &Engine, cp: &ControlPlane, status: &mut ControlPlaneStatus) {
        for _ in 0..10 {
            if engine.provision_control_plane(cp, status).await.unwrap() == Pass::Done {
                return;
            }
        }
        panic!("ControlPlane did not converge");
    }

    fn only_deployment(stores: &MemoryStores) -> Deployment {
        let mut deployments = stores.deployments.objects();
        assert_eq!(deployments.len(), 1);
        deployments.remove(0)
    }

    fn env_value(deployment: &Deployment, name: &str) -> Option<String> {
        deployment
            .spec
            .as_ref()?
            .template
            .spec
            .as_ref()?
            .containers
            .iter()
            .find(|c| c.name == CONTROL_PLANE_CONTAINER)?
            .env
            .as_ref()?
            .iter()
            .find(|e| e.name == name)?
            .value
            .clone()
    }

    #[tokio::test]
    async fn test_dormant_without_data_plane() {
        let stores = stores_with_ca();
        let engine = engine(
            &stores,
            StaticGrants::default(),
            StaticParents::default(),
            OperatorConfig::default(),
        );
        let cp = control_plane(None);
        let mut status = ControlPlaneStatus::default();
        converge(&engine, &cp, &mut status).await;

        let deployment = only_deployment(&stores);
        assert_eq!(deployment.spec.as_ref().and_then(|s| s.replicas), Some(0));
        assert!(env_value(&deployment, PUBLISH_SERVICE_ENV).is_none());
        let condition = find_condition(&status.conditions, condition_type::PROVISIONED).unwrap();
        assert_eq!(condition.reason, condition_reason::NO_DATA_PLANE);
        assert_eq!(condition.message, "DataPlane is not set");

        assert_eq!(stores.service_accounts.objects().len(), 1);
        assert_eq!(stores.cluster_roles.objects().len(), 1);
        assert_eq!(stores.cluster_role_bindings.objects().len(), 1);
        assert!(stores.roles.objects().is_empty());
        assert_eq!(stores.webhooks.objects().len(), 1);
        assert_eq!(stores.services.objects().len(), 1);
        // CA, admin and webhook certificates
        assert_eq!(stores.secrets.objects().len(), 3);
    }

    #[tokio::test]
    async fn test_second_converged_pass_changes_nothing() {
        let stores = stores_with_ca();
        let engine = engine(
            &stores,
            StaticGrants::default(),
            StaticParents::default(),
            OperatorConfig::default(),
        );
        let cp = control_plane(None);
        let mut status = ControlPlaneStatus::default();
        converge(&engine, &cp, &mut status).await;

        let deployments = stores.deployments.objects();
        let secrets = stores.secrets.objects();
        let before = status.clone();
        assert_eq!(
            engine.provision_control_plane(&cp, &mut status).await.unwrap(),
            Pass::Done
        );
        assert_eq!(status, before);
        assert_eq!(stores.deployments.objects(), deployments);
        assert_eq!(stores.secrets.objects(), secrets);
    }

    #[tokio::test]
    async fn test_data_plane_sets_replicas_and_publish_service() {
        let stores = stores_with_ca();
        let parents = StaticParents {
            data_planes: vec![data_plane_with_service("dataplane-proxy-ingress-abcde")],
            ..StaticParents::default()
        };
        let engine = engine(&stores, StaticGrants::default(), parents, OperatorConfig::default());

        let mut status = ControlPlaneStatus::default();
        converge(&engine, &control_plane(None), &mut status).await;
        assert_eq!(
            only_deployment(&stores).spec.and_then(|s| s.replicas),
            Some(0)
        );

        let mut cp = control_plane(Some("proxy"));
        cp.spec.deployment.replicas = Some(2);
        converge(&engine, &cp, &mut status).await;
        let deployment = only_deployment(&stores);
        assert_eq!(deployment.spec.as_ref().and_then(|s| s.replicas), Some(2));
        assert_eq!(
            env_value(&deployment, PUBLISH_SERVICE_ENV).as_deref(),
            Some("gateway/dataplane-proxy-ingress-abcde")
        );
        let condition = find_condition(&status.conditions, condition_type::PROVISIONED).unwrap();
        assert_eq!(condition.reason, condition_reason::PODS_NOT_READY);

        stores.deployments.mutate_all(|d| {
            d.status = Some(DeploymentStatus {
                ready_replicas: Some(2),
                ..DeploymentStatus::default()
            });
        });
        converge(&engine, &cp, &mut status).await;
        assert!(find_condition(&status.conditions, condition_type::PROVISIONED)
            .unwrap()
            .is_true());
    }

    #[tokio::test]
    async fn test_list_mode_requires_grants_then_creates_roles() {
        let stores = stores_with_ca();
        let cp = watching(control_plane(None), WatchNamespacesType::List, &["team-a"]);

        let engine_without = engine(
            &stores,
            StaticGrants::default(),
            StaticParents::default(),
            OperatorConfig::default(),
        );
        let mut status = ControlPlaneStatus::default();
        let err = engine_without
            .provision_control_plane(&cp, &mut status)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcilerError::Grant(ref e) if e.missing_namespace() == Some("team-a")
        ));
        let condition =
            find_condition(&status.conditions, condition_type::WATCH_NAMESPACES_GRANTED).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert!(stores.service_accounts.objects().is_empty());

        let mut grants = StaticGrants::default();
        grants.insert(grant("team-a"));
        let engine_with =
            engine(&stores, grants, StaticParents::default(), OperatorConfig::default());
        converge(&engine_with, &cp, &mut status).await;
        assert_eq!(status.watch_namespaces, vec!["team-a".to_string(), "gateway".to_string()]);

        let mut role_namespaces: Vec<_> = stores
            .roles
            .objects()
            .into_iter()
            .filter_map(|r| r.namespace())
            .collect();
        role_namespaces.sort();
        assert_eq!(role_namespaces, vec!["gateway".to_string(), "team-a".to_string()]);
        assert_eq!(stores.role_bindings.objects().len(), 2);

        let cluster_rules = stores.cluster_roles.objects()[0].rules.clone().unwrap_or_default();
        assert!(cluster_rules.iter().all(|rule| {
            rule.resources.as_deref().unwrap_or_default() != ["services".to_string()]
        }));

        let deployment = only_deployment(&stores);
        assert_eq!(
            env_value(&deployment, "CONTROLLER_WATCH_NAMESPACE").as_deref(),
            Some("team-a,gateway")
        );

        // Narrowing the scope prunes the role outside it
        let own = watching(control_plane(None), WatchNamespacesType::Own, &[]);
        converge(&engine_with, &own, &mut status).await;
        let roles = stores.roles.objects();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].namespace().as_deref(), Some("gateway"));
        assert_eq!(stores.role_bindings.objects().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_webhook_removes_its_children() {
        let stores = stores_with_ca();
        let cp = control_plane(None);
        let mut status = ControlPlaneStatus::default();
        let enabled = engine(
            &stores,
            StaticGrants::default(),
            StaticParents::default(),
            OperatorConfig::default(),
        );
        converge(&enabled, &cp, &mut status).await;
        assert_eq!(stores.webhooks.objects().len(), 1);

        let disabled = engine(
            &stores,
            StaticGrants::default(),
            StaticParents::default(),
            OperatorConfig {
                admission_webhook_enabled: false,
                ..OperatorConfig::default()
            },
        );
        converge(&disabled, &cp, &mut status).await;
        assert!(stores.webhooks.objects().is_empty());
        assert!(stores.services.objects().is_empty());
        assert_eq!(stores.secrets.objects().len(), 2, "CA and admin certificate remain");
        assert!(
            env_value(&only_deployment(&stores), "CONTROLLER_ADMISSION_WEBHOOK_LISTEN").is_none()
        );
    }

    #[tokio::test]
    async fn test_unsupported_image_is_invalid_spec() {
        let stores = stores_with_ca();
        let engine = engine(
            &stores,
            StaticGrants::default(),
            StaticParents::default(),
            OperatorConfig {
                default_control_plane_image: "kong/kubernetes-ingress-controller:2.12".to_string(),
                ..OperatorConfig::default()
            },
        );
        let mut status = ControlPlaneStatus::default();
        let err = engine
            .provision_control_plane(&control_plane(None), &mut status)
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvalidInput);
        let condition = find_condition(&status.conditions, condition_type::PROVISIONED).unwrap();
        assert_eq!(condition.reason, condition_reason::INVALID_SPEC);
        assert!(stores.deployments.objects().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_removes_cluster_scoped_children() {
        let stores = stores_with_ca();
        let mut grants = StaticGrants::default();
        grants.insert(grant("team-a"));
        let engine = engine(&stores, grants, StaticParents::default(), OperatorConfig::default());
        let cp = watching(control_plane(None), WatchNamespacesType::List, &["team-a"]);
        let mut status = ControlPlaneStatus::default();
        converge(&engine, &cp, &mut status).await;

        engine.cleanup_control_plane(&cp).await.unwrap();
        assert!(stores.cluster_roles.objects().is_empty());
        assert!(stores.cluster_role_bindings.objects().is_empty());
        assert!(stores.webhooks.objects().is_empty());
        let roles = stores.roles.objects();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].namespace().as_deref(), Some("gateway"));
    }
}
