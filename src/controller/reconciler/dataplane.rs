//! # DataPlane reconciliation
//!
//! Proxy deployment, ingress and admin services, and the DataPlane status.

use super::extension::extension_applied_condition;
use super::status::{settle, write_status, Pass};
use super::{backoff_key, enforce_config, purpose_selector, Engine, Reconciler, ReconcilerError};
use crate::constants::*;
use crate::crd::{
    condition_reason, condition_type, remove_condition, set_condition, Condition,
    ConditionStatus, DataPlane, DataPlaneStatus,
};
use crate::fingerprint::Fingerprint;
use crate::observability::{self, metrics};
use crate::owned::{self, Desired, OwnerIdentity};
use crate::resources::{
    generate_admin_service, generate_data_plane_deployment, generate_ingress_service,
    resolve_image,
};
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{finalizer, Event};
use kube::{Api, Resource, ResourceExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

const KIND: &str = "DataPlane";

/// Controller entry point for a DataPlane
#[instrument(skip_all, fields(trace_id = %observability::get_trace_id(), name = %dp.name_any(), namespace = %dp.namespace().unwrap_or_default()))]
pub async fn reconcile_data_plane(
    dp: Arc<DataPlane>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    metrics::increment_reconciliations(KIND);
    let namespace = dp.namespace().unwrap_or_default();
    let api: Api<DataPlane> = Api::namespaced(ctx.client.clone(), &namespace);

    let result = finalizer(&api, CLEANUP_FINALIZER, dp, |event| async {
        match event {
            Event::Apply(dp) => apply(&dp, &ctx).await,
            // Every child lives in the DataPlane's namespace and is collected
            // through its owner reference
            Event::Cleanup(_) => Ok(Action::await_change()),
        }
    })
    .await
    .map_err(|e| ReconcilerError::Finalizer(Box::new(e)));

    metrics::observe_reconciliation_duration(KIND, start.elapsed().as_secs_f64());
    result
}

async fn apply(dp: &DataPlane, ctx: &Reconciler) -> Result<Action, ReconcilerError> {
    let mut status = dp.status.clone().unwrap_or_default();
    let outcome = ctx.engine.provision_data_plane(dp, &mut status).await;
    status.observed_generation = dp.meta().generation;
    let written = write_status(&ctx.client, dp, dp.status.as_ref(), &status).await?;

    let pass = settle(outcome, written)?;
    ctx.reset_backoff(&backoff_key(dp));
    Ok(pass.action())
}

impl Engine {
    /// Converge the children of a DataPlane and compute its status
    pub async fn provision_data_plane(
        &self,
        dp: &DataPlane,
        status: &mut DataPlaneStatus,
    ) -> Result<Pass, ReconcilerError> {
        let generation = dp.meta().generation;
        let owner = OwnerIdentity::of(dp, MANAGED_BY_DATA_PLANE)?;
        let enforce = enforce_config(dp);

        let image = match resolve_image(
            dp.spec.deployment.pod_template_spec.as_ref(),
            DATA_PLANE_CONTAINER,
            &self.config.default_data_plane_image,
            KIND,
        ) {
            Ok(image) => image,
            Err(e) => {
                set_condition(
                    &mut status.conditions,
                    Condition::new(
                        condition_type::READY,
                        ConditionStatus::False,
                        condition_reason::INVALID_SPEC,
                        e.to_string(),
                    )
                    .with_generation(generation),
                );
                return Err(e.into());
            }
        };

        let desired = generate_data_plane_deployment(dp, &owner, &image)?;
        let fingerprint = Fingerprint::of(&(&dp.spec.deployment, &image))?;
        let (_, deployment) = owned::ensure_owned(
            &*self.stores.deployments,
            Desired::new(desired, fingerprint, owner.selector()),
            enforce,
        )
        .await?;

        let ingress = generate_ingress_service(dp, &owner);
        let fingerprint = Fingerprint::of(&dp.spec.network.services.ingress)?;
        let (_, ingress) = owned::ensure_owned(
            &*self.stores.services,
            Desired::new(
                ingress,
                fingerprint,
                purpose_selector(&owner, SERVICE_ROLE_LABEL, USAGE_INGRESS),
            ),
            enforce,
        )
        .await?;

        let admin = generate_admin_service(&owner);
        let fingerprint = Fingerprint::of(&DATA_PLANE_ADMIN_PORT)?;
        owned::ensure_owned(
            &*self.stores.services,
            Desired::new(
                admin,
                fingerprint,
                purpose_selector(&owner, SERVICE_ROLE_LABEL, USAGE_ADMIN),
            ),
            enforce,
        )
        .await?;

        match extension_applied_condition(self.parents.as_ref(), dp).await? {
            Some(condition) => {
                set_condition(&mut status.conditions, condition);
            }
            None => {
                remove_condition(&mut status.conditions, condition_type::KONNECT_EXTENSION_APPLIED);
            }
        }

        let desired_replicas = deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1);
        let ready_replicas = deployment
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        status.service = Some(ingress.name_any());
        status.replicas = desired_replicas;
        status.ready_replicas = ready_replicas;
        status.ready = ready_replicas >= desired_replicas;

        let ready = if status.ready {
            Condition::new(
                condition_type::READY,
                ConditionStatus::True,
                condition_reason::READY,
                "DataPlane is ready",
            )
        } else {
            Condition::new(
                condition_type::READY,
                ConditionStatus::False,
                condition_reason::PODS_NOT_READY,
                format!("{ready_replicas}/{desired_replicas} proxy replicas ready"),
            )
        };
        set_condition(&mut status.conditions, ready.with_generation(generation));
        debug!(ready = status.ready, "DataPlane converged");

        Ok(Pass::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatorConfig;
    use crate::controller::reconciler::test_support::{engine, MemoryStores};
    use crate::controller::reconciler::StaticParents;
    use crate::crd::{find_condition, DataPlaneSpec, ExtensionRef};
    use crate::grants::StaticGrants;
    use k8s_openapi::api::apps::v1::DeploymentStatus;

    fn data_plane() -> DataPlane {
        let mut dp = DataPlane::new("proxy", DataPlaneSpec::default());
        dp.metadata.namespace = Some("gateway".to_string());
        dp.metadata.uid = Some("dp-uid".to_string());
        dp.metadata.generation = Some(1);
        dp
    }

    #[tokio::test]
    async fn test_creates_children_and_reports_not_ready() {
        let stores = MemoryStores::default();
        let engine = engine(
            &stores,
            StaticGrants::default(),
            StaticParents::default(),
            OperatorConfig::default(),
        );
        let dp = data_plane();

        let mut status = DataPlaneStatus::default();
        engine.provision_data_plane(&dp, &mut status).await.unwrap();

        assert_eq!(stores.deployments.objects().len(), 1);
        assert_eq!(stores.services.objects().len(), 2);
        let ingress_name = status.service.clone().unwrap();
        assert!(ingress_name.starts_with("dataplane-proxy-ingress-"));
        assert_eq!(status.replicas, 1);
        assert!(!status.ready);
        let ready = find_condition(&status.conditions, condition_type::READY).unwrap();
        assert_eq!(ready.reason, condition_reason::PODS_NOT_READY);
        assert!(
            find_condition(&status.conditions, condition_type::KONNECT_EXTENSION_APPLIED).is_none()
        );
    }

    #[tokio::test]
    async fn test_ready_once_replicas_are_ready_and_idempotent() {
        let stores = MemoryStores::default();
        let engine = engine(
            &stores,
            StaticGrants::default(),
            StaticParents::default(),
            OperatorConfig::default(),
        );
        let dp = data_plane();
        let mut status = DataPlaneStatus::default();
        engine.provision_data_plane(&dp, &mut status).await.unwrap();

        stores.deployments.mutate_all(|d| {
            d.status = Some(DeploymentStatus {
                ready_replicas: Some(1),
                ..DeploymentStatus::default()
            });
        });
        engine.provision_data_plane(&dp, &mut status).await.unwrap();
        assert!(status.ready);
        assert!(find_condition(&status.conditions, condition_type::READY).unwrap().is_true());

        let before = status.clone();
        engine.provision_data_plane(&dp, &mut status).await.unwrap();
        assert_eq!(status, before);
        assert_eq!(stores.deployments.objects().len(), 1);
        assert_eq!(stores.services.objects().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_extension_reported() {
        let stores = MemoryStores::default();
        let engine = engine(
            &stores,
            StaticGrants::default(),
            StaticParents::default(),
            OperatorConfig::default(),
        );
        let mut dp = data_plane();
        dp.spec.extensions = vec![ExtensionRef {
            group: KONNECT_GROUP.to_string(),
            kind: "KonnectExtension".to_string(),
            name: "konnect".to_string(),
            namespace: None,
        }];
        let mut status = DataPlaneStatus::default();
        engine.provision_data_plane(&dp, &mut status).await.unwrap();
        let applied =
            find_condition(&status.conditions, condition_type::KONNECT_EXTENSION_APPLIED).unwrap();
        assert_eq!(applied.status, ConditionStatus::False);
        assert_eq!(applied.reason, condition_reason::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_image_is_invalid_spec() {
        let stores = MemoryStores::default();
        let config = OperatorConfig {
            default_data_plane_image: String::new(),
            ..OperatorConfig::default()
        };
        let engine = engine(&stores, StaticGrants::default(), StaticParents::default(), config);
        let mut status = DataPlaneStatus::default();
        let err = engine
            .provision_data_plane(&data_plane(), &mut status)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "DataPlane requires an image to be set on proxy container"
        );
        assert!(stores.deployments.objects().is_empty());
    }
}
