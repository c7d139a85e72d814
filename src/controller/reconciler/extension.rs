//! # KonnectExtension reconciliation
//!
//! Resolves the referenced Konnect control plane, provisions the data plane
//! client certificate and records which DataPlanes and ControlPlanes have the
//! extension applied. Also evaluates the `KonnectExtensionApplied` condition
//! for the parents that reference an extension.

use super::dependents::{applied_dependents, referencing, ExtensionConsumer};
use super::status::{settle, write_status, Pass};
use super::{backoff_key, Engine, ParentLookup, Reconciler, ReconcilerError};
use crate::certificates::{self, KeyUsage, LeafRequest, Provisioning};
use crate::constants::*;
use crate::crd::{
    condition_reason, condition_type, is_condition_true, set_condition, Condition,
    ConditionStatus, ControlPlaneRefType, DataPlaneClientAuthStatus, KonnectControlPlaneStatus,
    KonnectExtension, KonnectExtensionStatus, KonnectGatewayControlPlane, ProvisioningMode,
    SecretRef,
};
use crate::observability::{self, metrics};
use crate::owned::{self, OwnerIdentity};
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{finalizer, Event};
use kube::{Api, Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};

const KIND: &str = "KonnectExtension";

/// Controller entry point for a KonnectExtension
#[instrument(skip_all, fields(trace_id = %observability::get_trace_id(), name = %ext.name_any(), namespace = %ext.namespace().unwrap_or_default()))]
pub async fn reconcile_konnect_extension(
    ext: Arc<KonnectExtension>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    metrics::increment_reconciliations(KIND);
    let namespace = ext.namespace().unwrap_or_default();
    let api: Api<KonnectExtension> = Api::namespaced(ctx.client.clone(), &namespace);

    let result = finalizer(&api, CLEANUP_FINALIZER, ext, |event| async {
        match event {
            Event::Apply(ext) => apply(&ext, &ctx).await,
            Event::Cleanup(ext) => {
                ctx.engine.cleanup_konnect_extension(&ext).await?;
                Ok(Action::await_change())
            }
        }
    })
    .await
    .map_err(|e| ReconcilerError::Finalizer(Box::new(e)));

    metrics::observe_reconciliation_duration(KIND, start.elapsed().as_secs_f64());
    result
}

async fn apply(ext: &KonnectExtension, ctx: &Reconciler) -> Result<Action, ReconcilerError> {
    let mut status = ext.status.clone().unwrap_or_default();
    let outcome = ctx.engine.provision_konnect_extension(ext, &mut status).await;
    status.observed_generation = ext.meta().generation;
    let written = write_status(&ctx.client, ext, ext.status.as_ref(), &status).await?;

    let pass = settle(outcome, written)?;
    ctx.reset_backoff(&backoff_key(ext));
    Ok(pass.action())
}

impl Engine {
    /// Converge a KonnectExtension and compute its status.
    ///
    /// Conditions describing a failure are written into `status` before the
    /// error is returned.
    pub async fn provision_konnect_extension(
        &self,
        ext: &KonnectExtension,
        status: &mut KonnectExtensionStatus,
    ) -> Result<Pass, ReconcilerError> {
        let generation = ext.meta().generation;
        let namespace = ext.namespace().unwrap_or_default();

        let control_plane = match self.resolve_control_plane(ext).await {
            Ok(cp) => {
                set_condition(
                    &mut status.conditions,
                    Condition::new(
                        condition_type::CONTROL_PLANE_REF_VALID,
                        ConditionStatus::True,
                        condition_reason::VALID,
                        "ControlPlaneRef is valid",
                    )
                    .with_generation(generation),
                );
                cp
            }
            Err(e) => {
                set_condition(
                    &mut status.conditions,
                    Condition::new(
                        condition_type::CONTROL_PLANE_REF_VALID,
                        ConditionStatus::False,
                        condition_reason::INVALID,
                        e.to_string(),
                    )
                    .with_generation(generation),
                );
                not_ready(status, generation, &e);
                return Err(e);
            }
        };

        let cluster_type = match self.cluster_types.cluster_type(&control_plane).await {
            Ok(cluster_type) => cluster_type,
            Err(e) => {
                not_ready(status, generation, &e);
                return Err(e);
            }
        };
        status.konnect = Some(KonnectControlPlaneStatus {
            control_plane_id: control_plane.konnect_id().map(str::to_string),
            cluster_type: Some(cluster_type),
        });

        let secret_name = match self.ensure_client_certificate(ext).await {
            Ok(name) => name,
            Err(e) => {
                not_ready(status, generation, &e);
                return Err(e);
            }
        };
        status.data_plane_client_auth = Some(DataPlaneClientAuthStatus {
            certificate_secret_ref: Some(SecretRef { name: secret_name }),
        });

        set_condition(
            &mut status.conditions,
            Condition::new(
                condition_type::READY,
                ConditionStatus::True,
                condition_reason::READY,
                "KonnectExtension is ready",
            )
            .with_generation(generation),
        );

        let data_planes = self.parents.data_planes(&namespace).await?;
        let control_planes = self.parents.control_planes(&namespace).await?;
        status.data_plane_refs = applied_dependents(ext, &data_planes);
        status.control_plane_refs = applied_dependents(ext, &control_planes);
        debug!(
            data_planes = status.data_plane_refs.len(),
            control_planes = status.control_plane_refs.len(),
            "Aggregated extension dependents"
        );

        Ok(Pass::Done)
    }

    /// Find the referenced Konnect control plane and require it to be programmed
    async fn resolve_control_plane(
        &self,
        ext: &KonnectExtension,
    ) -> Result<KonnectGatewayControlPlane, ReconcilerError> {
        let namespace = ext.namespace().unwrap_or_default();
        let reference = &ext.spec.konnect.control_plane.r#ref;

        let found = match reference.r#type {
            ControlPlaneRefType::KonnectNamespacedRef => {
                let name = reference
                    .konnect_namespaced_ref
                    .as_ref()
                    .map(|r| r.name.as_str())
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| {
                        ReconcilerError::InvalidInput(
                            "konnectNamespacedRef must be set when type is konnectNamespacedRef"
                                .to_string(),
                        )
                    })?;
                self.parents
                    .konnect_control_plane(&namespace, name)
                    .await?
                    .ok_or_else(|| {
                        ReconcilerError::Dependency(format!(
                            "KonnectGatewayControlPlane {namespace}/{name} not found"
                        ))
                    })?
            }
            ControlPlaneRefType::KonnectId => {
                let id = reference
                    .konnect_id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| {
                        ReconcilerError::InvalidInput(
                            "konnectID must be set when type is konnectID".to_string(),
                        )
                    })?;
                self.parents
                    .konnect_control_planes(&namespace)
                    .await?
                    .into_iter()
                    .find(|cp| cp.konnect_id() == Some(id))
                    .ok_or_else(|| {
                        ReconcilerError::Dependency(format!(
                            "KonnectGatewayControlPlane with Konnect ID {id} not found in namespace {namespace}"
                        ))
                    })?
            }
        };

        if !is_condition_true(found.conditions(), condition_type::PROGRAMMED) {
            return Err(ReconcilerError::Dependency(format!(
                "Konnect control plane {}/{namespace} not programmed yet",
                found.name_any()
            )));
        }
        Ok(found)
    }

    /// Converge the client certificate and return the name of the secret in use
    async fn ensure_client_certificate(
        &self,
        ext: &KonnectExtension,
    ) -> Result<String, ReconcilerError> {
        let owner = OwnerIdentity::of(ext, MANAGED_BY_KONNECT_EXTENSION)?;
        let request = certificates::request_for(
            &owner,
            "",
            BTreeMap::from([
                (
                    SECRET_PROVISIONING_LABEL.to_string(),
                    SECRET_PROVISIONING_AUTOMATIC.to_string(),
                ),
                (KONNECT_DP_CERT_LABEL.to_string(), "true".to_string()),
            ]),
            LeafRequest {
                common_name: format!("{}.{}", ext.name_any(), owner.namespace),
                dns_names: vec![],
                usages: vec![
                    KeyUsage::DigitalSignature,
                    KeyUsage::KeyEncipherment,
                    KeyUsage::ClientAuth,
                ],
                validity_days: self.config.certificate_validity_days,
            },
        );
        let ca = self.ca_ref();
        let secrets = &*self.stores.secrets;

        let provisioning = match ext.provisioning_mode() {
            ProvisioningMode::Automatic => Provisioning::Automatic,
            ProvisioningMode::Manual => {
                let secret = ext
                    .spec
                    .client_auth
                    .as_ref()
                    .and_then(|auth| auth.certificate_secret.certificate_secret_ref.as_ref())
                    .map(|r| r.name.clone())
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| {
                        ReconcilerError::InvalidInput(
                            "certificateSecretRef must be set when provisioning is Manual".to_string(),
                        )
                    })?;
                // A previously issued secret is no longer used
                certificates::ensure_certificate(secrets, &request, &ca, &Provisioning::Disabled)
                    .await?;
                Provisioning::Manual { secret }
            }
        };

        let (result, secret) =
            certificates::ensure_certificate(secrets, &request, &ca, &provisioning).await?;
        let name = secret.map(|s| s.name_any()).unwrap_or_default();
        if result.changed() {
            info!(secret = %name, %result, "Konnect client certificate converged");
        }
        Ok(name)
    }

    /// Release a KonnectExtension once nothing references it
    pub async fn cleanup_konnect_extension(
        &self,
        ext: &KonnectExtension,
    ) -> Result<(), ReconcilerError> {
        let namespace = ext.namespace().unwrap_or_default();
        let data_planes = self.parents.data_planes(&namespace).await?;
        let control_planes = self.parents.control_planes(&namespace).await?;
        let count = referencing(ext, &data_planes) + referencing(ext, &control_planes);
        if count > 0 {
            return Err(ReconcilerError::Dependency(format!(
                "KonnectExtension {namespace}/{} is still referenced by {count} object(s)",
                ext.name_any()
            )));
        }

        let owner = OwnerIdentity::of(ext, MANAGED_BY_KONNECT_EXTENSION)?;
        owned::delete_owned::<Secret, _>(&*self.stores.secrets, Some(&namespace), &owner.selector())
            .await?;
        info!(name = %ext.name_any(), %namespace, "KonnectExtension released");
        Ok(())
    }
}

fn not_ready(
    status: &mut KonnectExtensionStatus,
    generation: Option<i64>,
    error: &ReconcilerError,
) {
    set_condition(
        &mut status.conditions,
        Condition::new(
            condition_type::READY,
            ConditionStatus::False,
            condition_reason::NOT_READY,
            error.to_string(),
        )
        .with_generation(generation),
    );
}

/// `KonnectExtensionApplied` for a parent, or `None` when it references no extension
pub(crate) async fn extension_applied_condition<P>(
    parents: &dyn ParentLookup,
    consumer: &P,
) -> Result<Option<Condition>, ReconcilerError>
where
    P: ExtensionConsumer + Sync,
{
    let namespace = consumer.namespace().unwrap_or_default();
    let kind = KonnectExtension::kind(&());
    let refs: Vec<_> = consumer
        .extension_refs()
        .iter()
        .filter(|r| r.group == KONNECT_GROUP && r.kind == kind)
        .collect();
    if refs.is_empty() {
        return Ok(None);
    }

    let applied = |status, reason, message: String| {
        Ok(Some(
            Condition::new(condition_type::KONNECT_EXTENSION_APPLIED, status, reason, message)
                .with_generation(consumer.meta().generation),
        ))
    };

    for reference in refs {
        let target = reference.namespace.as_deref().unwrap_or(&namespace);
        if target != namespace {
            return applied(
                ConditionStatus::False,
                condition_reason::INVALID,
                format!(
                    "KonnectExtension {target}/{} must be in namespace {namespace}",
                    reference.name
                ),
            );
        }
        match parents.konnect_extension(&namespace, &reference.name).await? {
            None => {
                return applied(
                    ConditionStatus::False,
                    condition_reason::NOT_FOUND,
                    format!("KonnectExtension {namespace}/{} not found", reference.name),
                )
            }
            Some(ext) if !is_condition_true(ext.conditions(), condition_type::READY) => {
                return applied(
                    ConditionStatus::False,
                    condition_reason::PENDING,
                    format!("KonnectExtension {namespace}/{} is not ready", reference.name),
                )
            }
            Some(_) => {}
        }
    }

    applied(
        ConditionStatus::True,
        condition_reason::APPLIED,
        "KonnectExtension applied".to_string(),
    )
}
