//! # Certificate Lifecycle Manager
//!
//! Provisions the leaf certificate secret of one purpose (admin mTLS, webhook
//! serving, Konnect client auth) for a parent.
//!
//! - **Manual**: the parent names a secret; it is looked up, never created.
//! - **Automatic**: a certificate is issued by the cluster CA and stored in a
//!   `kubernetes.io/tls` secret found again by its labels. The secret is
//!   re-issued when it is incomplete, was issued for another subject or by
//!   another CA, or is past the rotation point of its lifetime.
//! - **Disabled**: every secret matching the labels is deleted.

pub mod pki;

pub use pki::{
    sanitize_cert, CertificateAuthority, CertificateInfo, KeyUsage, LeafRequest, PkiError,
};

use crate::observability::metrics;
use crate::owned::{self, ChildStore, OpResult, OwnedError, OwnerIdentity};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

/// Secret key of the certificate
pub const TLS_CERT_KEY: &str = "tls.crt";
/// Secret key of the private key
pub const TLS_KEY_KEY: &str = "tls.key";
/// Secret key of the CA bundle
pub const CA_CERT_KEY: &str = "ca.crt";

const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";

/// Errors from certificate provisioning
#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    /// The cluster CA secret does not exist
    #[error("CA secret {namespace}/{name} not found")]
    CaSecretMissing { namespace: String, name: String },

    /// The cluster CA secret exists but does not hold a usable CA
    #[error("CA secret {namespace}/{name} is invalid: {reason}")]
    CaSecretInvalid {
        namespace: String,
        name: String,
        reason: String,
    },

    /// A manually provisioned secret does not exist
    #[error("secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },

    #[error(transparent)]
    Pki(#[from] PkiError),

    #[error(transparent)]
    Owned(#[from] OwnedError),
}

impl From<owned::StoreError> for CertificateError {
    fn from(e: owned::StoreError) -> Self {
        Self::Owned(OwnedError::Store(e))
    }
}

/// Location of the cluster CA secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaRef {
    pub namespace: String,
    pub name: String,
}

/// How the secret of one purpose is provisioned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioning {
    /// User-supplied secret in the owner's namespace
    Manual { secret: String },
    Automatic,
    /// The feature using the certificate is off; matching secrets are removed
    Disabled,
}

/// One certificate purpose of one parent
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    pub leaf: LeafRequest,
    /// Labels selecting this purpose's secret; written on the secret
    pub match_labels: BTreeMap<String, String>,
    /// Metadata of a newly created secret (namespace, generate name, owner marks)
    pub template: ObjectMeta,
}

impl CertificateRequest {
    fn namespace(&self) -> Option<&str> {
        self.template.namespace.as_deref()
    }
}

/// Build a request for `owner` with the owner selector plus `purpose_labels`
pub fn request_for(
    owner: &OwnerIdentity,
    suffix: &str,
    purpose_labels: BTreeMap<String, String>,
    leaf: LeafRequest,
) -> CertificateRequest {
    let mut match_labels = owner.selector();
    match_labels.extend(purpose_labels);
    let mut template = Secret {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}{suffix}", owner.generate_name())),
            namespace: Some(owner.namespace.clone()),
            labels: Some(match_labels.clone()),
            ..ObjectMeta::default()
        },
        ..Secret::default()
    };
    owner.mark(&mut template);
    CertificateRequest {
        leaf,
        match_labels,
        template: template.metadata,
    }
}

fn text(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()?
        .get(key)
        .and_then(|v| String::from_utf8(v.0.clone()).ok())
        .filter(|v| !v.is_empty())
}

/// Load the cluster CA from its secret
pub async fn load_ca<S>(store: &S, ca: &CaRef) -> Result<CertificateAuthority, CertificateError>
where
    S: ChildStore<Secret> + ?Sized,
{
    let secret = store
        .get(Some(&ca.namespace), &ca.name)
        .await?
        .ok_or_else(|| CertificateError::CaSecretMissing {
            namespace: ca.namespace.clone(),
            name: ca.name.clone(),
        })?;
    let invalid = |reason: String| CertificateError::CaSecretInvalid {
        namespace: ca.namespace.clone(),
        name: ca.name.clone(),
        reason,
    };
    let cert =
        text(&secret, TLS_CERT_KEY).ok_or_else(|| invalid(format!("missing {TLS_CERT_KEY}")))?;
    let key = text(&secret, TLS_KEY_KEY).ok_or_else(|| invalid(format!("missing {TLS_KEY_KEY}")))?;
    CertificateAuthority::from_pem(&cert, &key).map_err(|e| invalid(e.to_string()))
}

/// Why an existing automatic secret must be re-issued, if it must
fn reissue_reason(
    secret: &Secret,
    leaf: &LeafRequest,
    ca: &CertificateAuthority,
    now: i64,
) -> Option<String> {
    let (Some(cert), Some(_), Some(bundle)) = (
        text(secret, TLS_CERT_KEY),
        text(secret, TLS_KEY_KEY),
        text(secret, CA_CERT_KEY),
    ) else {
        return Some("secret is incomplete".to_string());
    };
    if sanitize_cert(&bundle) != sanitize_cert(ca.cert_pem()) {
        return Some("issued by a different CA".to_string());
    }
    match CertificateInfo::from_pem(&cert) {
        Err(e) => Some(e.to_string()),
        Ok(info) if info.common_name != leaf.common_name => Some(format!(
            "subject {} does not match {}",
            info.common_name, leaf.common_name
        )),
        Ok(info) if info.needs_rotation(now) => Some("certificate is due for rotation".to_string()),
        Ok(_) => None,
    }
}

fn tls_data(issued: &pki::IssuedCertificate) -> BTreeMap<String, ByteString> {
    BTreeMap::from([
        (TLS_CERT_KEY.to_string(), ByteString(issued.cert_pem.clone().into_bytes())),
        (TLS_KEY_KEY.to_string(), ByteString(issued.key_pem.clone().into_bytes())),
        (CA_CERT_KEY.to_string(), ByteString(issued.ca_pem.clone().into_bytes())),
    ])
}

/// Converge the certificate secret of one purpose.
///
/// Returns the result and the secret to use; the secret is `None` only when
/// provisioning is disabled.
#[instrument(skip_all, fields(cn = %request.leaf.common_name))]
pub async fn ensure_certificate<S>(
    store: &S,
    request: &CertificateRequest,
    ca: &CaRef,
    provisioning: &Provisioning,
) -> Result<(OpResult, Option<Secret>), CertificateError>
where
    S: ChildStore<Secret> + ?Sized,
{
    match provisioning {
        Provisioning::Disabled => {
            let result = owned::delete_owned::<Secret, S>(
                store,
                request.namespace(),
                &request.match_labels,
            )
            .await?;
            Ok((result, None))
        }
        Provisioning::Manual { secret } => {
            let namespace = request.namespace().unwrap_or_default();
            let found = store.get(Some(namespace), secret).await?.ok_or_else(|| {
                CertificateError::SecretNotFound {
                    namespace: namespace.to_string(),
                    name: secret.clone(),
                }
            })?;
            Ok((OpResult::Noop, Some(found)))
        }
        Provisioning::Automatic => ensure_automatic(store, request, ca).await,
    }
}

async fn ensure_automatic<S>(
    store: &S,
    request: &CertificateRequest,
    ca_ref: &CaRef,
) -> Result<(OpResult, Option<Secret>), CertificateError>
where
    S: ChildStore<Secret> + ?Sized,
{
    let mut existing = store
        .list(request.namespace(), &request.match_labels)
        .await?;
    if existing.len() > 1 {
        let count = existing.len();
        owned::reduce(store, existing).await?;
        return Err(OwnedError::Reduced {
            kind: "Secret",
            count,
        }
        .into());
    }

    let ca = load_ca(store, ca_ref).await?;
    let now = chrono::Utc::now().timestamp();

    match existing.pop() {
        None => {
            let issued = ca.issue(&request.leaf)?;
            let secret = Secret {
                metadata: request.template.clone(),
                type_: Some(TLS_SECRET_TYPE.to_string()),
                data: Some(tls_data(&issued)),
                ..Secret::default()
            };
            let created = store.create(&secret).await?;
            metrics::increment_certificates_issued();
            info!(secret = %created.name_any(), "Issued certificate");
            Ok((OpResult::Created, Some(created)))
        }
        Some(current) => {
            let mut updated = current.clone();
            let mut changed = owned::merge_metadata(&mut updated.metadata, &request.template);
            if let Some(reason) = reissue_reason(&current, &request.leaf, &ca, now) {
                warn!(secret = %current.name_any(), %reason, "Re-issuing certificate");
                let issued = ca.issue(&request.leaf)?;
                updated.data = Some(tls_data(&issued));
                updated.type_ = Some(TLS_SECRET_TYPE.to_string());
                metrics::increment_certificates_issued();
                changed = true;
            }
            if !changed {
                debug!(secret = %current.name_any(), "Certificate up to date");
                return Ok((OpResult::Noop, Some(current)));
            }
            let replaced = store.replace(&updated).await?;
            Ok((OpResult::Updated, Some(replaced)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{MANAGED_BY_CONTROL_PLANE, SECRET_USED_BY_LABEL, USAGE_ADMIN};
    use crate::crd::{ControlPlane, ControlPlaneSpec};
    use crate::owned::MemoryStore;

    fn ca_ref() -> CaRef {
        CaRef {
            namespace: "kong-system".to_string(),
            name: "kong-operator-ca".to_string(),
        }
    }

    fn store_with_ca() -> (MemoryStore<Secret>, CertificateAuthority) {
        let store = MemoryStore::default();
        let ca = CertificateAuthority::self_signed("kong-operator-ca", 3650).unwrap();
        store.insert(ca_secret(&ca));
        (store, ca)
    }

    fn ca_secret(ca: &CertificateAuthority) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("kong-operator-ca".to_string()),
                namespace: Some("kong-system".to_string()),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([
                (TLS_CERT_KEY.to_string(), ByteString(ca.cert_pem().as_bytes().to_vec())),
                (TLS_KEY_KEY.to_string(), ByteString(ca.key_pem().as_bytes().to_vec())),
            ])),
            ..Secret::default()
        }
    }

    fn admin_request() -> CertificateRequest {
        let mut cp = ControlPlane::new("kong", ControlPlaneSpec::default());
        cp.metadata.namespace = Some("gateway".to_string());
        cp.metadata.uid = Some("uid-kong".to_string());
        let owner = OwnerIdentity::of(&cp, MANAGED_BY_CONTROL_PLANE).unwrap();
        request_for(
            &owner,
            "admin-",
            BTreeMap::from([(SECRET_USED_BY_LABEL.to_string(), USAGE_ADMIN.to_string())]),
            LeafRequest {
                common_name: "kong.gateway".to_string(),
                dns_names: vec![],
                usages: vec![
                    KeyUsage::KeyEncipherment,
                    KeyUsage::DigitalSignature,
                    KeyUsage::ClientAuth,
                ],
                validity_days: 365,
            },
        )
    }

    #[tokio::test]
    async fn test_automatic_creates_then_reuses() {
        let (store, ca) = store_with_ca();
        let request = admin_request();

        let (result, secret) =
            ensure_certificate(&store, &request, &ca_ref(), &Provisioning::Automatic)
                .await
                .unwrap();
        assert_eq!(result, OpResult::Created);
        let secret = secret.unwrap();
        assert_eq!(secret.type_.as_deref(), Some(TLS_SECRET_TYPE));
        assert_eq!(text(&secret, CA_CERT_KEY), Some(sanitize_cert(ca.cert_pem())));

        let (result, again) =
            ensure_certificate(&store, &request, &ca_ref(), &Provisioning::Automatic)
                .await
                .unwrap();
        assert_eq!(result, OpResult::Noop);
        assert_eq!(again.unwrap().name_any(), secret.name_any());
    }

    #[tokio::test]
    async fn test_automatic_reissues_for_new_subject() {
        let (store, _) = store_with_ca();
        let mut request = admin_request();
        ensure_certificate(&store, &request, &ca_ref(), &Provisioning::Automatic)
            .await
            .unwrap();

        request.leaf.common_name = "kong.other".to_string();
        let (result, secret) =
            ensure_certificate(&store, &request, &ca_ref(), &Provisioning::Automatic)
                .await
                .unwrap();
        assert_eq!(result, OpResult::Updated);
        let cert = text(&secret.unwrap(), TLS_CERT_KEY).unwrap();
        assert_eq!(CertificateInfo::from_pem(&cert).unwrap().common_name, "kong.other");
    }

    #[tokio::test]
    async fn test_missing_ca_is_dependency_error() {
        let store = MemoryStore::default();
        let err = ensure_certificate(&store, &admin_request(), &ca_ref(), &Provisioning::Automatic)
            .await
            .unwrap_err();
        assert!(matches!(err, CertificateError::CaSecretMissing { .. }));
    }

    #[tokio::test]
    async fn test_manual_missing_secret() {
        let (store, _) = store_with_ca();
        let err = ensure_certificate(
            &store,
            &admin_request(),
            &ca_ref(),
            &Provisioning::Manual {
                secret: "user-cert".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "secret gateway/user-cert not found");
    }

    #[tokio::test]
    async fn test_disabled_deletes_matching_secrets() {
        let (store, _) = store_with_ca();
        let request = admin_request();
        ensure_certificate(&store, &request, &ca_ref(), &Provisioning::Automatic)
            .await
            .unwrap();
        assert_eq!(store.objects().len(), 2);

        let (result, secret) =
            ensure_certificate(&store, &request, &ca_ref(), &Provisioning::Disabled)
                .await
                .unwrap();
        assert_eq!(result, OpResult::Deleted);
        assert!(secret.is_none());
        assert_eq!(store.objects().len(), 1, "only the CA secret remains");
    }

    #[tokio::test]
    async fn test_duplicates_reduced() {
        let (store, _) = store_with_ca();
        let request = admin_request();
        for _ in 0..2 {
            store.insert(Secret {
                metadata: request.template.clone(),
                ..Secret::default()
            });
        }
        let err = ensure_certificate(&store, &request, &ca_ref(), &Provisioning::Automatic)
            .await
            .unwrap_err();
        assert!(matches!(err, CertificateError::Owned(OwnedError::Reduced { count: 2, .. })));
        assert_eq!(store.objects().len(), 2);
    }
}
