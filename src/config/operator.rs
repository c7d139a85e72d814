//! # Operator Configuration
//!
//! Process-level settings consumed by the reconcilers: the cluster CA location,
//! feature toggles, and defaults. Every flag can also be set from the environment.

use crate::constants::*;
use clap::Parser;
use std::time::Duration;

/// Operator configuration
///
/// Passed explicitly into the reconciler context; no component reads these
/// values from process state on its own.
#[derive(Debug, Clone, Parser, PartialEq, Eq)]
#[command(name = "gateway-operator", version, about)]
pub struct OperatorConfig {
    /// Name of the secret holding the cluster CA certificate and key
    #[arg(long, env = "GATEWAY_OPERATOR_CLUSTER_CA_SECRET", default_value = DEFAULT_CLUSTER_CA_SECRET)]
    pub cluster_ca_secret: String,

    /// Namespace of the cluster CA secret
    #[arg(
        long,
        env = "GATEWAY_OPERATOR_CLUSTER_CA_SECRET_NAMESPACE",
        default_value = DEFAULT_CLUSTER_CA_SECRET_NAMESPACE
    )]
    pub cluster_ca_secret_namespace: String,

    /// Provision the control plane admission webhook (service, certificate, configuration)
    #[arg(
        long,
        env = "GATEWAY_OPERATOR_ENABLE_CONTROLPLANE_ADMISSION_WEBHOOK",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub admission_webhook_enabled: bool,

    /// Reject control plane images whose version is not supported
    #[arg(
        long,
        env = "GATEWAY_OPERATOR_VALIDATE_IMAGES",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub validate_images: bool,

    /// Image used when the controller container does not set one
    #[arg(long, env = "GATEWAY_OPERATOR_CONTROLPLANE_IMAGE", default_value = DEFAULT_CONTROL_PLANE_IMAGE)]
    pub default_control_plane_image: String,

    /// Image used when the proxy container does not set one
    #[arg(long, env = "GATEWAY_OPERATOR_DATAPLANE_IMAGE", default_value = DEFAULT_DATA_PLANE_IMAGE)]
    pub default_data_plane_image: String,

    /// Validity of issued leaf certificates, in days
    #[arg(long, env = "GATEWAY_OPERATOR_CERTIFICATE_VALIDITY_DAYS", default_value_t = DEFAULT_CERTIFICATE_VALIDITY_DAYS)]
    pub certificate_validity_days: i64,

    /// How long an API discovery snapshot is reused, in seconds
    #[arg(long, env = "GATEWAY_OPERATOR_DISCOVERY_TTL_SECS", default_value_t = DEFAULT_DISCOVERY_TTL_SECS)]
    pub discovery_ttl_secs: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            cluster_ca_secret: DEFAULT_CLUSTER_CA_SECRET.to_string(),
            cluster_ca_secret_namespace: DEFAULT_CLUSTER_CA_SECRET_NAMESPACE.to_string(),
            admission_webhook_enabled: true,
            validate_images: true,
            default_control_plane_image: DEFAULT_CONTROL_PLANE_IMAGE.to_string(),
            default_data_plane_image: DEFAULT_DATA_PLANE_IMAGE.to_string(),
            certificate_validity_days: DEFAULT_CERTIFICATE_VALIDITY_DAYS,
            discovery_ttl_secs: DEFAULT_DISCOVERY_TTL_SECS,
        }
    }
}

impl OperatorConfig {
    /// Discovery snapshot time-to-live
    pub fn discovery_ttl(&self) -> Duration {
        Duration::from_secs(self.discovery_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_without_flags_matches_default() {
        let parsed = OperatorConfig::try_parse_from(["gateway-operator"]).unwrap();
        // Environment may override individual values, so only compare the ones
        // the test controls.
        assert!(!parsed.cluster_ca_secret.is_empty());
        assert!(parsed.certificate_validity_days > 0);
    }

    #[test]
    fn test_parse_flags() {
        let parsed = OperatorConfig::try_parse_from([
            "gateway-operator",
            "--cluster-ca-secret",
            "my-ca",
            "--cluster-ca-secret-namespace",
            "ops",
            "--admission-webhook-enabled",
            "false",
        ])
        .unwrap();
        assert_eq!(parsed.cluster_ca_secret, "my-ca");
        assert_eq!(parsed.cluster_ca_secret_namespace, "ops");
        assert!(!parsed.admission_webhook_enabled);
    }
}
