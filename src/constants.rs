//! # Constants
//!
//! Well-known label and annotation keys, container names, ports, and default values
//! shared across the operator.

/// API group of the gateway operator resources
pub const OPERATOR_GROUP: &str = "gateway-operator.konghq.com";

/// API group of the Konnect resources
pub const KONNECT_GROUP: &str = "konnect.konghq.com";

/// Field manager used for every write the operator performs
pub const FIELD_MANAGER: &str = "gateway-operator";

/// Finalizer placed on every parent resource
pub const CLEANUP_FINALIZER: &str = "gateway-operator.konghq.com/cleanup";

// Owner identity labels

/// Label naming the component that manages a child resource
pub const MANAGED_BY_LABEL: &str = "gateway-operator.konghq.com/managed-by";

/// Label naming the kind of the owning parent
pub const OWNER_KIND_LABEL: &str = "gateway-operator.konghq.com/owner-kind";

/// Label naming the owning parent
pub const OWNER_NAME_LABEL: &str = "gateway-operator.konghq.com/owner-name";

/// Label naming the namespace of the owning parent
pub const OWNER_NAMESPACE_LABEL: &str = "gateway-operator.konghq.com/owner-namespace";

/// Label carrying the UID of the owning parent
pub const OWNER_UID_LABEL: &str = "gateway-operator.konghq.com/owner-uid";

/// Fingerprint annotation written on every generated child
pub const FINGERPRINT_ANNOTATION: &str = "gateway-operator.konghq.com/spec-hash";

/// Parent annotation forcing convergence regardless of fingerprint match
pub const ENFORCE_CONFIG_ANNOTATION: &str = "gateway-operator.konghq.com/enforce-config";

/// Label distinguishing the purpose of a certificate secret
pub const SECRET_USED_BY_LABEL: &str = "gateway-operator.konghq.com/used-by";

/// Label distinguishing the purpose of a control plane service
pub const SERVICE_ROLE_LABEL: &str = "gateway-operator.konghq.com/service";

/// Label recording how a secret was provisioned
pub const SECRET_PROVISIONING_LABEL: &str = "gateway-operator.konghq.com/secret-provisioning";

/// Value of [`SECRET_PROVISIONING_LABEL`] for engine-issued secrets
pub const SECRET_PROVISIONING_AUTOMATIC: &str = "automatic";

/// Label marking Konnect data plane client certificates
pub const KONNECT_DP_CERT_LABEL: &str = "konghq.com/konnect-dp-cert";

/// [`SECRET_USED_BY_LABEL`] / [`SERVICE_ROLE_LABEL`] value for the admin API
pub const USAGE_ADMIN: &str = "admin";

/// [`SECRET_USED_BY_LABEL`] / [`SERVICE_ROLE_LABEL`] value for the admission webhook
pub const USAGE_WEBHOOK: &str = "webhook";

/// [`SERVICE_ROLE_LABEL`] value for the data plane proxy service
pub const USAGE_INGRESS: &str = "ingress";

// Managed-by values

/// Managed-by value for children of a ControlPlane
pub const MANAGED_BY_CONTROL_PLANE: &str = "controlplane";

/// Managed-by value for children of a DataPlane
pub const MANAGED_BY_DATA_PLANE: &str = "dataplane";

/// Managed-by value for children of a KonnectExtension
pub const MANAGED_BY_KONNECT_EXTENSION: &str = "konnectextension";

// Containers and ports

/// Name of the controller container in the control plane pod template
pub const CONTROL_PLANE_CONTAINER: &str = "controller";

/// Name of the proxy container in the data plane pod template
pub const DATA_PLANE_CONTAINER: &str = "proxy";

/// Port the control plane admission webhook listens on
pub const ADMISSION_WEBHOOK_LISTEN_PORT: i32 = 8080;

/// Port the admission webhook service exposes
pub const ADMISSION_WEBHOOK_SERVICE_PORT: i32 = 443;

/// Data plane admin API port
pub const DATA_PLANE_ADMIN_PORT: i32 = 8444;

/// Data plane proxy HTTP port
pub const DATA_PLANE_PROXY_PORT: i32 = 8000;

/// Data plane proxy HTTPS port
pub const DATA_PLANE_PROXY_SSL_PORT: i32 = 8443;

/// Environment variable pointing the controller at the data plane ingress service
pub const PUBLISH_SERVICE_ENV: &str = "CONTROLLER_PUBLISH_SERVICE";

/// Replica count of the control plane deployment while no data plane is set
pub const REPLICAS_WHEN_NO_DATA_PLANE: i32 = 0;

// Defaults

/// Default control plane image
pub const DEFAULT_CONTROL_PLANE_IMAGE: &str = "kong/kubernetes-ingress-controller:3.4.1";

/// Default data plane image
pub const DEFAULT_DATA_PLANE_IMAGE: &str = "kong:3.9";

/// Default cluster CA secret name
pub const DEFAULT_CLUSTER_CA_SECRET: &str = "kong-operator-ca";

/// Default cluster CA secret namespace
pub const DEFAULT_CLUSTER_CA_SECRET_NAMESPACE: &str = "kong-system";

/// Default validity of issued leaf certificates (days)
pub const DEFAULT_CERTIFICATE_VALIDITY_DAYS: i64 = 365;

/// Default discovery snapshot time-to-live (seconds)
pub const DEFAULT_DISCOVERY_TTL_SECS: u64 = 300;

/// Default metrics and probe port
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (seconds)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval (milliseconds)
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Requeue delay after a transient "requeue" error (seconds)
pub const TRANSIENT_REQUEUE_SECS: u64 = 1;

/// Periodic resync interval for healthy parents (seconds)
pub const DEFAULT_RESYNC_SECS: u64 = 300;

/// Requeue delay used when backoff state is unavailable (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Minimum Fibonacci backoff (minutes)
pub const BACKOFF_MIN_MINUTES: u64 = 1;

/// Maximum Fibonacci backoff (minutes)
pub const BACKOFF_MAX_MINUTES: u64 = 10;

/// Watcher timeout (seconds), kept below the client read timeout
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Delay before a failed watch is restarted, in seconds
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Initial backoff for a watch throttled by the API server, in milliseconds
pub const DEFAULT_WATCH_BACKOFF_MS: u64 = 1_000;

/// Ceiling of the throttled watch backoff, in milliseconds
pub const MAX_WATCH_BACKOFF_MS: u64 = 30_000;
