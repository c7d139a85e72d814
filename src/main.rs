//! # Kong Gateway Operator
//!
//! A Kubernetes operator that reconciles `ControlPlane`, `DataPlane` and
//! `KonnectExtension` resources into the workloads, services, RBAC,
//! certificates and webhook configuration they own.
//!
//! ## Overview
//!
//! 1. **ControlPlane** - controller deployment, service account, cluster and
//!    namespaced RBAC scoped to the watched namespaces, admin mTLS
//!    certificate, admission webhook service, certificate and configuration
//! 2. **DataPlane** - proxy deployment, ingress and admin services
//! 3. **KonnectExtension** - control plane reference validation, data plane
//!    client certificate, and the list of resources using the extension
//!
//! ## Usage
//!
//! Every flag can also be set from the environment, see `--help`. The CRDs
//! are printed by the `crdgen` binary.

use anyhow::Result;
use clap::Parser;
use gateway_operator::config::OperatorConfig;
use gateway_operator::observability;
use gateway_operator::runtime::initialization::initialize;
use gateway_operator::runtime::watch_loop::run_watch_loop;

#[tokio::main]
async fn main() -> Result<()> {
    let config = OperatorConfig::parse();

    let init_result = initialize(config).await?;

    run_watch_loop(
        init_result.client,
        init_result.reconciler,
        init_result.server_state,
    )
    .await?;

    observability::otel::shutdown_otel(init_result.otel_tracer_provider);

    Ok(())
}
