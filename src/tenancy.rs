// Copyright 2025 Argus Contributors
// SPDX-License-Identifier: Apache-2.0

//! Ambient tenant context.
//!
//! Every store write and read carries a tenant id. Self-hosted deployments
//! run with the `"default"` tenant; ingest and webhook paths scope work to
//! the tenant resolved from the request key by wrapping the handling future
//! in [`with_tenant`].

use tokio::task_local;

/// Tenant used when no scope has been established.
pub const DEFAULT_TENANT: &str = "default";

task_local! {
    static TENANT_ID: String;
}

/// Returns the tenant id for the current task scope.
pub fn current_tenant() -> String {
    TENANT_ID
        .try_with(|t| t.clone())
        .unwrap_or_else(|_| DEFAULT_TENANT.to_string())
}

/// Runs a future with the given tenant id as the ambient tenant.
pub async fn with_tenant<F, T>(tenant_id: impl Into<String>, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    TENANT_ID.scope(tenant_id.into(), fut).await
}
