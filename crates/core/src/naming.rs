//! Deterministic naming for coordination-store paths, topics and consumer groups.
//!
//! Everything here is a pure function of the instance, tenant and module
//! identifiers, so every service computes identical names without talking to
//! each other.
//!
//! ```text
//! /<instance>/tenants                                               tenants root
//! /<instance>/tenants/<tenant>                                      tenant config
//! /<instance>/tenants/<tenant>/bootstrapped                         instance-wide marker
//! /<instance>/microservices/<module>/tenants/<tenant>/lock          module lock
//! /<instance>/microservices/<module>/tenants/<tenant>/bootstrapped  module marker
//! ```

use crate::id::{InstanceId, ModuleId, TenantId};

/// Separator between path segments.
pub const SEPARATOR: char = '/';

const TENANTS: &str = "tenants";
const MICROSERVICES: &str = "microservices";
/// Name of the marker node written below a tenant config or module tenant
/// node. Reserved: nothing else may be created under that name there.
pub const BOOTSTRAPPED: &str = "bootstrapped";
const LOCK: &str = "lock";

/// Ancestor node for all tenant configuration of an instance.
pub fn tenants_root(instance: &InstanceId) -> String {
    format!("/{instance}/{TENANTS}")
}

/// Node holding the copied template artifacts for one tenant.
pub fn tenant_config(instance: &InstanceId, tenant: &TenantId) -> String {
    format!("{}/{tenant}", tenants_root(instance))
}

/// Marker whose existence means instance-wide provisioning of `tenant` is complete.
pub fn tenant_bootstrapped(instance: &InstanceId, tenant: &TenantId) -> String {
    format!("{}/{BOOTSTRAPPED}", tenant_config(instance, tenant))
}

/// Parent of all per-tenant nodes owned by one module.
pub fn module_tenants_root(instance: &InstanceId, module: &ModuleId) -> String {
    format!("/{instance}/{MICROSERVICES}/{module}/{TENANTS}")
}

fn module_tenant(instance: &InstanceId, module: &ModuleId, tenant: &TenantId) -> String {
    format!("{}/{tenant}", module_tenants_root(instance, module))
}

/// Lock guarding one module's per-tenant seeding.
pub fn module_lock(instance: &InstanceId, module: &ModuleId, tenant: &TenantId) -> String {
    format!("{}/{LOCK}", module_tenant(instance, module, tenant))
}

/// Marker whose existence means `module` already seeded `tenant`.
pub fn module_bootstrapped(instance: &InstanceId, module: &ModuleId, tenant: &TenantId) -> String {
    format!("{}/{BOOTSTRAPPED}", module_tenant(instance, module, tenant))
}

/// Topic carrying tenant change events for an instance.
pub fn tenant_change_topic(instance: &InstanceId) -> String {
    format!("{instance}.global.tenant-model-updates")
}

/// Consumer group of the instance-wide tenant bootstrap consumers.
pub fn tenant_bootstrap_group(instance: &InstanceId) -> String {
    format!("{instance}.tenant-bootstrap-consumers")
}

/// Consumer group name prefix used by one module's tenant engine managers.
pub fn tenant_engine_group(instance: &InstanceId, module: &ModuleId) -> String {
    format!("{instance}.{module}.tenant-engine-consumers")
}

/// Parent path of `path`, or `None` for a top-level node.
pub fn parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches(SEPARATOR);
    match trimmed.rfind(SEPARATOR) {
        Some(0) | None => None,
        Some(idx) => Some(&trimmed[..idx]),
    }
}

/// Join a base path and a relative path (which may contain separators).
pub fn join(base: &str, relative: &str) -> String {
    let base = base.trim_end_matches(SEPARATOR);
    let relative = relative.trim_start_matches(SEPARATOR);
    format!("{base}{SEPARATOR}{relative}")
}
