use iotforge_core::TenantId;

/// Helper trait for tenant-scoped messages.
///
/// Buses use the tenant id as the partition key, so every message for one
/// tenant lands on the same partition and keeps its publish order.
pub trait TenantScoped {
    fn tenant_id(&self) -> &TenantId;
}
