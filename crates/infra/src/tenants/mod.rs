//! Tenant-management write path and its change notifications.

pub mod notifier;
pub mod repository;

pub use notifier::{NotifyError, TenantChangeNotifier};
pub use repository::{InMemoryTenantRepository, TenantRepository, TenantStoreError};
