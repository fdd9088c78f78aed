//! Tenant change events and the pub/sub mechanics that carry them.

pub mod bus;
pub mod in_memory_bus;
pub mod tenant;
pub mod tenant_change;

pub use bus::{BusError, EventBus, SharedEventBus, Subscription, shared};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use tenant::TenantScoped;
pub use tenant_change::{TenantChangeEvent, TenantChangeType, TenantSnapshot};
