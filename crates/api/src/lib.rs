//! Tenant-management HTTP node: routing, request/response mapping, wiring.

pub mod app;
