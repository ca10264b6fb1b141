// Application layer: wires configuration to the adapters and core services.

pub mod service;

pub use service::{build_service, Components};
