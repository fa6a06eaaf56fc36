//! REST-JSON xDS endpoint that hands each proxy the snapshot of its group.

mod protocol;
mod service;

pub use protocol::{DiscoveryRequest, DiscoveryResponse, ErrorDetail, resource_type_for_path};
pub use service::DiscoveryService;
