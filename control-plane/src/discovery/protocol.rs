//! Request and response bodies of the REST-JSON discovery transport.
//!
//! Field names follow the proto3 JSON mapping (lowerCamelCase); the
//! snake_case proto field names are accepted as well.

use crate::node::Node;
use crate::resources::{Resource, ResourceType};
use serde::{Deserialize, Serialize};

const CLUSTERS_PATH: &str = "/v3/discovery:clusters";
const ENDPOINTS_PATH: &str = "/v3/discovery:endpoints";
const LISTENERS_PATH: &str = "/v3/discovery:listeners";
const ROUTES_PATH: &str = "/v3/discovery:routes";

pub fn resource_type_for_path(path: &str) -> Option<ResourceType> {
    match path {
        CLUSTERS_PATH => Some(ResourceType::Cluster),
        ENDPOINTS_PATH => Some(ResourceType::Endpoint),
        LISTENERS_PATH => Some(ResourceType::Listener),
        ROUTES_PATH => Some(ResourceType::Route),
        _ => None,
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiscoveryRequest {
    /// Version the proxy last accepted. Empty on the first request.
    #[serde(alias = "version_info")]
    pub version_info: String,
    /// Only guaranteed on the first request of a stream.
    pub node: Option<Node>,
    /// Empty means every resource of the type.
    #[serde(alias = "resource_names")]
    pub resource_names: Vec<String>,
    #[serde(alias = "type_url")]
    pub type_url: String,
    #[serde(alias = "response_nonce")]
    pub response_nonce: String,
    /// Set when the proxy rejected the previous response.
    #[serde(alias = "error_detail", skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<ErrorDetail>,
}

/// `google.rpc.Status` as sent in a NACK.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ErrorDetail {
    pub code: i32,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResponse {
    pub version_info: String,
    pub resources: Vec<Resource>,
    pub type_url: String,
    pub nonce: String,
}
