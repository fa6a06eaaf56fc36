//! Serde models of the xDS v3 resources served to proxies, in the proto3 JSON
//! mapping Envoy's REST transport uses. Only the fields this control plane
//! sets are modelled.

use serde::{Deserialize, Serialize};

pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ENDPOINT_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";

const HTTP_CONNECTION_MANAGER_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
const ROUTER_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";

pub const HTTP_CONNECTION_MANAGER_FILTER: &str = "envoy.filters.network.http_connection_manager";
pub const ROUTER_FILTER: &str = "envoy.filters.http.router";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Cluster,
    Endpoint,
    Listener,
    Route,
}

impl ResourceType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Cluster => "clusters",
            ResourceType::Endpoint => "endpoints",
            ResourceType::Listener => "listeners",
            ResourceType::Route => "routes",
        }
    }

    pub const fn type_url(&self) -> &'static str {
        match self {
            ResourceType::Cluster => CLUSTER_TYPE_URL,
            ResourceType::Endpoint => ENDPOINT_TYPE_URL,
            ResourceType::Listener => LISTENER_TYPE_URL,
            ResourceType::Route => ROUTE_TYPE_URL,
        }
    }

    pub fn from_type_url(type_url: &str) -> Option<Self> {
        match type_url {
            CLUSTER_TYPE_URL => Some(ResourceType::Cluster),
            ENDPOINT_TYPE_URL => Some(ResourceType::Endpoint),
            LISTENER_TYPE_URL => Some(ResourceType::Listener),
            ROUTE_TYPE_URL => Some(ResourceType::Route),
            _ => None,
        }
    }
}

/// A resource packed the way `google.protobuf.Any` renders in JSON: the type
/// URL under `@type` next to the message fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum Resource {
    #[serde(rename = "type.googleapis.com/envoy.config.cluster.v3.Cluster")]
    Cluster(Cluster),
    #[serde(rename = "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment")]
    Endpoint(ClusterLoadAssignment),
    #[serde(rename = "type.googleapis.com/envoy.config.listener.v3.Listener")]
    Listener(Listener),
    #[serde(rename = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration")]
    Route(RouteConfiguration),
}

impl Resource {
    pub fn name(&self) -> &str {
        match self {
            Resource::Cluster(c) => &c.name,
            Resource::Endpoint(e) => &e.cluster_name,
            Resource::Listener(l) => &l.name,
            Resource::Route(r) => &r.name,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSource {
    pub ads: AggregatedConfigSource,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedConfigSource {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveryType {
    Eds,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LbPolicy {
    RoundRobin,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub name: String,
    #[serde(rename = "type")]
    pub discovery_type: DiscoveryType,
    pub eds_cluster_config: EdsClusterConfig,
    pub lb_policy: LbPolicy,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdsClusterConfig {
    pub eds_config: ConfigSource,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLoadAssignment {
    pub cluster_name: String,
    pub endpoints: Vec<LocalityLbEndpoints>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalityLbEndpoints {
    pub locality: Locality,
    pub load_balancing_weight: u32,
    pub lb_endpoints: Vec<LbEndpoint>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Locality {
    pub zone: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LbEndpoint {
    pub health_status: HealthStatus,
    pub endpoint: Endpoint,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: Address,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub socket_address: SocketAddress,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketAddress {
    pub address: String,
    pub port_value: u16,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    pub name: String,
    pub filter_chains: Vec<FilterChain>,
    pub api_listener: ApiListener,
}

impl Listener {
    /// Route configuration names the listener's connection managers load via RDS.
    pub fn route_config_names(&self) -> impl Iterator<Item = &str> {
        let api = self.api_listener.api_listener.rds.as_ref();
        let chains = self
            .filter_chains
            .iter()
            .flat_map(|chain| chain.filters.iter())
            .filter_map(|filter| filter.typed_config.rds.as_ref());

        api.into_iter()
            .chain(chains)
            .map(|rds| rds.route_config_name.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiListener {
    pub api_listener: HttpConnectionManager,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterChain {
    pub filters: Vec<Filter>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub name: String,
    pub typed_config: HttpConnectionManager,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConnectionManager {
    #[serde(rename = "@type")]
    pub type_url: String,
    pub http_filters: Vec<HttpFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rds: Option<Rds>,
}

impl HttpConnectionManager {
    pub fn new(rds: Option<Rds>) -> Self {
        HttpConnectionManager {
            type_url: HTTP_CONNECTION_MANAGER_TYPE_URL.into(),
            http_filters: vec![HttpFilter::router()],
            rds,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpFilter {
    pub name: String,
    pub typed_config: TypedConfig,
}

impl HttpFilter {
    pub fn router() -> Self {
        HttpFilter {
            name: ROUTER_FILTER.into(),
            typed_config: TypedConfig {
                type_url: ROUTER_TYPE_URL.into(),
            },
        }
    }
}

/// An `Any` with no fields beyond its type URL.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypedConfig {
    #[serde(rename = "@type")]
    pub type_url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rds {
    pub config_source: ConfigSource,
    pub route_config_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfiguration {
    pub name: String,
    pub virtual_hosts: Vec<VirtualHost>,
}

impl RouteConfiguration {
    /// Clusters the routes of this configuration send traffic to.
    pub fn target_clusters(&self) -> impl Iterator<Item = &str> {
        self.virtual_hosts
            .iter()
            .flat_map(|vh| vh.routes.iter())
            .map(|route| route.route.cluster.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VirtualHost {
    pub name: String,
    pub domains: Vec<String>,
    pub routes: Vec<Route>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub name: String,
    #[serde(rename = "match")]
    pub r#match: RouteMatch,
    pub route: RouteAction,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteMatch {
    pub prefix: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteAction {
    pub cluster: String,
}
