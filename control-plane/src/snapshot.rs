use crate::resources::{
    Address, AggregatedConfigSource, ApiListener, Cluster, ClusterLoadAssignment, ConfigSource,
    DiscoveryType, EdsClusterConfig, Endpoint, Filter, FilterChain, HTTP_CONNECTION_MANAGER_FILTER,
    HealthStatus, HttpConnectionManager, LbEndpoint, LbPolicy, Listener, LocalityLbEndpoints,
    Locality, Rds, Resource, ResourceType, Route, RouteAction, RouteConfiguration, RouteMatch,
    SocketAddress, VirtualHost,
};
use std::collections::HashSet;
use std::net::SocketAddr;

const LOCALITY_ZONE: &str = "zone";
const LOCALITY_WEIGHT: u32 = 10;
const VIRTUAL_HOST_NAME: &str = "virtualhost";
const DEFAULT_ROUTE_NAME: &str = "default-route";

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SnapshotError {
    #[error("route configuration {route} targets unknown cluster {cluster}")]
    UnknownRouteCluster { route: String, cluster: String },

    #[error("endpoint assignment for unknown cluster {0}")]
    UnknownEndpointCluster(String),

    #[error("listener {listener} references unknown route configuration {route}")]
    UnknownRouteConfig { listener: String, route: String },
}

/// Immutable set of resources served to every node of one group.
///
/// The version is stamped by the snapshot store when the snapshot is
/// registered; a freshly built snapshot has an empty version.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    version: String,
    clusters: Vec<Cluster>,
    endpoints: Vec<ClusterLoadAssignment>,
    listeners: Vec<Listener>,
    routes: Vec<RouteConfiguration>,
}

impl Snapshot {
    pub fn new(
        clusters: Vec<Cluster>,
        endpoints: Vec<ClusterLoadAssignment>,
        listeners: Vec<Listener>,
        routes: Vec<RouteConfiguration>,
    ) -> Self {
        Snapshot {
            version: String::new(),
            clusters,
            endpoints,
            listeners,
            routes,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub(crate) fn with_version(mut self, version: String) -> Self {
        self.version = version;
        self
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn endpoints(&self) -> &[ClusterLoadAssignment] {
        &self.endpoints
    }

    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    pub fn routes(&self) -> &[RouteConfiguration] {
        &self.routes
    }

    /// Resources of one type, optionally restricted to the given names.
    /// An empty `names` slice means all resources of that type.
    pub fn resources(&self, resource_type: ResourceType, names: &[String]) -> Vec<Resource> {
        let all: Vec<Resource> = match resource_type {
            ResourceType::Cluster => self.clusters.iter().cloned().map(Resource::Cluster).collect(),
            ResourceType::Endpoint => {
                self.endpoints.iter().cloned().map(Resource::Endpoint).collect()
            }
            ResourceType::Listener => {
                self.listeners.iter().cloned().map(Resource::Listener).collect()
            }
            ResourceType::Route => self.routes.iter().cloned().map(Resource::Route).collect(),
        };

        if names.is_empty() {
            return all;
        }

        all.into_iter()
            .filter(|resource| names.iter().any(|name| name == resource.name()))
            .collect()
    }

    /// Checks that every cross-resource reference resolves inside this snapshot.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        let clusters: HashSet<&str> = self.clusters.iter().map(|c| c.name.as_str()).collect();
        let routes: HashSet<&str> = self.routes.iter().map(|r| r.name.as_str()).collect();

        for route in &self.routes {
            if let Some(cluster) = route.target_clusters().find(|c| !clusters.contains(c)) {
                return Err(SnapshotError::UnknownRouteCluster {
                    route: route.name.clone(),
                    cluster: cluster.to_string(),
                });
            }
        }

        for assignment in &self.endpoints {
            if !clusters.contains(assignment.cluster_name.as_str()) {
                return Err(SnapshotError::UnknownEndpointCluster(
                    assignment.cluster_name.clone(),
                ));
            }
        }

        for listener in &self.listeners {
            if let Some(route) = listener.route_config_names().find(|r| !routes.contains(r)) {
                return Err(SnapshotError::UnknownRouteConfig {
                    listener: listener.name.clone(),
                    route: route.to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Builds the snapshot for a group: one EDS cluster named after the group,
/// its endpoint at `backend`, a listener named after `domain` that loads the
/// group's route configuration over ADS, and a catch-all route to the cluster.
pub fn build_snapshot(group_name: &str, backend: SocketAddr, domain: &str) -> Snapshot {
    let route_name = format!("{group_name}_route");

    Snapshot::new(
        vec![cluster(group_name)],
        vec![cluster_load_assignment(group_name, backend)],
        vec![listener(domain, &route_name)],
        vec![route_configuration(&route_name, group_name)],
    )
}

fn ads_config_source() -> ConfigSource {
    ConfigSource {
        ads: AggregatedConfigSource {},
    }
}

fn cluster(name: &str) -> Cluster {
    Cluster {
        name: name.to_string(),
        discovery_type: DiscoveryType::Eds,
        eds_cluster_config: EdsClusterConfig {
            eds_config: ads_config_source(),
        },
        lb_policy: LbPolicy::RoundRobin,
    }
}

fn cluster_load_assignment(cluster_name: &str, backend: SocketAddr) -> ClusterLoadAssignment {
    ClusterLoadAssignment {
        cluster_name: cluster_name.to_string(),
        endpoints: vec![LocalityLbEndpoints {
            locality: Locality {
                zone: LOCALITY_ZONE.into(),
            },
            load_balancing_weight: LOCALITY_WEIGHT,
            lb_endpoints: vec![LbEndpoint {
                health_status: HealthStatus::Healthy,
                endpoint: Endpoint {
                    address: Address {
                        socket_address: SocketAddress {
                            address: backend.ip().to_string(),
                            port_value: backend.port(),
                        },
                    },
                },
            }],
        }],
    }
}

fn listener(domain: &str, route_name: &str) -> Listener {
    let rds = Rds {
        config_source: ads_config_source(),
        route_config_name: route_name.to_string(),
    };

    Listener {
        name: domain.to_string(),
        filter_chains: vec![FilterChain {
            filters: vec![Filter {
                name: HTTP_CONNECTION_MANAGER_FILTER.into(),
                typed_config: HttpConnectionManager::new(None),
            }],
        }],
        api_listener: ApiListener {
            api_listener: HttpConnectionManager::new(Some(rds)),
        },
    }
}

fn route_configuration(route_name: &str, target_cluster: &str) -> RouteConfiguration {
    RouteConfiguration {
        name: route_name.to_string(),
        virtual_hosts: vec![VirtualHost {
            name: VIRTUAL_HOST_NAME.into(),
            domains: vec!["*".into()],
            routes: vec![Route {
                name: DEFAULT_ROUTE_NAME.into(),
                r#match: RouteMatch { prefix: "/".into() },
                route: RouteAction {
                    cluster: target_cluster.to_string(),
                },
            }],
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> SocketAddr {
        "127.0.0.1:12000".parse().unwrap()
    }

    #[test]
    fn test_build_snapshot() {
        let snapshot = build_snapshot("priority", backend(), "my-test-domain");
        assert!(snapshot.validate().is_ok());
        assert_eq!(snapshot.version(), "");

        assert_eq!(snapshot.clusters().len(), 1);
        assert_eq!(snapshot.clusters()[0].name, "priority");
        assert_eq!(snapshot.clusters()[0].discovery_type, DiscoveryType::Eds);

        let socket = &snapshot.endpoints()[0].endpoints[0].lb_endpoints[0]
            .endpoint
            .address
            .socket_address;
        assert_eq!(snapshot.endpoints()[0].cluster_name, "priority");
        assert_eq!(socket.address, "127.0.0.1");
        assert_eq!(socket.port_value, 12000);

        assert_eq!(snapshot.listeners()[0].name, "my-test-domain");
        let route_names: Vec<&str> = snapshot.listeners()[0].route_config_names().collect();
        assert_eq!(route_names, vec!["priority_route"]);

        let routes = snapshot.routes();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].name, "priority_route");
        let targets: Vec<&str> = routes[0].target_clusters().collect();
        assert_eq!(targets, vec!["priority"]);
        assert_eq!(routes[0].virtual_hosts[0].routes[0].r#match.prefix, "/");
    }

    #[test]
    fn test_resources_by_type_and_name() {
        let snapshot = build_snapshot("normal", backend(), "my-test-domain");

        let clusters = snapshot.resources(ResourceType::Cluster, &[]);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].name(), "normal");

        let routes = snapshot.resources(ResourceType::Route, &["normal_route".to_string()]);
        assert_eq!(routes.len(), 1);

        let missing = snapshot.resources(ResourceType::Listener, &["other".to_string()]);
        assert!(missing.is_empty());
    }

    #[test]
    fn test_validate_dangling_references() {
        let priority = build_snapshot("priority", backend(), "my-test-domain");
        let normal = build_snapshot("normal", backend(), "my-test-domain");

        // Route pointing at a cluster from another group
        let snapshot = Snapshot::new(
            priority.clusters().to_vec(),
            priority.endpoints().to_vec(),
            vec![],
            normal.routes().to_vec(),
        );
        assert_eq!(
            snapshot.validate(),
            Err(SnapshotError::UnknownRouteCluster {
                route: "normal_route".into(),
                cluster: "normal".into(),
            })
        );

        // Endpoint assignment without its cluster
        let snapshot = Snapshot::new(
            priority.clusters().to_vec(),
            normal.endpoints().to_vec(),
            vec![],
            vec![],
        );
        assert_eq!(
            snapshot.validate(),
            Err(SnapshotError::UnknownEndpointCluster("normal".into()))
        );

        // Listener whose route configuration is missing
        let snapshot = Snapshot::new(
            priority.clusters().to_vec(),
            vec![],
            priority.listeners().to_vec(),
            vec![],
        );
        assert!(matches!(
            snapshot.validate(),
            Err(SnapshotError::UnknownRouteConfig { .. })
        ));
    }
}
