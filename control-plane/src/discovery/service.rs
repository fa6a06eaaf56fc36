use crate::discovery::protocol::{DiscoveryRequest, DiscoveryResponse, resource_type_for_path};
use crate::errors::ControlPlaneError;
use crate::metrics_defs::DISCOVERY_RESPONSES;
use crate::node::ConnectionId;
use crate::resolver::NodeGroup;
use crate::resources::ResourceType;
use crate::snapshot::Snapshot;
use crate::snapshot_cache::SnapshotCache;
use crate::status::{CallStatus, Code};
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Method, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body, Bytes};
use hyper::service::Service;
use hyper::{Request, Response};
use shared::counter;
use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;

#[derive(thiserror::Error, Debug)]
enum DiscoveryError {
    #[error("no discovery endpoint at {0}")]
    UnknownPath(String),
    #[error("method {0} not allowed, discovery requests use POST")]
    MethodNotAllowed(Method),
    #[error("request carries no connection identity")]
    MissingConnection,
    #[error("failed to read request body: {0}")]
    Body(String),
    #[error("malformed discovery request: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("type URL {requested} sent to the {endpoint} endpoint")]
    TypeMismatch {
        requested: String,
        endpoint: &'static str,
    },
    #[error("no snapshot for group {0}")]
    NoSnapshot(String),
}

impl DiscoveryError {
    fn code(&self) -> Code {
        match self {
            DiscoveryError::UnknownPath(_) => Code::NotFound,
            DiscoveryError::MethodNotAllowed(_) => Code::Unimplemented,
            DiscoveryError::MissingConnection => Code::FailedPrecondition,
            DiscoveryError::Body(_) => Code::Internal,
            DiscoveryError::Malformed(_) | DiscoveryError::TypeMismatch { .. } => {
                Code::InvalidArgument
            }
            DiscoveryError::NoSnapshot(_) => Code::Unavailable,
        }
    }

    fn into_response(self) -> Response<BoxBody<Bytes, Infallible>> {
        CallStatus::new(self.code(), self.to_string()).into_response()
    }
}

struct Inner<G: NodeGroup> {
    snapshots: Arc<SnapshotCache<G>>,
    poll_timeout: Duration,
    shutdown: watch::Receiver<bool>,
    nonce: AtomicU64,
}

/// Serves snapshots over the REST-JSON flavour of the xDS v3 protocol.
///
/// A request whose `versionInfo` matches the current snapshot of its group is
/// held until that snapshot is replaced or the poll timeout elapses, in which
/// case it is answered with `304 Not Modified`. Held requests are also
/// answered with `304` as soon as `shutdown` flips or its sender is dropped,
/// so connections can drain.
pub struct DiscoveryService<G: NodeGroup> {
    inner: Arc<Inner<G>>,
}

impl<G: NodeGroup> DiscoveryService<G> {
    pub fn new(
        snapshots: Arc<SnapshotCache<G>>,
        poll_timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        DiscoveryService {
            inner: Arc::new(Inner {
                snapshots,
                poll_timeout,
                shutdown,
                nonce: AtomicU64::new(0),
            }),
        }
    }
}

impl<G, B> Service<Request<B>> for DiscoveryService<G>
where
    G: NodeGroup + 'static,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Display,
{
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = ControlPlaneError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move {
            let response = match inner.handle(req).await {
                Ok(response) => response,
                Err(e) => e.into_response(),
            };
            Ok(response)
        })
    }
}

impl<G: NodeGroup> Inner<G> {
    async fn handle<B>(
        &self,
        req: Request<B>,
    ) -> Result<Response<BoxBody<Bytes, Infallible>>, DiscoveryError>
    where
        B: Body,
        B::Error: Display,
    {
        let resource_type = resource_type_for_path(req.uri().path())
            .ok_or_else(|| DiscoveryError::UnknownPath(req.uri().path().to_owned()))?;

        if req.method() != Method::POST {
            return Err(DiscoveryError::MethodNotAllowed(req.method().clone()));
        }

        let connection = req
            .extensions()
            .get::<ConnectionId>()
            .cloned()
            .ok_or(DiscoveryError::MissingConnection)?;

        let body = req
            .into_body()
            .collect()
            .await
            .map_err(|e| DiscoveryError::Body(e.to_string()))?
            .to_bytes();
        let request: DiscoveryRequest = serde_json::from_slice(&body)?;

        // An empty type URL takes the type of the endpoint it was sent to
        if !request.type_url.is_empty()
            && ResourceType::from_type_url(&request.type_url) != Some(resource_type)
        {
            return Err(DiscoveryError::TypeMismatch {
                requested: request.type_url,
                endpoint: resource_type.as_str(),
            });
        }

        let node = request.node.clone().unwrap_or_default();
        let group = self.snapshots.group_for(&connection, &node);

        if let Some(detail) = &request.error_detail {
            tracing::warn!(
                group = ?group,
                client = %connection,
                version = %request.version_info,
                nonce = %request.response_nonce,
                message = %detail.message,
                "Proxy rejected configuration"
            );
        }

        let mut rx = self.snapshots.watch(&group);
        let current = rx.borrow_and_update().clone();
        let mut snapshot =
            current.ok_or_else(|| DiscoveryError::NoSnapshot(format!("{group:?}")))?;

        if snapshot.version() == request.version_info {
            let version = snapshot.version().to_owned();
            let poll = tokio::time::timeout(self.poll_timeout, next_version(&mut rx, &version));

            tokio::select! {
                polled = poll => match polled {
                    Ok(Some(newer)) => snapshot = newer,
                    Ok(None) => return Err(DiscoveryError::NoSnapshot(format!("{group:?}"))),
                    Err(_elapsed) => {
                        tracing::debug!(group = ?group, client = %connection, "Poll timed out");
                        return Ok(not_modified());
                    }
                },
                _ = shutting_down(self.shutdown.clone()) => {
                    tracing::debug!(group = ?group, client = %connection, "Releasing poll on shutdown");
                    return Ok(not_modified());
                }
            }
        }

        Ok(self.respond(&snapshot, resource_type, &request.resource_names))
    }

    fn respond(
        &self,
        snapshot: &Snapshot,
        resource_type: ResourceType,
        names: &[String],
    ) -> Response<BoxBody<Bytes, Infallible>> {
        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed) + 1;
        let response = DiscoveryResponse {
            version_info: snapshot.version().to_owned(),
            resources: snapshot.resources(resource_type, names),
            type_url: resource_type.type_url().to_owned(),
            nonce: nonce.to_string(),
        };

        tracing::debug!(
            version = %response.version_info,
            type_url = %response.type_url,
            resources = response.resources.len(),
            "Sending discovery response"
        );
        counter!(DISCOVERY_RESPONSES, "type" => resource_type.as_str()).increment(1);

        match serde_json::to_vec(&response) {
            Ok(body) => {
                let mut response = Response::new(Full::new(Bytes::from(body)).boxed());
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                response
            }
            Err(e) => CallStatus::new(Code::Internal, e.to_string()).into_response(),
        }
    }
}

/// Waits until the watched snapshot carries a version other than `version`.
/// Returns `None` if the store went away.
async fn next_version(
    rx: &mut watch::Receiver<Option<Arc<Snapshot>>>,
    version: &str,
) -> Option<Arc<Snapshot>> {
    loop {
        rx.changed().await.ok()?;
        let current = rx.borrow_and_update().clone();
        if let Some(snapshot) = current
            && snapshot.version() != version
        {
            return Some(snapshot);
        }
    }
}

/// Resolves once the shutdown flag is set or its sender is gone.
async fn shutting_down(mut shutdown: watch::Receiver<bool>) {
    loop {
        let stopping = *shutdown.borrow_and_update();
        if stopping || shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn not_modified() -> Response<BoxBody<Bytes, Infallible>> {
    let mut response = Response::new(Empty::new().boxed());
    *response.status_mut() = StatusCode::NOT_MODIFIED;
    response
}
