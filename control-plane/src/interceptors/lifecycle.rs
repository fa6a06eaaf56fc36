use crate::metrics_defs::{CALLS_INFLIGHT, STICKY_ENTRIES, STICKY_EVICTIONS};
use crate::node::ConnectionId;
use crate::status::{CallStatus, Code};
use crate::stickiness::StickinessCache;
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper::service::Service;
use hyper::{Request, Response};
use shared::http::RemoteAddr;
use shared::{counter, gauge};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Attributes every call to the connection it arrived on.
///
/// The transport peer address becomes the call's [`ConnectionId`], attached
/// to the request for the services behind this one. A call without a peer
/// address cannot be attributed and is rejected. When a call is cancelled,
/// the stickiness entry of its connection is dropped so the next connection
/// from that peer resolves from scratch. Calls that complete, successfully
/// or not, leave the entry in place.
pub struct ConnectionLifecycle<S> {
    inner: S,
    cache: Arc<StickinessCache>,
}

impl<S> ConnectionLifecycle<S> {
    pub fn new(inner: S, cache: Arc<StickinessCache>) -> Self {
        ConnectionLifecycle { inner, cache }
    }
}

impl<S, B> Service<Request<B>> for ConnectionLifecycle<S>
where
    S: Service<Request<B>, Response = Response<BoxBody<Bytes, Infallible>>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, mut req: Request<B>) -> Self::Future {
        let Some(RemoteAddr(remote_addr)) = req.extensions().get::<RemoteAddr>().copied() else {
            tracing::error!("Unable to obtain client remote address, rejecting call");
            let response =
                CallStatus::new(Code::Internal, "unable to obtain client remote address")
                    .into_response();
            return Box::pin(async move { Ok(response) });
        };

        let connection = ConnectionId::from(remote_addr);
        req.extensions_mut().insert(connection.clone());

        let guard = CallGuard::new(self.cache.clone(), connection);
        let fut = self.inner.call(req);

        Box::pin(async move {
            let result = fut.await;
            guard.complete();
            result
        })
    }
}

/// Lives as long as the call. Dropped before `complete` means the call was
/// cancelled.
struct CallGuard {
    cache: Arc<StickinessCache>,
    connection: ConnectionId,
    completed: bool,
}

impl CallGuard {
    fn new(cache: Arc<StickinessCache>, connection: ConnectionId) -> Self {
        gauge!(CALLS_INFLIGHT).increment(1.0);
        CallGuard {
            cache,
            connection,
            completed: false,
        }
    }

    fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        gauge!(CALLS_INFLIGHT).decrement(1.0);

        if self.completed {
            return;
        }

        tracing::info!(client = %self.connection, "Call cancelled, clearing cluster cache");
        if self.cache.remove(&self.connection).is_some() {
            counter!(STICKY_EVICTIONS).increment(1);
            gauge!(STICKY_ENTRIES).set(self.cache.len() as f64);
        }
    }
}
