use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioExecutor;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder;
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Transport-level address of the peer that opened the connection a request
/// arrived on. Inserted into the request extensions by [`serve`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

pub fn make_boxed_error_response(status_code: StatusCode) -> Response<BoxBody<Bytes, Infallible>> {
    let message = status_code
        .canonical_reason()
        .unwrap_or("an error occurred");

    let mut response = Response::new(Full::new(Bytes::from(format!("{message}\n"))).boxed());
    *response.status_mut() = status_code;
    response
}

pub async fn bind(host: &str, port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(format!("{host}:{port}")).await
}

/// Accepts connections on `listener` until `shutdown` flips, then stops
/// accepting and waits up to `drain_timeout` for open connections to finish.
/// Connections still open after that are aborted.
pub async fn serve<S, E>(
    listener: TcpListener,
    service: S,
    mut shutdown: watch::Receiver<bool>,
    drain_timeout: Duration,
) -> Result<(), E>
where
    S: Service<Request<Incoming>, Response = Response<BoxBody<Bytes, Infallible>>, Error = E>
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
    E: From<std::io::Error> + std::error::Error + Send + Sync + 'static,
{
    let service_arc = Arc::new(service);
    let builder = Builder::new(TokioExecutor::new());
    let graceful = GracefulShutdown::new();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = accepted?;
                let _ = stream.set_nodelay(true);
                let io = TokioIo::new(stream);
                let svc = WithRemoteAddr {
                    inner: service_arc.clone(),
                    remote_addr: peer_addr,
                };

                // Hand the connection to hyper; auto-detect h1/h2 on this socket
                let conn = graceful.watch(builder.serve_connection(io, svc).into_owned());
                connections.spawn(async move {
                    if let Err(e) = conn.await {
                        tracing::debug!(error = %e, peer = %peer_addr, "connection closed with error");
                    }
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown.changed() => break,
        }
    }

    drop(listener);

    tokio::select! {
        _ = graceful.shutdown() => {
            tracing::debug!("all connections drained");
        }
        _ = tokio::time::sleep(drain_timeout) => {
            tracing::warn!(timeout = ?drain_timeout, "timed out waiting for connections to drain");
        }
    }
    connections.abort_all();
    while connections.join_next().await.is_some() {}

    Ok(())
}

struct WithRemoteAddr<S> {
    inner: Arc<S>,
    remote_addr: SocketAddr,
}

impl<S> Service<Request<Incoming>> for WithRemoteAddr<S>
where
    S: Service<Request<Incoming>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn call(&self, mut req: Request<Incoming>) -> Self::Future {
        req.extensions_mut().insert(RemoteAddr(self.remote_addr));
        self.inner.call(req)
    }
}
