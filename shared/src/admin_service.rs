use crate::http::make_boxed_error_response;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

/// Liveness and readiness endpoints for a component.
///
/// `/health` always answers once the listener is up. `/ready` consults the
/// readiness callback on every request.
pub struct AdminService<F, E> {
    is_ready: F,
    _error: PhantomData<fn() -> E>,
}

impl<F, E> AdminService<F, E>
where
    F: Fn() -> bool,
{
    pub fn new(is_ready: F) -> Self {
        Self {
            is_ready,
            _error: PhantomData,
        }
    }
}

impl<F, E, B> Service<Request<B>> for AdminService<F, E>
where
    F: Fn() -> bool,
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let is_ready = (self.is_ready)();
        let is_get = req.method() == Method::GET;
        let path = req.uri().path().to_owned();

        Box::pin(async move {
            let ok_body = || Full::new(Bytes::from("ok\n")).boxed();

            let res = match (is_get, path.as_str()) {
                (true, "/health") => Response::new(ok_body()),
                (true, "/ready") if is_ready => Response::new(ok_body()),
                (true, "/ready") => make_boxed_error_response(StatusCode::SERVICE_UNAVAILABLE),
                (false, "/health" | "/ready") => {
                    make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED)
                }
                _ => make_boxed_error_response(StatusCode::NOT_FOUND),
            };
            Ok(res)
        })
    }
}
