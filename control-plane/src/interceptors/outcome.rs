use crate::metrics_defs::CALL_FAILURES;
use crate::status::{CallStatus, Code};
use hyper::service::Service;
use hyper::{Request, Response};
use shared::counter;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;

/// Reports calls that finished with an error. Purely observational: the
/// response or error of the inner service is passed through untouched.
pub struct CallOutcome<S> {
    inner: S,
}

impl<S> CallOutcome<S> {
    pub fn new(inner: S) -> Self {
        CallOutcome { inner }
    }
}

impl<S, B, R> Service<Request<B>> for CallOutcome<S>
where
    S: Service<Request<B>, Response = Response<R>>,
    S::Future: Send + 'static,
    S::Error: Display + Send + 'static,
    R: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let path = req.uri().path().to_owned();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let result = fut.await;
            let status = match &result {
                Ok(response) => CallStatus::from_response(response),
                Err(e) => CallStatus::new(Code::Internal, e.to_string()),
            };
            report(&status, &path);
            result
        })
    }
}

fn is_failure(status: &CallStatus) -> bool {
    !status.is_ok() && status.code != Code::Cancelled
}

fn report(status: &CallStatus, path: &str) {
    if !is_failure(status) {
        return;
    }

    tracing::error!(
        code = %status.code,
        description = status.description.as_deref().unwrap_or(""),
        path,
        "Error during discovery call"
    );
    counter!(CALL_FAILURES, "code" => status.code.as_str()).increment(1);
}
