use crate::http::{make_boxed_error_response, make_boxed_response};
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

/// Reports whether the process has finished booting.
pub type ReadinessProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// Serves `/health` (process is up) and `/ready` (readiness probe passes).
pub struct AdminService<E> {
    is_ready: ReadinessProbe,
    _error: PhantomData<fn() -> E>,
}

impl<E> AdminService<E> {
    pub fn new(is_ready: ReadinessProbe) -> Self {
        Self {
            is_ready,
            _error: PhantomData,
        }
    }

    fn respond(&self, path: &str) -> Response<BoxBody<Bytes, E>>
    where
        E: 'static,
    {
        match path {
            "/health" => make_boxed_response(StatusCode::OK, "ok\n"),
            "/ready" if (self.is_ready)() => make_boxed_response(StatusCode::OK, "ok\n"),
            "/ready" => make_boxed_error_response(StatusCode::SERVICE_UNAVAILABLE),
            _ => make_boxed_error_response(StatusCode::NOT_FOUND),
        }
    }
}

impl<E> Service<Request<Incoming>> for AdminService<E>
where
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, E>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let res = self.respond(req.uri().path());
        Box::pin(async move { Ok(res) })
    }
}
