// src/server/handler.rs
use std::convert::Infallible;
use std::sync::Arc;

use hyper::{Body, Request, Response};
use tower::Service;

use crate::proxy::{BackendPool, ReverseProxy};
use crate::server::admin;

/// Top-level `tower::Service`: dispatches `/health` to the admin endpoint
/// and everything else to the reverse proxy. Every path resolves to a
/// response — there is no error variant to propagate.
#[derive(Clone)]
pub struct RequestHandler {
    proxy: Arc<ReverseProxy>,
    pool: Arc<BackendPool>,
}

impl RequestHandler {
    pub fn new(proxy: Arc<ReverseProxy>, pool: Arc<BackendPool>) -> Self {
        Self { proxy, pool }
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let proxy = self.proxy.clone();
        let pool = self.pool.clone();

        Box::pin(async move {
            if req.uri().path() == "/health" {
                Ok(admin::health_response(&pool))
            } else {
                Ok(proxy.handle(req).await)
            }
        })
    }
}
