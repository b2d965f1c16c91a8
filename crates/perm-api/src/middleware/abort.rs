//! Abort middleware used by a hard server stop.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use http::{Request, Response};
use tokio::sync::watch;
use tonic::Status;
use tower::{Layer, Service};

use super::status_response;

/// Layer that cancels calls once the abort flag is raised.
///
/// Open connections outlive the accept loop, so the flag is checked both
/// when a call arrives and while it runs.
#[derive(Clone)]
pub struct AbortLayer {
    abort: watch::Receiver<bool>,
}

impl AbortLayer {
    pub fn new(abort: watch::Receiver<bool>) -> Self {
        Self { abort }
    }
}

impl<S> Layer<S> for AbortLayer {
    type Service = AbortService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AbortService {
            inner,
            abort: self.abort.clone(),
        }
    }
}

/// Service that drops the inner call future when the server is stopped.
#[derive(Clone)]
pub struct AbortService<S> {
    inner: S,
    abort: watch::Receiver<bool>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for AbortService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        if *self.abort.borrow() {
            let response: Response<ResBody> = status_response(&stopped());
            return Box::pin(async move { Ok(response) });
        }

        let mut inner = self.inner.clone();
        let future = inner.call(request);
        let mut abort = self.abort.clone();

        Box::pin(async move {
            tokio::select! {
                result = future => result,
                Ok(_) = abort.wait_for(|aborted| *aborted) => {
                    Ok(status_response(&stopped()))
                }
            }
        })
    }
}

fn stopped() -> Status {
    Status::unavailable("server stopped")
}
