pub mod builder;

use crate::backend::{Backend, QuotaInput, QuotaOutput};
use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::HeaderMap;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use builder::RateLimiterBuilder;
use futures::future::{ok, LocalBoxFuture, Ready};
use std::future::Future;
use std::rc::Rc;

type AllowedTransformation = dyn Fn(&mut HeaderMap, Option<&QuotaOutput>, bool);
type DeniedResponse = dyn Fn(&QuotaOutput) -> HttpResponse;
type RollbackCondition = dyn Fn(StatusCode) -> bool;

/// Rate limit middleware.
///
/// Requests that the backend denies never reach the wrapped service; they receive the
/// configured denied response (429 by default).
pub struct RateLimiter<B, F> {
    backend: B,
    input_fn: Rc<F>,
    fail_open: bool,
    allowed_transformation: Option<Rc<AllowedTransformation>>,
    denied_response: Rc<DeniedResponse>,
    rollback_condition: Option<Rc<RollbackCondition>>,
}

impl<B: Backend, F> Clone for RateLimiter<B, F> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            input_fn: self.input_fn.clone(),
            fail_open: self.fail_open,
            allowed_transformation: self.allowed_transformation.clone(),
            denied_response: self.denied_response.clone(),
            rollback_condition: self.rollback_condition.clone(),
        }
    }
}

impl<B, F, O> RateLimiter<B, F>
where
    B: Backend + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<QuotaInput, actix_web::Error>>,
{
    /// # Arguments
    ///
    /// * `backend`: The store that counts requests.
    /// * `input_fn`: Produces the key and quota for an incoming request, see
    ///   [QuotaInputBuilder](crate::backend::QuotaInputBuilder).
    pub fn builder(backend: B, input_fn: F) -> RateLimiterBuilder<B, F> {
        RateLimiterBuilder::new(backend, input_fn)
    }
}

impl<S, BODY, B, F, O> Transform<S, ServiceRequest> for RateLimiter<B, F>
where
    S: Service<ServiceRequest, Response = ServiceResponse<BODY>, Error = actix_web::Error>
        + 'static,
    S::Future: 'static,
    BODY: 'static,
    B: Backend + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<QuotaInput, actix_web::Error>>,
{
    type Response = ServiceResponse<EitherBody<BODY>>;
    type Error = actix_web::Error;
    type Transform = RateLimiterMiddleware<S, B, F>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimiterMiddleware {
            service: Rc::new(service),
            limiter: self.clone(),
        })
    }
}

pub struct RateLimiterMiddleware<S, B, F> {
    service: Rc<S>,
    limiter: RateLimiter<B, F>,
}

impl<S, BODY, B, F, O> Service<ServiceRequest> for RateLimiterMiddleware<S, B, F>
where
    S: Service<ServiceRequest, Response = ServiceResponse<BODY>, Error = actix_web::Error>
        + 'static,
    S::Future: 'static,
    BODY: 'static,
    B: Backend + 'static,
    F: Fn(&ServiceRequest) -> O + 'static,
    O: Future<Output = Result<QuotaInput, actix_web::Error>>,
{
    type Response = ServiceResponse<EitherBody<BODY>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let limiter = self.limiter.clone();

        Box::pin(async move {
            let input = match (limiter.input_fn)(&req).await {
                Ok(input) => input,
                Err(e) => {
                    log::error!("Rate limiter input function failed: {e}");
                    return Ok(req.into_response(e.error_response()).map_into_right_body());
                }
            };

            let (output, rollback) = match limiter.backend.request(input).await {
                Ok((decision, output, rollback)) => {
                    if decision.is_denied() {
                        log::debug!(
                            "Rate limit of {} exceeded for {} {}",
                            output.limit,
                            req.method(),
                            req.path()
                        );
                        let response = (limiter.denied_response)(&output);
                        return Ok(req.into_response(response).map_into_right_body());
                    }
                    (Some(output), Some(rollback))
                }
                Err(e) if limiter.fail_open => {
                    log::warn!("Rate limiter failed: {e}, allowing the request anyway");
                    (None, None)
                }
                Err(e) => {
                    log::error!("Rate limiter failed: {e}");
                    return Ok(req.into_response(e.error_response()).map_into_right_body());
                }
            };

            let mut service_response = service.call(req).await?;

            let mut rolled_back = false;
            if let (Some(token), Some(condition)) = (rollback, &limiter.rollback_condition) {
                let status = service_response.status();
                if condition(status) {
                    match limiter.backend.rollback(token).await {
                        Ok(()) => rolled_back = true,
                        Err(e) => log::error!(
                            "Unable to rollback rate limit count for response {status}: {e}"
                        ),
                    }
                }
            }

            if let Some(transformation) = &limiter.allowed_transformation {
                (transformation)(service_response.headers_mut(), output.as_ref(), rolled_back);
            }

            Ok(service_response.map_into_left_body())
        })
    }
}
