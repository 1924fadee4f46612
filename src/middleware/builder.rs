use crate::backend::{Backend, QuotaInput, QuotaOutput};
use crate::middleware::{AllowedTransformation, DeniedResponse, RateLimiter, RollbackCondition};
use actix_web::dev::ServiceRequest;
use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use std::future::Future;
use std::rc::Rc;

pub static X_RATELIMIT_LIMIT: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-limit"));

pub static X_RATELIMIT_REMAINING: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-remaining"));

pub static X_RATELIMIT_RESET: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("x-ratelimit-reset"));

pub struct RateLimiterBuilder<B, F> {
    backend: B,
    input_fn: F,
    fail_open: bool,
    allowed_transformation: Option<Rc<AllowedTransformation>>,
    denied_response: Rc<DeniedResponse>,
    rollback_condition: Option<Rc<RollbackCondition>>,
}

impl<B, F, O> RateLimiterBuilder<B, F>
where
    B: Backend + 'static,
    F: Fn(&ServiceRequest) -> O,
    O: Future<Output = Result<QuotaInput, actix_web::Error>>,
{
    pub(super) fn new(backend: B, input_fn: F) -> Self {
        Self {
            backend,
            input_fn,
            fail_open: false,
            allowed_transformation: None,
            denied_response: Rc::new(|_: &QuotaOutput| {
                HttpResponse::TooManyRequests().finish()
            }),
            rollback_condition: None,
        }
    }

    /// Let requests through when the backend errors, instead of returning the error response.
    ///
    /// Off by default, so a broken store fails closed.
    pub fn fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    /// Report the window state to clients.
    ///
    /// Allowed responses get `x-ratelimit-limit`, `x-ratelimit-remaining` and
    /// `x-ratelimit-reset` (whole seconds, rounded up). Denied responses are an empty 429 with
    /// the same headers plus `retry-after`. A rolled back request is not counted in
    /// `x-ratelimit-remaining`.
    ///
    /// Replaces any earlier allowed transformation and denied response.
    pub fn add_headers(mut self) -> Self {
        self.allowed_transformation = Some(Rc::new(
            |map: &mut HeaderMap, output: Option<&QuotaOutput>, rolled_back: bool| {
                if let Some(output) = output {
                    let remaining = if rolled_back {
                        (output.remaining + 1).min(output.limit)
                    } else {
                        output.remaining
                    };
                    insert_headers(map, output.limit, remaining, output.seconds_until_reset());
                }
            },
        ));
        self.denied_response = Rc::new(|output: &QuotaOutput| {
            let mut response = HttpResponse::TooManyRequests().finish();
            let seconds = output.seconds_until_reset();
            let map = response.headers_mut();
            insert_headers(map, output.limit, output.remaining, seconds);
            map.insert(RETRY_AFTER, HeaderValue::from(seconds));
            response
        });
        self
    }

    /// Edit the headers of a response that passed the limiter.
    ///
    /// Receives the window state, which is [None] when the backend failed open, and whether the
    /// request was rolled back. Pass [None] to leave responses untouched (the default).
    pub fn request_allowed_transformation<M>(mut self, transformation: Option<M>) -> Self
    where
        M: Fn(&mut HeaderMap, Option<&QuotaOutput>, bool) + 'static,
    {
        self.allowed_transformation =
            transformation.map(|m| Rc::new(m) as Rc<AllowedTransformation>);
        self
    }

    /// Build the response for an over-quota request, e.g. a JSON body telling the user to try
    /// again later. Defaults to an empty 429.
    pub fn request_denied_response<R>(mut self, denied_response: R) -> Self
    where
        R: Fn(&QuotaOutput) -> HttpResponse + 'static,
    {
        self.denied_response = Rc::new(denied_response);
        self
    }

    /// Refund the request when the wrapped service answers with a status matching `condition`.
    ///
    /// Only the window the request was counted in is refunded. Disabled by default.
    pub fn rollback_condition<C>(mut self, condition: Option<C>) -> Self
    where
        C: Fn(StatusCode) -> bool + 'static,
    {
        self.rollback_condition = condition.map(|c| Rc::new(c) as Rc<RollbackCondition>);
        self
    }

    /// Shorthand for a [RateLimiterBuilder::rollback_condition] refunding 5xx responses, so
    /// server faults don't use up a user's quota.
    pub fn rollback_server_errors(mut self) -> Self {
        self.rollback_condition = Some(Rc::new(|status: StatusCode| status.is_server_error()));
        self
    }

    pub fn build(self) -> RateLimiter<B, F> {
        RateLimiter {
            backend: self.backend,
            input_fn: Rc::new(self.input_fn),
            fail_open: self.fail_open,
            allowed_transformation: self.allowed_transformation,
            denied_response: self.denied_response,
            rollback_condition: self.rollback_condition,
        }
    }
}

fn insert_headers(map: &mut HeaderMap, limit: u64, remaining: u64, seconds_until_reset: u64) {
    map.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(limit));
    map.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(remaining));
    map.insert(
        X_RATELIMIT_RESET.clone(),
        HeaderValue::from(seconds_until_reset),
    );
}
