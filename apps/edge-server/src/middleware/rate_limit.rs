//! Rate limiting middleware.
//!
//! Extracts identity material from the request, asks the decision
//! engine, and either forwards or rejects with 429. Rate-limit headers
//! are mirrored onto both outcomes; a session key minted during the
//! decision becomes a cookie on either path.

use actix_web::{
    Error, HttpResponse,
    body::EitherBody,
    cookie::Cookie,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::{HeaderMap, HeaderName, HeaderValue},
};
use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use flowgate_core::RateLimitError;
use flowgate_core::domain::{Decision, RequestMetadata};
use flowgate_core::handle::LimiterHandle;
use flowgate_shared::{ErrorResponse, HEADER_RETRY_AFTER, RateLimitHeaders, RejectionBody};

/// Cookie carrying the session identity key.
pub static SESSION_COOKIE: &str = "fg_session";
/// Explicit caller-supplied identifier; highest address precedence.
pub static CLIENT_ID_HEADER: &str = "X-Client-Id";

static FORWARDED_FOR: &str = "X-Forwarded-For";
static REAL_IP: &str = "X-Real-IP";

/// Rate limiting middleware factory.
pub struct RateLimitMiddleware {
    limiter: Arc<LimiterHandle>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<LimiterHandle>) -> Self {
        Self { limiter }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddlewareService {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
        }))
    }
}

pub struct RateLimitMiddlewareService<S> {
    service: Rc<S>,
    limiter: Arc<LimiterHandle>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        // The engine is resolved per request so a reconfigured handle
        // takes effect without restarting the worker.
        let engine = self.limiter.engine();
        let meta = extract_metadata(&req);

        Box::pin(async move {
            match engine.decide(&meta).await {
                Ok(decision) if decision.admitted => {
                    let headers = decision_headers(&decision);
                    let minted = decision.minted_session_key;
                    let mut res = service.call(req).await?;
                    apply_headers(res.headers_mut(), &headers);
                    if let Some(key) = minted {
                        let _ = res.response_mut().add_cookie(&session_cookie(&key));
                    }
                    Ok(res.map_into_left_body())
                }
                Ok(decision) => {
                    tracing::warn!(
                        dimension = decision.failed_dimension.map(|d| d.tag()),
                        "rate limit exceeded"
                    );

                    let mut builder = HttpResponse::TooManyRequests();
                    builder.insert_header((
                        HEADER_RETRY_AFTER,
                        decision.retry_after_secs().to_string(),
                    ));
                    if let Some(key) = &decision.minted_session_key {
                        builder.cookie(session_cookie(key));
                    }
                    let mut response = builder.json(RejectionBody::too_many_requests());
                    apply_headers(response.headers_mut(), &decision_headers(&decision));

                    let (http_req, _payload) = req.into_parts();
                    Ok(ServiceResponse::new(http_req, response).map_into_right_body())
                }
                Err(RateLimitError::MissingIdentity) => {
                    let response = HttpResponse::BadRequest()
                        .json(ErrorResponse::bad_request("request carries no identity"));
                    let (http_req, _payload) = req.into_parts();
                    Ok(ServiceResponse::new(http_req, response).map_into_right_body())
                }
                Err(err) => {
                    // Internal limiter errors must not become 5xx.
                    tracing::error!(error = %err, "rate limiter error, failing open");
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
            }
        })
    }
}

fn extract_metadata(req: &ServiceRequest) -> RequestMetadata {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let forwarded_for: Vec<String> = req
        .headers()
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .map(|list| list.split(',').map(|entry| entry.trim().to_string()).collect())
        .unwrap_or_default();

    RequestMetadata {
        client_id: header(CLIENT_ID_HEADER),
        forwarded_for,
        real_address: header(REAL_IP)
            .or_else(|| req.peer_addr().map(|addr| addr.ip().to_string())),
        session_key: req.cookie(SESSION_COOKIE).map(|c| c.value().to_string()),
    }
}

fn decision_headers(decision: &Decision) -> RateLimitHeaders {
    RateLimitHeaders {
        limit: decision.limit,
        remaining: decision.remaining,
        reset_epoch_secs: decision.reset_epoch_secs(),
    }
}

fn apply_headers(headers: &mut HeaderMap, values: &RateLimitHeaders) {
    for (name, value) in values.pairs() {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value))
        {
            headers.insert(name, value);
        }
    }
}

fn session_cookie(key: &str) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE, key.to_string())
        .path("/")
        .http_only(true)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, test, web};
    use flowgate_core::domain::LimiterSettings;
    use flowgate_core::engine::DecisionEngine;
    use flowgate_infra::MemoryWindowCounter;
    use flowgate_shared::{HEADER_LIMIT, HEADER_REMAINING};

    fn handle(limit: u32) -> Arc<LimiterHandle> {
        let settings = LimiterSettings {
            limit,
            ..Default::default()
        };
        let local = Arc::new(MemoryWindowCounter::new(settings.capacity));
        let engine = Arc::new(DecisionEngine::from_settings(&settings, local, None));
        Arc::new(LimiterHandle::new(settings, engine))
    }

    async fn pong() -> HttpResponse {
        HttpResponse::Ok().body("pong")
    }

    #[actix_web::test]
    async fn admitted_request_carries_headers_and_session_cookie() {
        let app = test::init_service(
            App::new()
                .wrap(RateLimitMiddleware::new(handle(5)))
                .route("/ping", web::get().to(pong)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/ping")
            .insert_header((FORWARDED_FOR, "203.0.113.4"))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert!(res.status().is_success());
        assert_eq!(res.headers().get(HEADER_LIMIT).unwrap(), "5");
        assert_eq!(res.headers().get(HEADER_REMAINING).unwrap(), "4");
        let cookie = res
            .response()
            .cookies()
            .find(|c| c.name() == SESSION_COOKIE);
        assert!(cookie.is_some(), "a minted session key must be set");
    }

    #[actix_web::test]
    async fn exhausted_address_returns_429_with_body_and_headers() {
        let app = test::init_service(
            App::new()
                .wrap(RateLimitMiddleware::new(handle(1)))
                .route("/ping", web::get().to(pong)),
        )
        .await;

        let admitted = test::TestRequest::get()
            .uri("/ping")
            .insert_header((FORWARDED_FOR, "203.0.113.4"))
            .to_request();
        assert!(test::call_service(&app, admitted).await.status().is_success());

        let rejected = test::TestRequest::get()
            .uri("/ping")
            .insert_header((FORWARDED_FOR, "203.0.113.4"))
            .to_request();
        let res = test::call_service(&app, rejected).await;

        assert_eq!(res.status(), actix_web::http::StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers().get(HEADER_REMAINING).unwrap(), "0");
        assert!(res.headers().get(HEADER_RETRY_AFTER).is_some());

        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["message"], "Too Many Requests");
    }

    #[actix_web::test]
    async fn existing_session_cookie_is_reused() {
        let app = test::init_service(
            App::new()
                .wrap(RateLimitMiddleware::new(handle(5)))
                .route("/ping", web::get().to(pong)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/ping")
            .insert_header((FORWARDED_FOR, "203.0.113.4"))
            .cookie(Cookie::new(SESSION_COOKIE, "existing-session"))
            .to_request();
        let res = test::call_service(&app, req).await;

        assert!(res.status().is_success());
        assert!(
            res.response()
                .cookies()
                .all(|c| c.name() != SESSION_COOKIE),
            "no new key may be minted when one exists"
        );
    }
}
