use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::Error;
use log::{error, info, warn};
use std::future::{ready, Future, Ready};
use std::pin::Pin;
use std::rc::Rc;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Logs every request with a short id that is echoed back in `x-request-id`.
/// An id supplied by the caller is kept.
pub struct RequestLogger;

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequestLoggerMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggerMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: Rc<S>,
}

fn request_id(req: &ServiceRequest) -> String {
    req.headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 64)
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string()[..12].to_string())
}

impl<S, B> Service<ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + 'static>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let id = request_id(&req);
        let method = req.method().clone();
        let path = req.path().to_owned();
        let client_ip = req
            .connection_info()
            .realip_remote_addr()
            .map(|s| s.to_owned())
            .unwrap_or_else(|| String::from("unknown"));

        info!("[{}] → {} {} from {}", id, method, path, client_ip);

        let service = self.service.clone();

        Box::pin(async move {
            let start = std::time::Instant::now();
            let mut res = service.call(req).await?;
            let elapsed = start.elapsed();

            if let Ok(value) = HeaderValue::from_str(&id) {
                res.headers_mut().insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
            }

            let status = res.status();
            if status.is_success() || status.is_redirection() {
                info!("[{}] ← {} for {} {} in {:.2?}", id, status, method, path, elapsed);
            } else if status.is_client_error() {
                warn!("[{}] ← {} for {} {} in {:.2?}", id, status, method, path, elapsed);
            } else {
                error!("[{}] ← {} for {} {} in {:.2?}", id, status, method, path, elapsed);
            }

            Ok(res)
        })
    }
}
