//! Middleware binding a [`Registration`] to the HTTP pipeline.
//!
//! - [`WorkerMiddleware`]: hands every request to the active worker. It
//!   always answers, so it belongs at the end of the stack.
//! - [`PushIngressMiddleware`]: turns `POST`s on the push path into push and
//!   notification-click events.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::warn;

use super::Registration;
use crate::context::Context;
use crate::http::{Method, Response, StatusCode};
use crate::middleware::{Middleware, Next};
use crate::worker::{Notification, WorkerError};

/// Answers each request through [`Registration::fetch`].
///
/// A transport failure that the worker propagates (bypassed requests, or a
/// static request with no offline page) becomes `502 Bad Gateway`.
pub struct WorkerMiddleware {
    registration: Arc<Registration>,
}

impl WorkerMiddleware {
    pub fn new(registration: Arc<Registration>) -> Self {
        Self { registration }
    }
}

impl Middleware for WorkerMiddleware {
    fn handle(&self, ctx: Context, _next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let registration = self.registration.clone();
        Box::pin(async move {
            let request = ctx.into_request();
            match registration.fetch(&request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(uri = %request.uri(), error = %e, "upstream fetch failed");
                    Response::new(StatusCode::BAD_GATEWAY).body(format!("Bad Gateway: {e}"))
                }
            }
        })
    }
}

/// Receives push messages and notification clicks over HTTP.
///
/// | Request                     | Event                                          |
/// |-----------------------------|------------------------------------------------|
/// | `POST {path}`               | push; the body is the payload (may be empty)   |
/// | `POST {path}/click`         | click; the body is a JSON [`Notification`]     |
///
/// Push replies `204 No Content`; click replies `200` with the
/// [`ClickOutcome`](crate::worker::ClickOutcome) as JSON. Malformed bodies get
/// `400`. Every other request passes through.
pub struct PushIngressMiddleware {
    registration: Arc<Registration>,
    push_path: String,
    click_path: String,
}

impl PushIngressMiddleware {
    pub fn new(registration: Arc<Registration>, push_path: impl Into<String>) -> Self {
        let push_path = push_path.into().trim_end_matches('/').to_owned();
        let click_path = format!("{push_path}/click");
        Self {
            registration,
            push_path,
            click_path,
        }
    }
}

fn error_response(e: &WorkerError) -> Response {
    let status = match e {
        WorkerError::PushPayload(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Response::json(status, serde_json::json!({ "error": e.to_string() }).to_string())
}

impl Middleware for PushIngressMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let is_post = ctx.request().method() == &Method::Post;
        let path = ctx.request().path();
        let is_push = is_post && path == self.push_path;
        let is_click = is_post && path == self.click_path;
        let registration = self.registration.clone();

        Box::pin(async move {
            if is_push {
                let body = ctx.request().body_bytes().clone();
                return match registration.push(Some(&body[..])).await {
                    Ok(_) => Response::new(StatusCode::NO_CONTENT),
                    Err(e) => error_response(&e),
                };
            }

            if is_click {
                let notification: Notification = match ctx.json() {
                    Ok(n) => n,
                    Err(e) => return error_response(&WorkerError::PushPayload(e)),
                };
                return match registration.notification_click(&notification).await {
                    Ok(outcome) => match serde_json::to_string(&outcome) {
                        Ok(body) => Response::json(StatusCode::OK, body),
                        Err(e) => error_response(&WorkerError::PushPayload(e)),
                    },
                    Err(e) => error_response(&e),
                };
            }

            next.run(ctx).await
        })
    }
}
