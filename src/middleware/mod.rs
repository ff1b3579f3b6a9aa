//! Middleware pipeline: composable before/after request handler logic.
//!
//! Each middleware wraps the next layer, enabling request inspection,
//! short-circuit responses, and response decoration. The gateway is one such
//! stack: request logging, push ingress, then the cache worker, which always
//! answers and so ends the chain.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining middleware chain; call [`Next::run`] to
//!   advance to the next layer.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`Pipeline`]: an ordered, shareable stack of handlers.
//! - [`LoggerMiddleware`]: built-in request/response logger.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::{Response, StatusCode, context::Context};

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed on each call to [`run`](Self::run), so it cannot be called
/// more than once per middleware invocation.
///
/// # Examples
///
/// ```rust,no_run
/// use std::pin::Pin;
/// use swgate::{Response, context::Context, middleware::{Middleware, Next}};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(
///         &self,
///         ctx: Context,
///         next: Next,
///     ) -> Pin<Box<dyn std::future::Future<Output = Response> + Send>> {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

impl Next {
    /// Creates a new `Next` positioned at the start of the given middleware stack.
    pub fn new(middlewares: Arc<[MiddlewareHandler]>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain and returns its response.
    ///
    /// If the chain is exhausted without producing a response, a
    /// `500 Internal Server Error` is returned as a safe fallback.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = self.middlewares[self.index].clone();
            self.index += 1;
            handler(ctx, self).await
        } else {
            Response::new(StatusCode::INTERNAL_SERVER_ERROR)
                .body("No response generated by middleware pipeline")
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may:
///
/// - **Pass through**: call `next.run(ctx).await` without modification.
/// - **Short-circuit**: return a [`Response`] directly without calling `next`.
/// - **Decorate**: call `next.run(ctx).await`, inspect the response, and return
///   a modified copy.
///
/// Implementations **must** be `Send + Sync` because middleware is shared across
/// Tokio tasks, and **should not** hold locks across an `.await` point.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// An ordered middleware stack. Cloning is cheap; every clone shares the stack.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use swgate::middleware::{LoggerMiddleware, Pipeline};
///
/// let pipeline = Pipeline::new().layer(Arc::new(LoggerMiddleware));
/// assert_eq!(pipeline.len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct Pipeline {
    middlewares: Vec<MiddlewareHandler>,
    frozen: Option<Arc<[MiddlewareHandler]>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware to the end of the stack.
    #[must_use]
    pub fn layer<M>(mut self, middleware: Arc<M>) -> Self
    where
        M: Middleware + 'static,
    {
        self.middlewares.push(from_middleware(middleware));
        self.frozen = None;
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Runs `ctx` through the whole stack. The returned future does not borrow
    /// the pipeline, so it can be handed straight to [`Server::run`](crate::server::Server::run).
    pub fn handle(&self, ctx: Context) -> impl Future<Output = Response> + Send + use<> {
        let stack = match &self.frozen {
            Some(stack) => stack.clone(),
            None => Arc::from(self.middlewares.clone()),
        };
        Next::new(stack).run(ctx)
    }

    /// Freezes the stack so [`handle`](Self::handle) stops copying it per request.
    #[must_use]
    pub fn build(mut self) -> Self {
        self.frozen = Some(Arc::from(self.middlewares.clone()));
        self
    }
}

/// Logs each request's method, path, peer, status, and duration.
///
/// `LoggerMiddleware` does not short-circuit; it always delegates to the next
/// middleware and records timing after the fact.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_string();
            let uri = ctx.request().uri();
            let peer = ctx
                .peer()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_owned());

            let response = next.run(ctx).await;

            tracing::info!(
                %peer,
                status = response.status().as_u16(),
                elapsed = ?start.elapsed(),
                "{} {}",
                method,
                uri
            );

            response
        })
    }
}
