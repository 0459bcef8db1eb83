//! The framework adapter contract: the seam between this crate's evaluator
//! and lifecycle controller and whatever HTTP framework a host embeds them
//! in (axum, in the teacher's own server). This crate defines the trait and
//! ships an in-memory test double; no web framework is ever a dependency
//! here, matching the host-owned-adapter boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::context::{RequestData, RequestValue};
use crate::lifecycle::RenderContext;

/// Translates a host framework's request/response/router types into the
/// shapes this crate's lifecycle controller understands, and back.
///
/// Implementors own exactly one concrete `Request`/`Response`/`Router` triple
/// (e.g. axum's `http::Request`/`axum::response::Response`/`axum::Router`);
/// this crate never names a framework type directly.
#[async_trait]
pub trait FrameworkAdapter: Send + Sync {
    /// The host framework's inbound request type.
    type Request: Send + Sync;
    /// The host framework's outbound response type.
    type Response: Send + Sync;
    /// The host framework's router type, composable via `mount_router`.
    type Router: Send + Sync;

    /// Extract method/path/post/query/params/session/state out of a
    /// framework request into the engine's own `RequestData`.
    async fn to_step_request(&self, request: &Self::Request) -> RequestData;

    /// Turn a render context into a framework response (a templated page,
    /// typically).
    async fn render(&self, render_context: RenderContext, request: &Self::Request) -> Self::Response;

    /// Build a redirect response to `url`.
    fn redirect(&self, url: &str) -> Self::Response;

    /// Build an HTTP error response for a lifecycle-raised error outcome.
    fn error_response(&self, status: Option<u64>, message: Option<String>) -> Self::Response;

    /// The base URL a request was received on, for building absolute
    /// redirect targets.
    fn base_url(&self, request: &Self::Request) -> String;

    /// An empty router the host mounts step routes onto.
    fn create_router(&self) -> Self::Router;

    /// Nest `child` under `path` within `parent`.
    fn mount_router(&self, parent: Self::Router, path: &str, child: Self::Router) -> Self::Router;

    /// Register a GET route.
    fn get(&self, router: Self::Router, path: &str, handler: RouteHandler<Self>) -> Self::Router;

    /// Register a POST route.
    fn post(&self, router: Self::Router, path: &str, handler: RouteHandler<Self>) -> Self::Router;
}

/// A boxed per-route handler: takes the framework's own request type,
/// returns its own response type. Kept generic over the adapter so a router
/// builder can hold a homogeneous collection of routes for one adapter.
pub type RouteHandler<A> = Arc<
    dyn Fn(<A as FrameworkAdapter>::Request) -> std::pin::Pin<Box<dyn std::future::Future<Output = <A as FrameworkAdapter>::Response> + Send>>
        + Send
        + Sync,
>;

/// An in-memory response, exercised by this crate's own integration tests
/// and usable by a downstream consumer's unit tests without standing up a
/// real HTTP server.
#[derive(Debug, Clone)]
pub enum InMemoryResponse {
    /// A rendered step.
    Rendered(RenderContext),
    /// A redirect to another path.
    Redirect(String),
    /// An HTTP error.
    Error {
        /// Status code, if the originating transition specified one.
        status: Option<u64>,
        /// Message, if the originating transition specified one.
        message: Option<String>,
    },
}

/// A registered in-memory route: method, path, and the handler that
/// produces an `InMemoryResponse` from an `InMemoryRequest`.
#[derive(Clone)]
struct InMemoryRoute {
    method: &'static str,
    path: String,
    handler: RouteHandler<InMemoryAdapter>,
}

/// A router as a flat, ordered list of routes, since the in-memory adapter
/// has no real dispatch tree to build.
#[derive(Clone, Default)]
pub struct InMemoryRouter {
    routes: Vec<InMemoryRoute>,
}

/// The test-double framework adapter: `Request`/`Response` are plain,
/// dependency-free shapes a test builds by hand and inspects directly,
/// rather than going through an HTTP client.
#[derive(Debug, Default)]
pub struct InMemoryAdapter {
    base_url: Mutex<String>,
}

impl InMemoryAdapter {
    /// Build an adapter that reports `base_url` from `base_url(..)`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: Mutex::new(base_url.into()),
        }
    }

    /// Find and run the first route matching `request.method`/`request.path`,
    /// mirroring a real router's dispatch. Returns `None` if nothing matches.
    pub async fn dispatch(&self, router: &InMemoryRouter, request: RequestData) -> Option<InMemoryResponse> {
        let route = router
            .routes
            .iter()
            .find(|route| route.method.eq_ignore_ascii_case(&request.method) && route.path == request.path)?
            .clone();
        Some((route.handler)(request).await)
    }
}

#[async_trait]
impl FrameworkAdapter for InMemoryAdapter {
    type Request = RequestData;
    type Response = InMemoryResponse;
    type Router = InMemoryRouter;

    async fn to_step_request(&self, request: &Self::Request) -> RequestData {
        request.clone()
    }

    async fn render(&self, render_context: RenderContext, _request: &Self::Request) -> Self::Response {
        InMemoryResponse::Rendered(render_context)
    }

    fn redirect(&self, url: &str) -> Self::Response {
        InMemoryResponse::Redirect(url.to_string())
    }

    fn error_response(&self, status: Option<u64>, message: Option<String>) -> Self::Response {
        InMemoryResponse::Error { status, message }
    }

    fn base_url(&self, _request: &Self::Request) -> String {
        self.base_url.lock().unwrap_or_else(|poison| poison.into_inner()).clone()
    }

    fn create_router(&self) -> Self::Router {
        InMemoryRouter::default()
    }

    fn mount_router(&self, mut parent: Self::Router, path: &str, child: Self::Router) -> Self::Router {
        for mut route in child.routes {
            route.path = format!("{}{}", path.trim_end_matches('/'), route.path);
            parent.routes.push(route);
        }
        parent
    }

    fn get(&self, mut router: Self::Router, path: &str, handler: RouteHandler<Self>) -> Self::Router {
        router.routes.push(InMemoryRoute {
            method: "GET",
            path: path.to_string(),
            handler,
        });
        router
    }

    fn post(&self, mut router: Self::Router, path: &str, handler: RouteHandler<Self>) -> Self::Router {
        router.routes.push(InMemoryRoute {
            method: "POST",
            path: path.to_string(),
            handler,
        });
        router
    }
}

/// Build a `RequestData` for tests without a real framework request type:
/// a single-valued POST map is the common case exercised by submission
/// tests.
#[must_use]
pub fn request_with_post(method: &str, path: &str, post: HashMap<String, String>) -> RequestData {
    RequestData {
        method: method.to_string(),
        path: path.to_string(),
        post: post.into_iter().map(|(key, value)| (key, RequestValue::Single(value))).collect(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;

    /// Box and type-erase a test handler closure into the `RouteHandler`
    /// shape the trait expects, since a bare closure's `Box::pin(async {..})`
    /// return type does not coerce to `Pin<Box<dyn Future<...>>>` on its own.
    fn handler(
        respond: impl Fn(RequestData) -> InMemoryResponse + Send + Sync + 'static,
    ) -> RouteHandler<InMemoryAdapter> {
        Arc::new(move |request| {
            let response = respond(request);
            Box::pin(async move { response }) as Pin<Box<dyn Future<Output = InMemoryResponse> + Send>>
        })
    }

    #[tokio::test]
    async fn dispatch_runs_the_matching_route() {
        let adapter = InMemoryAdapter::new("https://example.test");
        let router = adapter.create_router();
        let router = adapter.get(router, "/apply/name", handler(|_req| InMemoryResponse::Redirect("/apply/done".to_string())));

        let request = request_with_post("GET", "/apply/name", HashMap::new());
        let response = adapter.dispatch(&router, request).await.unwrap();
        match response {
            InMemoryResponse::Redirect(url) => assert_eq!(url, "/apply/done"),
            other => panic!("expected a redirect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_returns_none_for_an_unregistered_path() {
        let adapter = InMemoryAdapter::new("https://example.test");
        let router = adapter.create_router();
        let request = request_with_post("GET", "/missing", HashMap::new());
        assert!(adapter.dispatch(&router, request).await.is_none());
    }

    #[test]
    fn mount_router_prefixes_child_paths() {
        let adapter = InMemoryAdapter::new("https://example.test");
        let child = adapter.get(
            adapter.create_router(),
            "/name",
            handler(|_req| InMemoryResponse::Redirect("/done".to_string())),
        );
        let parent = adapter.mount_router(adapter.create_router(), "/apply", child);
        assert_eq!(parent.routes[0].path, "/apply/name");
    }
}
