//! In-memory transport with scripted responses and a request log.
//!
//! Routes match on URL prefix, most recently registered first. Each route
//! plays its queued responses in order and then repeats its fallback. URLs
//! matching no route get `200 OK`.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use cdp_delivery::{
    transport::{BeaconTransport, HttpRequest, HttpResponse},
    DeliveryError,
};

/// One scripted reaction to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scripted {
    /// Answer with this HTTP status and an empty body.
    Status(u16),
    /// Fail before any response is received.
    NetworkError,
}

#[derive(Debug)]
struct Route {
    url_prefix: String,
    queue: VecDeque<Scripted>,
    fallback: Scripted,
}

#[derive(Debug, Default)]
struct State {
    routes: Vec<Route>,
    requests: Vec<HttpRequest>,
}

/// Transport double for deterministic delivery tests.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    state: Mutex<State>,
}

impl ScriptedTransport {
    /// Transport answering `200 OK` to everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `status` for URLs starting with `url_prefix`.
    pub fn respond(&self, url_prefix: impl Into<String>, status: u16) -> &Self {
        self.route(url_prefix.into(), Vec::new(), Scripted::Status(status))
    }

    /// Play `statuses` in order, then keep answering `then`.
    pub fn respond_sequence(
        &self,
        url_prefix: impl Into<String>,
        statuses: impl IntoIterator<Item = u16>,
        then: u16,
    ) -> &Self {
        let queue = statuses.into_iter().map(Scripted::Status).collect();
        self.route(url_prefix.into(), queue, Scripted::Status(then))
    }

    /// Always fail with a network error for URLs starting with `url_prefix`.
    pub fn fail_network(&self, url_prefix: impl Into<String>) -> &Self {
        self.route(url_prefix.into(), Vec::new(), Scripted::NetworkError)
    }

    fn route(&self, url_prefix: String, queue: Vec<Scripted>, fallback: Scripted) -> &Self {
        self.state().routes.push(Route { url_prefix, queue: queue.into(), fallback });
        self
    }

    /// Every request executed so far, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state().requests.clone()
    }

    /// Requests whose URL starts with `url_prefix`.
    pub fn requests_to(&self, url_prefix: &str) -> Vec<HttpRequest> {
        self.state()
            .requests
            .iter()
            .filter(|request| request.url.starts_with(url_prefix))
            .cloned()
            .collect()
    }

    /// Number of requests executed so far.
    pub fn request_count(&self) -> usize {
        self.state().requests.len()
    }

    /// Number of requests whose URL starts with `url_prefix`.
    pub fn count_to(&self, url_prefix: &str) -> usize {
        self.requests_to(url_prefix).len()
    }

    /// Forget recorded requests; routes are kept.
    pub fn clear_requests(&self) {
        self.state().requests.clear();
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_reaction(&self, request: HttpRequest) -> Scripted {
        let mut state = self.state();
        let reaction = state
            .routes
            .iter_mut()
            .rev()
            .find(|route| request.url.starts_with(&route.url_prefix))
            .map_or(Scripted::Status(200), |route| route.queue.pop_front().unwrap_or(route.fallback));
        state.requests.push(request);
        reaction
    }
}

#[async_trait]
impl BeaconTransport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> cdp_delivery::Result<HttpResponse> {
        let reaction = self.next_reaction(request);
        tokio::task::yield_now().await;

        match reaction {
            Scripted::Status(status) => Ok(HttpResponse::new(status, "")),
            Scripted::NetworkError => Err(DeliveryError::network("scripted network failure")),
        }
    }
}
