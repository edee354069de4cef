//! Throttled, retrying request executor shared by both resolvers.
//!
//! One `RetryClient` owns the rate limiter for its resolver: consecutive
//! requests from the same instance are spaced at least `request_delay`
//! apart, regardless of which key they belong to.

use super::types::LookupError;
use rand::seq::SliceRandom;
use std::rc::Rc;
use std::time::{Duration, Instant};

// ─── Seams ──────────────────────────────────────────────────────

/// Outbound HTTP, reduced to the two calls the resolvers make.
pub trait Transport {
    fn get_json(
        &self,
        url: &str,
        query: &[(&str, &str)],
        user_agent: &str,
    ) -> Result<serde_json::Value, LookupError>;

    fn post_form_json(
        &self,
        url: &str,
        form: &[(&str, &str)],
        user_agent: &str,
    ) -> Result<serde_json::Value, LookupError>;
}

impl<T: Transport + ?Sized> Transport for Rc<T> {
    fn get_json(
        &self,
        url: &str,
        query: &[(&str, &str)],
        user_agent: &str,
    ) -> Result<serde_json::Value, LookupError> {
        (**self).get_json(url, query, user_agent)
    }

    fn post_form_json(
        &self,
        url: &str,
        form: &[(&str, &str)],
        user_agent: &str,
    ) -> Result<serde_json::Value, LookupError> {
        (**self).post_form_json(url, form, user_agent)
    }
}

/// Monotonic time source. All waiting goes through `sleep`.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

impl<C: Clock + ?Sized> Clock for Rc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

// ─── ureq transport ─────────────────────────────────────────────

/// Blocking HTTP via a shared `ureq::Agent`.
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn into_json(
        result: Result<ureq::Response, ureq::Error>,
    ) -> Result<serde_json::Value, LookupError> {
        let response = result.map_err(|e| match e {
            ureq::Error::Status(code, _) => LookupError::Status(code),
            ureq::Error::Transport(t) => LookupError::Network(t.to_string()),
        })?;
        response
            .into_json()
            .map_err(|e| LookupError::InvalidResponse(e.to_string()))
    }
}

impl Transport for UreqTransport {
    fn get_json(
        &self,
        url: &str,
        query: &[(&str, &str)],
        user_agent: &str,
    ) -> Result<serde_json::Value, LookupError> {
        let request = query
            .iter()
            .fold(self.agent.get(url), |req, (name, value)| req.query(name, value))
            .set("User-Agent", user_agent);
        Self::into_json(request.call())
    }

    fn post_form_json(
        &self,
        url: &str,
        form: &[(&str, &str)],
        user_agent: &str,
    ) -> Result<serde_json::Value, LookupError> {
        let request = self.agent.post(url).set("User-Agent", user_agent);
        Self::into_json(request.send_form(form))
    }
}

// ─── Retry policy ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Minimum spacing between requests; also the backoff base.
    pub request_delay: Duration,
    /// Total attempts per key, including the first.
    pub max_retries: u32,
    pub backoff_factor: f64,
}

impl RetryPolicy {
    /// Sleep after failed attempt `attempt` (1-based): `delay × factor^(attempt-1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.request_delay.mul_f64(self.backoff_factor.powi(exponent))
    }
}

/// How an endpoint is picked for each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSelection {
    /// Always the first endpoint.
    First,
    /// Uniformly random per attempt, to spread load across mirrors.
    Random,
}

// ─── Client ─────────────────────────────────────────────────────

pub struct RetryClient {
    transport: Box<dyn Transport>,
    clock: Box<dyn Clock>,
    policy: RetryPolicy,
    endpoints: Vec<String>,
    selection: EndpointSelection,
    user_agent: String,
    last_request: Option<Instant>,
}

impl RetryClient {
    pub fn new(
        transport: Box<dyn Transport>,
        clock: Box<dyn Clock>,
        policy: RetryPolicy,
        endpoints: Vec<String>,
        selection: EndpointSelection,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            clock,
            policy,
            endpoints,
            selection,
            user_agent: user_agent.into(),
            last_request: None,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Block until `request_delay` has passed since this instance's last request.
    fn respect_rate_limit(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = self.clock.now().saturating_duration_since(last);
            if elapsed < self.policy.request_delay {
                self.clock.sleep(self.policy.request_delay - elapsed);
            }
        }
        self.last_request = Some(self.clock.now());
    }

    fn pick_endpoint(&self) -> Option<&str> {
        match self.selection {
            EndpointSelection::First => self.endpoints.first(),
            EndpointSelection::Random => self.endpoints.choose(&mut rand::thread_rng()),
        }
        .map(String::as_str)
    }

    /// Run `attempt` up to `max_retries` times with rate limiting and
    /// exponential backoff. `None` means every attempt failed.
    pub fn execute<T, F>(&mut self, label: &str, mut attempt: F) -> Option<T>
    where
        F: FnMut(&dyn Transport, &str, &str) -> Result<T, LookupError>,
    {
        let max = self.policy.max_retries;
        for n in 1..=max {
            self.respect_rate_limit();
            let endpoint = match self.pick_endpoint() {
                Some(e) => e.to_string(),
                None => {
                    log::error!("No endpoint configured, cannot resolve {}", label);
                    return None;
                }
            };
            log::debug!("Requesting {} from {} (attempt {}/{})", label, endpoint, n, max);

            match attempt(self.transport.as_ref(), &endpoint, &self.user_agent) {
                Ok(value) => return Some(value),
                Err(e) if n < max => {
                    let backoff = self.policy.backoff(n);
                    log::info!(
                        "Retrying {} in {:.1}s after {} ({} attempts left)",
                        label,
                        backoff.as_secs_f64(),
                        e,
                        max - n,
                    );
                    self.clock.sleep(backoff);
                }
                Err(e) => {
                    log::warn!("Giving up on {} after {} attempts: {}", label, max, e);
                }
            }
        }
        None
    }
}
