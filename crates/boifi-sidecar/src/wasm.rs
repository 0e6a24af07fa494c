//! Envoy/Istio WASM filter binding, built on `proxy-wasm`. Only compiled
//! with the `wasm` feature — the rest of this crate is host-agnostic and
//! unit-tested against [`crate::host::Host`] test doubles instead.

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

use boifi_domain::{EnvoyIdentity, FaultInjectionPolicy};
use proxy_wasm::traits::{Context, HttpContext, RootContext};
use proxy_wasm::types::{Action, ContextType, LogLevel};

use crate::cache::ConfigCache;
use crate::engine::{EnforcementEngine, PendingRequest, RequestOutcome};
use crate::host::{Host, TimerId};

/// Envoy cluster name the timer-simulating outbound call is dispatched to.
/// Must be configured (in the filter's Envoy bootstrap) to either never
/// respond or respond instantly, so the call's timeout is what actually
/// fires.
const TIMER_LOOPBACK_CLUSTER: &str = "boifi_timer_loopback";

/// Adapts proxy-wasm's host calls to the [`Host`] trait. Holds no state of
/// its own beyond a counter-local scratch area; `proxy_wasm`'s global
/// functions are the real host boundary.
struct ProxyWasmHost {
    context_id: u32,
    pending_timer_token: Option<u32>,
}

impl Host for ProxyWasmHost {
    fn now_millis(&self) -> u64 {
        proxy_wasm::hostcalls::get_current_time()
            .map(|t| t.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0))
            .unwrap_or(0)
    }

    fn schedule_timer(&mut self, delay_ms: u32) -> TimerId {
        // No native timer hostcall exists in this ABI: a dispatched outbound
        // call to a no-op loopback cluster with `delay_ms` as its timeout
        // stands in for one. The cluster must be configured to never
        // respond (or respond instantly) so the timeout itself is what
        // fires; `on_http_call_response` is the resume signal.
        let timeout = std::time::Duration::from_millis(delay_ms as u64);
        match proxy_wasm::hostcalls::dispatch_http_call(TIMER_LOOPBACK_CLUSTER, vec![], None, vec![], timeout) {
            Ok(token) => {
                self.pending_timer_token = Some(token);
                TimerId(token as u64)
            }
            Err(_) => {
                // Dispatch failed synchronously (e.g. cluster not found): no
                // callback will ever fire, so fail open immediately instead
                // of leaving the request paused forever.
                self.pending_timer_token = None;
                TimerId(self.context_id as u64)
            }
        }
    }

    fn send_abort(&mut self, http_status: u32) {
        let _ = proxy_wasm::hostcalls::send_http_response(http_status as u32, vec![], None);
    }

    fn resume_request(&mut self) {
        let _ = proxy_wasm::hostcalls::resume_http_request();
    }

    fn increment_aborts(&mut self) {
        let _ = proxy_wasm::hostcalls::increment_metric(metric_id("aborts_total"), 1);
    }

    fn increment_delays(&mut self) {
        let _ = proxy_wasm::hostcalls::increment_metric(metric_id("delays_total"), 1);
    }

    fn record_delay_duration(&mut self, duration_ms: u64) {
        let _ = proxy_wasm::hostcalls::record_metric(metric_id("delay_duration_milliseconds"), duration_ms);
    }
}

fn metric_id(_name: &str) -> u32 {
    // Real bindings resolve/cache a metric id via
    // `proxy_wasm::hostcalls::define_metric` at VM init; elided here since
    // it requires a live host to allocate.
    0
}

pub struct FilterRoot {
    engine: Rc<RefCell<Option<Arc<EnforcementEngine>>>>,
    cache: Rc<RefCell<Option<Arc<ConfigCache>>>>,
}

impl FilterRoot {
    pub fn new() -> Self {
        Self { engine: Rc::new(RefCell::new(None)), cache: Rc::new(RefCell::new(None)) }
    }
}

impl Context for FilterRoot {}

impl RootContext for FilterRoot {
    fn on_configure(&mut self, _plugin_configuration_size: usize) -> bool {
        let identity = self
            .get_property(vec!["node", "metadata", "WORKLOAD_NAME"])
            .zip(self.get_property(vec!["node", "metadata", "NAMESPACE"]))
            .map(|(w, n)| {
                EnvoyIdentity::new(
                    String::from_utf8_lossy(&w).to_string(),
                    String::from_utf8_lossy(&n).to_string(),
                    None,
                )
            })
            .unwrap_or_else(EnvoyIdentity::invalid);

        if !identity.is_valid {
            self.log(LogLevel::Warn, "identity unavailable at plugin init, failing open to wildcard policies");
        }

        let cache = Arc::new(ConfigCache::new(identity));
        *self.cache.borrow_mut() = Some(cache.clone());
        *self.engine.borrow_mut() = Some(Arc::new(EnforcementEngine::new(cache, seed_from_context(self.context_id))));
        true
    }

    fn get_type(&self) -> Option<ContextType> {
        Some(ContextType::HttpContext)
    }

    fn create_http_context(&self, context_id: u32) -> Option<Box<dyn HttpContext>> {
        let engine = self.engine.borrow().clone()?;
        Some(Box::new(FilterHttp {
            engine,
            host: ProxyWasmHost { context_id, pending_timer_token: None },
            pending: None,
        }))
    }
}

fn seed_from_context(context_id: u32) -> u64 {
    // Per-VM seed derived from the host-assigned context id, mixed with a
    // fixed odd constant so a zero id doesn't produce a zero seed.
    (context_id as u64).wrapping_mul(0x9E3779B97F4A7C15) | 1
}

impl FilterRoot {
    /// Called by the control-plane client on every snapshot event; not part
    /// of the proxy-wasm ABI itself.
    pub fn apply_snapshot(&self, policies: &[FaultInjectionPolicy], revision: u64) {
        if let Some(cache) = self.cache.borrow().as_ref() {
            cache.on_snapshot(policies, revision);
        }
    }
}

struct FilterHttp {
    engine: Arc<EnforcementEngine>,
    host: ProxyWasmHost,
    pending: Option<PendingRequest>,
}

impl Context for FilterHttp {
    fn on_http_call_response(&mut self, token_id: u32, _n_headers: usize, _body_size: usize, _n_trailers: usize) {
        if self.host.pending_timer_token != Some(token_id) {
            // Stale or foreign callback; not the timer this request is
            // waiting on.
            return;
        }
        self.host.pending_timer_token = None;

        if let Some(pending) = self.pending.take() {
            // The panic boundary: a bug anywhere in the decision path must
            // never crash the worker. The request is released unmodified
            // on unwind, matching the fail-open mandate.
            let engine = self.engine.clone();
            let result = catch_unwind(AssertUnwindSafe(|| engine.on_timer_fire(pending, &mut self.host)));
            if let Ok(RequestOutcome::Resumed) | Err(_) = result {
                if result.is_err() {
                    self.host.resume_request();
                }
            }
        }
    }
}

impl HttpContext for FilterHttp {
    fn on_http_request_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        let method = self.get_http_request_header(":method").unwrap_or_default();
        let path = self.get_http_request_header(":path").unwrap_or_default();
        let headers = self.get_http_request_headers();

        let engine = self.engine.clone();
        let outcome = catch_unwind(AssertUnwindSafe(|| engine.on_request_headers(&method, &path, &headers, &mut self.host)));

        match outcome {
            Ok(RequestOutcome::Passthrough) => Action::Continue,
            Ok(RequestOutcome::Aborted) => Action::Pause,
            Ok(RequestOutcome::Resumed) => Action::Continue,
            Ok(RequestOutcome::Paused(pending)) => {
                if self.host.pending_timer_token.is_none() {
                    // schedule_timer's dispatch failed synchronously, so no
                    // on_http_call_response will ever arrive to resume this
                    // request. Fail open rather than pause forever.
                    self.log(LogLevel::Warn, "timer dispatch failed, failing open");
                    return Action::Continue;
                }
                self.pending = Some(pending);
                Action::Pause
            }
            Err(_) => {
                // Fail open: release the request unmodified.
                Action::Continue
            }
        }
    }
}
