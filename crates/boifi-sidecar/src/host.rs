/// Opaque per-request timer handle. At-most-once fire, host-assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// The cooperative host ABI boundary the enforcement engine runs inside
/// (proxy-wasm/Envoy in production). Abstracted so the engine's decision
/// logic is testable without a real sandbox, and so any equivalent host
/// timer primitive can stand in.
///
/// `now_millis` must come from the host's monotonic clock accessor — never
/// the standard library's wall-clock primitives, which are unavailable (or
/// silently wrong) inside the sandbox.
pub trait Host {
    fn now_millis(&self) -> u64;

    /// Schedule a one-shot timer; the host calls back into the engine's
    /// `on_timer` exactly once, after at least `delay_ms` have elapsed.
    fn schedule_timer(&mut self, delay_ms: u32) -> TimerId;

    /// Synthesize and send an immediate response, ending the filter chain.
    fn send_abort(&mut self, http_status: u32);

    /// Resume a request parked at `PENDING_START_DELAY`/`PENDING_DELAY`.
    /// Must be at-most-once per request.
    fn resume_request(&mut self);

    fn increment_aborts(&mut self);
    fn increment_delays(&mut self);
    fn record_delay_duration(&mut self, duration_ms: u64);
}
