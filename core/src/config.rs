use std::time::Duration;

/// Tunables for the event pipeline. The defaults match the behavior the
/// server-side team ships against; none of them are correctness-relevant.
#[derive(Debug, Clone)]
pub struct ChatStreamConfig {
    /// Delay between animated chunk commits. Produces the "typing" reveal
    /// decoupled from network arrival timing.
    pub animation_tick: Duration,

    /// Budget for one component/template resolution. A timed-out resolution
    /// abandons that single event; the queue continues.
    pub resolver_timeout: Duration,
}

impl ChatStreamConfig {
    pub fn with_animation_tick(mut self, tick: Duration) -> Self {
        self.animation_tick = tick;
        self
    }

    pub fn with_resolver_timeout(mut self, timeout: Duration) -> Self {
        self.resolver_timeout = timeout;
        self
    }
}

impl Default for ChatStreamConfig {
    fn default() -> Self {
        Self {
            animation_tick: Duration::from_millis(40),
            resolver_timeout: Duration::from_secs(10),
        }
    }
}
