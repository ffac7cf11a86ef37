//! Small shared helpers.

/// Fire-once latch for capability warnings.
///
/// A system that meets a feature it cannot honor warns on first contact
/// and stays quiet afterwards, instead of spamming the log every tick.
#[derive(Debug, Default)]
pub struct WarnOnce {
    fired: bool,
}

impl WarnOnce {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` exactly once.
    pub fn once(&mut self) -> bool {
        !std::mem::replace(&mut self.fired, true)
    }
}

/// Explicit randomness context, threaded from configuration to consumers.
///
/// There is deliberately no process-global seed: anything needing
/// determinism derives a stream from this context by name, so two
/// consumers never share (or race on) one generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedContext {
    seed: u64,
}

impl SeedContext {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Derive a per-consumer seed by mixing the consumer name in with the
    /// FNV-1a hash, the same stable hash used for component type IDs.
    #[must_use]
    pub fn stream(&self, consumer: &str) -> u64 {
        self.seed ^ sim_ecm::ComponentTypeId::from_name(consumer).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_streams_are_stable_and_distinct() {
        let ctx = SeedContext::new(42);
        assert_eq!(ctx.stream("physics"), ctx.stream("physics"));
        assert_ne!(ctx.stream("physics"), ctx.stream("sensors"));
    }

    #[test]
    fn test_warn_once_fires_once() {
        let mut warn = WarnOnce::new();
        assert!(warn.once());
        assert!(!warn.once());
        assert!(!warn.once());
    }
}
