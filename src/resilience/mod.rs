//! Failure isolation for calls to external dependencies.

pub mod circuit_breaker;
pub mod timeout;

pub use circuit_breaker::{
    BreakerConfig, CircuitBreaker, CircuitState, Clock, ManualClock, SystemClock,
};
pub use timeout::{CallError, CallRunner, DEFAULT_MAX_WORKERS};

/// Breaker key for the intent classification call
pub const LLM_CLASSIFY_KEY: &str = "llm_classify";
/// Breaker key for the explanation synthesis call
pub const LLM_SYNTHESIZE_KEY: &str = "llm_synthesize";
