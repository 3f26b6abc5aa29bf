//! The conversational core: routing, facts, and explanation.

pub mod emergency;
pub mod explanation;
pub mod intent;
pub mod orchestrator;
pub mod synthesis;
pub mod tools;

pub use explanation::{ExplanationResult, validate_explanation};
pub use intent::{Classification, Intent, IntentClassifier, UnclearReason};
pub use orchestrator::{ChatOrchestrator, ChatReply, ConversationRequest};
pub use synthesis::{SynthesisOutcome, Synthesizer};
pub use tools::{ToolOutput, run_tool_for_intent};
