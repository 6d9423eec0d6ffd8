pub mod classifier;
pub mod rules;
pub mod transcript;

pub use classifier::classify;
pub use rules::RuleSet;
pub use transcript::{InboundPayload, InboundTranscript, normalize, parse_payload};
