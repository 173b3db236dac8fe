pub mod openai_compatible;
pub mod prompt;
pub mod rule_based;

pub use openai_compatible::OpenAiCompatibleOracle;
pub use prompt::{parse_recommendation, permission_rules};
pub use rule_based::RuleBasedOracle;
