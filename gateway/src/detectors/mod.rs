//! Detector suite: flood/DoS, command injection, rule-based
//! intent firewall, feature extraction, ML-advisory intent inference, and
//! short-horizon trajectory shadowing. Each detector is independently
//! constructible and stateful per-gateway; `decision.rs` is the only
//! consumer that reads all of them together.

pub mod features;
pub mod flood;
pub mod injection;
pub mod intent_ml;
pub mod intent_rule;
pub mod shadow;

pub use features::FeatureExtractor;
pub use flood::FloodDetector;
pub use injection::InjectionDetector;
pub use intent_ml::IntentMlEngine;
pub use intent_rule::IntentFirewall;
pub use shadow::ShadowExecutor;
