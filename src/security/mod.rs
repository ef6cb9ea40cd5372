pub mod decision;
pub mod engine;
pub mod middleware;
pub mod policy;

pub use decision::DecisionEngine;
pub use engine::LocalDecisionEngine;
pub use middleware::{security_middleware, SecurityState};
