//! Wrappers installed around the discovery service on the listening endpoint.
//! The outcome reporter is outermost so it also sees calls the lifecycle
//! layer rejects.

mod lifecycle;
mod outcome;

pub use lifecycle::ConnectionLifecycle;
pub use outcome::CallOutcome;
