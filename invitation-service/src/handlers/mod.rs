//! HTTP handlers for invitation-service.

pub mod acceptance;
pub mod invitation;
pub mod metrics;
pub mod security_events;
pub mod templates;

pub use acceptance::*;
pub use invitation::*;
pub use security_events::*;
pub use templates::*;
