//! Services layer for invitation-service.
//!
//! Business logic for invitations, ability resolution and the security event
//! log, plus the storage and delivery backends they run on.

pub mod ability;
mod database;
pub mod error;
pub mod invitation;
mod jwt;
pub mod mailer;
mod memory;
pub mod metrics;
pub mod quota;
pub mod repository;
pub mod security_events;
pub mod token_store;

pub use ability::{AbilityPolicy, AccessContext, Action, RequestContext, Resource};
pub use database::Database;
pub use error::{InvitationError, TokenFailureReason};
pub use invitation::{AcceptedInvitation, InvitationPreview, InvitationService, InvitationSettings};
pub use jwt::{AccessTokenClaims, JwtService};
pub use mailer::{InvitationMailer, MockMailer, SmtpMailer};
pub use memory::MemoryDatabase;
pub use repository::{EventAudience, EventFilter, Repositories};
pub use security_events::{AlertThresholds, SecurityEventLog};
pub use token_store::{MemoryTokenStore, PendingTokenStore, RedisTokenStore};
