pub mod institution;
pub mod invitation;
pub mod security_event;
pub mod template;
pub mod user;

pub use institution::{Institution, InstitutionGrant, InstitutionRole, InstitutionSummary};
pub use invitation::{Invitation, InvitationResponse, InvitationStatus};
pub use security_event::{SecurityEvent, SecurityEventType};
pub use template::{Submission, Template};
pub use user::User;
