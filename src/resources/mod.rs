//! Resource Kinds
//!
//! One [`StateProjector`](crate::domain::ports::StateProjector) per
//! supported remote resource kind.

pub mod identity_user;
pub mod instance;
pub mod internet_gateway;
pub mod volume;

pub use identity_user::IdentityUser;
pub use instance::Instance;
pub use internet_gateway::InternetGateway;
pub use volume::Volume;
