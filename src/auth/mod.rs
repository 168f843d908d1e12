mod identity;
mod permissions;

pub use identity::{WorkerIdentity, forbidden_api, unauthorized_api};
pub use permissions::{Permission, Role};
