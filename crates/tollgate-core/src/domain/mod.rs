//! Domain model (ids, resources, owners, claims).

pub mod claim;
pub mod ids;
pub mod owner;
pub mod resource;

pub use claim::{Claim, ClaimState, ClaimView};
pub use ids::{ClaimId, CoordinatorId, OwnerId, WorkerId};
pub use owner::{Owner, OwnerRef};
pub use resource::{ALL_RESOURCES, ResourceId};
