//! Claim - 1 回の `lock` 呼び出しを表す値

use serde::{Deserialize, Serialize};

use super::ids::{ClaimId, OwnerId};
use super::owner::{Owner, OwnerRef};
use super::resource::ResourceId;

/// Where a claim currently sits in the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimState {
    Waiting,
    Held,
}

/// An ownership claim on one resource. The owner is referenced weakly.
#[derive(Debug, Clone)]
pub struct Claim {
    id: ClaimId,
    resource: ResourceId,
    owner: OwnerRef,
}

impl Claim {
    pub fn new(resource: ResourceId, owner: &Owner) -> Self {
        Self {
            id: ClaimId::generate(),
            resource,
            owner: owner.downgrade(),
        }
    }

    pub fn id(&self) -> ClaimId {
        self.id
    }

    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    /// Id recorded at claim time, even if the owner is gone.
    pub fn owner_id(&self) -> OwnerId {
        self.owner.id()
    }

    /// Owner id while the owner is still reachable.
    pub fn live_owner(&self) -> Option<OwnerId> {
        self.owner.resolve()
    }

    pub fn is_abandoned(&self) -> bool {
        self.live_owner().is_none()
    }

    /// Same resource and same resolved owner. Claims of an unreachable owner
    /// are never the same as anything, themselves included.
    pub fn same_as(&self, other: &Claim) -> bool {
        if self.resource != other.resource {
            return false;
        }
        match (self.live_owner(), other.live_owner()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    pub fn view(&self, state: ClaimState) -> ClaimView {
        ClaimView {
            claim_id: self.id,
            resource: self.resource.clone(),
            owner_id: self.owner_id(),
            state,
            abandoned: self.is_abandoned(),
        }
    }
}

/// Serializable snapshot of a claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimView {
    pub claim_id: ClaimId,
    pub resource: ResourceId,
    pub owner_id: OwnerId,
    pub state: ClaimState,
    pub abandoned: bool,
}
