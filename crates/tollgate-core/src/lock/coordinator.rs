//! Lock coordinator: ownership-based mutual exclusion over named resources.
//!
//! Design:
//! - One mutex guards both the waiting list and the held list, so every
//!   grant/release decision is made in a single critical section.
//! - Each waiting claim carries a one-shot grant channel. Waking a waiter is
//!   sending on exactly that channel; dropping the sender is a cancellation.
//! - Claims reference owners weakly. Claims of unreachable owners are ignored
//!   by grant decisions and removed by the reaper.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info};

use super::reaper::Reaper;
use super::signal::{SignalBoard, Wakeup};
use crate::config::CoordinatorConfig;
use crate::domain::{
    ALL_RESOURCES, Claim, ClaimId, ClaimState, ClaimView, CoordinatorId, Owner, OwnerId,
    ResourceId,
};
use crate::error::LockError;
use crate::observability::LockCounts;
use crate::ports::{Clock, SystemClock};

thread_local! {
    /// Per-thread owners, one per coordinator. Dropped when the thread exits,
    /// or on the next `current_owner` call once their coordinator is gone.
    static CURRENT_OWNERS: RefCell<HashMap<CoordinatorId, ThreadOwner>> = RefCell::new(HashMap::new());
}

struct ThreadOwner {
    coordinator: Weak<LockShared>,
    owner: Owner,
}

struct Waiter {
    claim: Claim,
    grant: oneshot::Sender<()>,
}

enum Admission {
    Granted,
    Waiting {
        claim_id: ClaimId,
        resource: ResourceId,
        grant: oneshot::Receiver<()>,
    },
}

/// Waiting and held claims. Only ever touched under `LockShared::table`.
#[derive(Default)]
struct LockTable {
    /// Insertion order is wake-scan order.
    waiting: Vec<Waiter>,
    held: Vec<Claim>,
}

impl LockTable {
    /// A live owner other than `owner` holds a conflicting claim.
    fn blocked_by_other(&self, claim: &Claim, owner: OwnerId) -> bool {
        self.held.iter().any(|held| {
            held.resource().conflicts_with(claim.resource())
                && held.live_owner().is_some_and(|holder| holder != owner)
        })
    }

    fn held_by_same(&self, claim: &Claim, owner: OwnerId) -> bool {
        self.held.iter().any(|held| {
            held.resource().conflicts_with(claim.resource()) && held.live_owner() == Some(owner)
        })
    }

    fn global_claim_waiting(&self) -> bool {
        self.waiting
            .iter()
            .any(|w| w.claim.resource().is_all() && !w.claim.is_abandoned())
    }

    /// Re-acquisition of the same resource by the same owner does not stack.
    fn insert_held(&mut self, claim: Claim) {
        if !self.held.iter().any(|held| held.same_as(&claim)) {
            self.held.push(claim);
        }
    }

    fn admit(&mut self, claim: Claim) -> Result<Admission, LockError> {
        let Some(owner) = claim.live_owner() else {
            return Err(LockError::LeaseExpired {
                owner: claim.owner_id(),
            });
        };

        let must_wait = if self.blocked_by_other(&claim, owner) {
            true
        } else if self.held_by_same(&claim, owner) {
            debug!(resource = %claim.resource(), owner = %owner, "reentrant claim granted");
            false
        } else {
            // a pending global claim must not starve behind unrelated claims
            self.global_claim_waiting()
        };

        if !must_wait {
            debug!(resource = %claim.resource(), owner = %owner, "claim granted");
            self.insert_held(claim);
            return Ok(Admission::Granted);
        }

        debug!(resource = %claim.resource(), owner = %owner, "claim waiting");
        let (tx, rx) = oneshot::channel();
        let claim_id = claim.id();
        let resource = claim.resource().clone();
        self.waiting.push(Waiter { claim, grant: tx });
        Ok(Admission::Waiting {
            claim_id,
            resource,
            grant: rx,
        })
    }

    /// Grants waiters that are no longer blocked, in waiting-list order.
    ///
    /// A resource-specific release grants at most one waiter. A release of
    /// `ALL_RESOURCES` keeps scanning, but stops at a global waiter that is
    /// still blocked so later claims cannot overtake it.
    fn notify_waiting(&mut self, released: &ResourceId) -> usize {
        let mut granted = 0;
        let mut i = 0;
        while i < self.waiting.len() {
            let is_global = self.waiting[i].claim.resource().is_all();
            let Some(owner) = self.waiting[i].claim.live_owner() else {
                // left for the reaper
                i += 1;
                continue;
            };
            if self.blocked_by_other(&self.waiting[i].claim, owner) {
                if is_global {
                    break;
                }
                i += 1;
                continue;
            }

            let waiter = self.waiting.remove(i);
            if waiter.grant.send(()).is_err() {
                // the waiting future was dropped
                continue;
            }
            debug!(resource = %waiter.claim.resource(), owner = %owner, "waiting claim granted");
            self.insert_held(waiter.claim);
            granted += 1;
            if !released.is_all() {
                break;
            }
        }
        granted
    }

    fn release(&mut self, resource: &ResourceId, owner: OwnerId) -> bool {
        let before = self.held.len();
        self.held
            .retain(|held| !(held.resource() == resource && held.owner_id() == owner));
        self.held.len() != before
    }

    fn release_all(&mut self, owner: OwnerId) -> usize {
        let before = self.held.len();
        self.held
            .retain(|held| held.owner_id() != owner && !held.is_abandoned());
        before - self.held.len()
    }

    fn cancel_owner(&mut self, owner: OwnerId) -> usize {
        let before = self.waiting.len();
        self.waiting.retain(|w| w.claim.owner_id() != owner);
        before - self.waiting.len()
    }

    /// Withdraws a claim whose caller stopped waiting. Returns the resource to
    /// re-notify for, if anything changed.
    fn withdraw(&mut self, claim_id: ClaimId) -> Option<ResourceId> {
        if let Some(pos) = self.waiting.iter().position(|w| w.claim.id() == claim_id) {
            let waiter = self.waiting.remove(pos);
            return waiter.claim.resource().is_all().then_some(ALL_RESOURCES);
        }
        // granted concurrently with the drop: nobody will ever unlock it
        let pos = self.held.iter().position(|held| held.id() == claim_id)?;
        Some(self.held.remove(pos).resource().clone())
    }

    fn purge(&mut self, lost: &HashSet<OwnerId>) -> usize {
        let dead = |claim: &Claim| lost.contains(&claim.owner_id()) || claim.is_abandoned();
        let before = self.waiting.len() + self.held.len();
        self.waiting.retain(|w| !dead(&w.claim));
        self.held.retain(|held| !dead(held));
        before - (self.waiting.len() + self.held.len())
    }

    /// A held `ALL_RESOURCES` claim covers every resource; otherwise only a
    /// claim on the same resource does.
    fn is_locked(&self, resource: &ResourceId) -> bool {
        self.held.iter().any(|held| {
            (held.resource() == resource || held.resource().is_all()) && !held.is_abandoned()
        })
    }

    fn counts(&self) -> LockCounts {
        LockCounts {
            held: self.held.len(),
            waiting: self.waiting.len(),
        }
    }

    fn views(&self) -> Vec<ClaimView> {
        self.held
            .iter()
            .map(|c| c.view(ClaimState::Held))
            .chain(self.waiting.iter().map(|w| w.claim.view(ClaimState::Waiting)))
            .collect()
    }
}

/// State shared between the coordinator handle and its reaper thread.
pub(crate) struct LockShared {
    table: Mutex<LockTable>,
    /// Ids of owners whose last handle was dropped.
    lost: Mutex<Receiver<OwnerId>>,
    signals: SignalBoard,
}

impl LockShared {
    fn admit(&self, claim: Claim) -> Result<Admission, LockError> {
        self.table.lock().unwrap().admit(claim)
    }

    fn withdraw(&self, claim_id: ClaimId) {
        let mut table = self.table.lock().unwrap();
        if let Some(resource) = table.withdraw(claim_id) {
            table.notify_waiting(&resource);
        }
    }

    /// One reaper pass. Returns the number of claims purged.
    pub(crate) fn reap(&self) -> usize {
        let lost: HashSet<OwnerId> = self.lost.lock().unwrap().try_iter().collect();
        let mut table = self.table.lock().unwrap();
        let purged = table.purge(&lost);
        if purged > 0 {
            let granted = table.notify_waiting(&ALL_RESOURCES);
            info!(purged, granted, "reaped claims of unreachable owners");
        }
        purged
    }
}

/// Disarms on completion; otherwise withdraws the claim when the waiting
/// future is dropped.
struct PendingClaim<'a> {
    shared: &'a LockShared,
    claim_id: ClaimId,
    armed: bool,
}

impl Drop for PendingClaim<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.withdraw(self.claim_id);
        }
    }
}

/// Coordinates exclusive access to named resources between owners.
///
/// # 使用例
/// ```ignore
/// let coordinator = LockCoordinator::new(CoordinatorConfig::default())?;
/// let owner = coordinator.owner("upload");
/// let doc = ResourceId::named("doc1")?;
/// coordinator.lock(doc.clone(), &owner)?;
/// // ... touch shared state ...
/// coordinator.unlock(&doc, &owner);
/// ```
pub struct LockCoordinator {
    id: CoordinatorId,
    shared: Arc<LockShared>,
    clock: Arc<dyn Clock>,
    lost_tx: Sender<OwnerId>,
    _reaper: Reaper,
}

impl LockCoordinator {
    pub fn new(config: CoordinatorConfig) -> Result<Self, LockError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Coordinator whose owner leases are measured with `clock`.
    pub fn with_clock(config: CoordinatorConfig, clock: Arc<dyn Clock>) -> Result<Self, LockError> {
        config.validate()?;
        let (lost_tx, lost_rx) = mpsc::channel();
        let shared = Arc::new(LockShared {
            table: Mutex::new(LockTable::default()),
            lost: Mutex::new(lost_rx),
            signals: SignalBoard::default(),
        });
        let reaper = Reaper::spawn(Arc::clone(&shared), config.reaper_interval)?;
        Ok(Self {
            id: CoordinatorId::generate(),
            shared,
            clock,
            lost_tx,
            _reaper: reaper,
        })
    }

    pub fn id(&self) -> CoordinatorId {
        self.id
    }

    /// New owner. Its claims are abandoned once every clone is dropped.
    pub fn owner(&self, label: impl Into<String>) -> Owner {
        Owner::new(label, self.lost_tx.clone())
    }

    /// New owner that must `renew()` at least every `ttl`.
    pub fn leased_owner(&self, label: impl Into<String>, ttl: Duration) -> Result<Owner, LockError> {
        if ttl.is_zero() {
            return Err(LockError::InvalidLease("ttl must be greater than zero".to_string()));
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| LockError::InvalidLease(format!("ttl out of range: {e}")))?;
        Ok(Owner::leased(label, ttl, Arc::clone(&self.clock), self.lost_tx.clone()))
    }

    /// The calling thread's owner for this coordinator.
    pub fn current_owner(&self) -> Owner {
        CURRENT_OWNERS.with(|owners| {
            let mut owners = owners.borrow_mut();
            owners.retain(|_, entry| entry.coordinator.strong_count() > 0);
            owners
                .entry(self.id)
                .or_insert_with(|| {
                    let thread = std::thread::current();
                    let label = thread
                        .name()
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("{:?}", thread.id()));
                    ThreadOwner {
                        coordinator: Arc::downgrade(&self.shared),
                        owner: Owner::new(label, self.lost_tx.clone()),
                    }
                })
                .owner
                .clone()
        })
    }

    /// Blocks until `owner` is granted a claim on `resource`.
    ///
    /// Returns `WaitCancelled` if the wait is cancelled (see
    /// [`cancel_waits`](Self::cancel_waits)) or the owner is reaped while
    /// waiting; no claim is held in that case.
    ///
    /// Blocks the OS thread. Do not call from an async context; use
    /// [`lock_async`](Self::lock_async) there.
    pub fn lock(&self, resource: ResourceId, owner: &Owner) -> Result<(), LockError> {
        match self.shared.admit(Claim::new(resource, owner))? {
            Admission::Granted => Ok(()),
            Admission::Waiting {
                resource, grant, ..
            } => grant
                .blocking_recv()
                .map_err(|_| LockError::WaitCancelled { resource }),
        }
    }

    /// Async form of [`lock`](Self::lock). Dropping the future while it waits
    /// withdraws the claim.
    pub async fn lock_async(&self, resource: ResourceId, owner: &Owner) -> Result<(), LockError> {
        match self.shared.admit(Claim::new(resource, owner))? {
            Admission::Granted => Ok(()),
            Admission::Waiting {
                claim_id,
                resource,
                grant,
            } => {
                let mut pending = PendingClaim {
                    shared: &self.shared,
                    claim_id,
                    armed: true,
                };
                let result = grant.await;
                pending.armed = false;
                result.map_err(|_| LockError::WaitCancelled { resource })
            }
        }
    }

    /// Releases `owner`'s claim on `resource`. No-op if it holds none.
    pub fn unlock(&self, resource: &ResourceId, owner: &Owner) {
        let mut table = self.shared.table.lock().unwrap();
        if table.release(resource, owner.id()) {
            debug!(resource = %resource, owner = %owner.id(), "claim released");
        }
        table.notify_waiting(resource);
    }

    /// Releases every claim of `owner`, and any claim left by an unreachable
    /// owner.
    pub fn unlock_all(&self, owner: &Owner) {
        let mut table = self.shared.table.lock().unwrap();
        let released = table.release_all(owner.id());
        debug!(owner = %owner.id(), released, "all claims released");
        table.notify_waiting(&ALL_RESOURCES);
    }

    pub fn lock_current(&self, resource: ResourceId) -> Result<(), LockError> {
        self.lock(resource, &self.current_owner())
    }

    pub fn unlock_current(&self, resource: &ResourceId) {
        self.unlock(resource, &self.current_owner())
    }

    /// Whether a live owner holds `resource` or `ALL_RESOURCES`.
    pub fn is_locked(&self, resource: &ResourceId) -> bool {
        self.shared.table.lock().unwrap().is_locked(resource)
    }

    /// Cancels every pending wait of `owner`; each blocked `lock` returns
    /// `WaitCancelled`. Returns how many waits were cancelled.
    pub fn cancel_waits(&self, owner: &Owner) -> usize {
        let mut table = self.shared.table.lock().unwrap();
        let cancelled = table.cancel_owner(owner.id());
        if cancelled > 0 {
            debug!(owner = %owner.id(), cancelled, "waits cancelled");
            table.notify_waiting(&ALL_RESOURCES);
        }
        cancelled
    }

    /// Runs a reaper pass now instead of waiting for the next interval.
    pub fn reap(&self) -> usize {
        self.shared.reap()
    }

    pub fn counts(&self) -> LockCounts {
        self.shared.table.lock().unwrap().counts()
    }

    /// Held claims first, then waiting claims in wake-scan order.
    pub fn claims(&self) -> Vec<ClaimView> {
        self.shared.table.lock().unwrap().views()
    }

    /// Raises the completion signal for `resource`.
    pub fn signal(&self, resource: &ResourceId) {
        debug!(resource = %resource, "signal raised");
        self.shared.signals.signal(resource);
    }

    /// Waits for (and consumes) the completion signal for `resource`.
    pub fn wait_signal(&self, resource: &ResourceId, timeout: Option<Duration>) -> Wakeup {
        self.shared.signals.wait(resource, timeout)
    }
}

impl Drop for LockCoordinator {
    fn drop(&mut self) {
        // other threads prune their entry lazily in `current_owner`
        let _ = CURRENT_OWNERS.try_with(|owners| owners.borrow_mut().remove(&self.id));
    }
}
