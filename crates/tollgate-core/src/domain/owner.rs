//! Owner - ロックの所有者
//!
//! # 学習ポイント
//! - `Arc` / `Weak` による「生存を延ばさない参照」
//! - `Drop` で「到達不能になった」ことを通知する
//! - lease（期限付き生存宣言）による所有者の死活判定
//!
//! Claim は `OwnerRef`（`Weak`）しか持ちません。`Owner` の clone がすべて drop
//! されると、その所有者は到達不能になり、Reaper が claim を回収します。

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, Weak};

use super::ids::OwnerId;
use crate::ports::Clock;

/// Handle to a lock owner. Cheap to clone; every clone is the same owner.
#[derive(Clone)]
pub struct Owner {
    inner: Arc<OwnerInner>,
}

struct OwnerInner {
    id: OwnerId,
    label: String,
    lease: Option<Lease>,
    /// lost-owner queue (Reaper の入力)
    lost: Sender<OwnerId>,
}

struct Lease {
    ttl: chrono::Duration,
    renewed_at: Mutex<DateTime<Utc>>,
    clock: Arc<dyn Clock>,
}

impl Lease {
    fn expires_at(&self) -> DateTime<Utc> {
        *self.renewed_at.lock().unwrap() + self.ttl
    }

    fn is_expired(&self) -> bool {
        self.clock.now() >= self.expires_at()
    }
}

impl OwnerInner {
    fn is_live(&self) -> bool {
        self.lease.as_ref().is_none_or(|lease| !lease.is_expired())
    }
}

impl Drop for OwnerInner {
    fn drop(&mut self) {
        // coordinator が先に消えていれば受信側はいない
        let _ = self.lost.send(self.id);
    }
}

impl Owner {
    pub(crate) fn new(label: impl Into<String>, lost: Sender<OwnerId>) -> Self {
        Self::build(label.into(), None, lost)
    }

    pub(crate) fn leased(
        label: impl Into<String>,
        ttl: chrono::Duration,
        clock: Arc<dyn Clock>,
        lost: Sender<OwnerId>,
    ) -> Self {
        let lease = Lease {
            ttl,
            renewed_at: Mutex::new(clock.now()),
            clock,
        };
        Self::build(label.into(), Some(lease), lost)
    }

    fn build(label: String, lease: Option<Lease>, lost: Sender<OwnerId>) -> Self {
        Self {
            inner: Arc::new(OwnerInner {
                id: OwnerId::generate(),
                label,
                lease,
                lost,
            }),
        }
    }

    pub fn id(&self) -> OwnerId {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Extends the lease by its ttl from now. Returns `false` for owners
    /// without a lease.
    ///
    /// Renewing after expiry revives the owner only if the Reaper has not
    /// purged its claims yet; callers should not rely on that.
    pub fn renew(&self) -> bool {
        match &self.inner.lease {
            Some(lease) => {
                *lease.renewed_at.lock().unwrap() = lease.clock.now();
                true
            }
            None => false,
        }
    }

    pub fn lease_expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lease.as_ref().map(Lease::expires_at)
    }

    /// `false` once the lease (if any) has expired.
    pub fn is_live(&self) -> bool {
        self.inner.is_live()
    }

    pub(crate) fn downgrade(&self) -> OwnerRef {
        OwnerRef {
            id: self.inner.id,
            weak: Arc::downgrade(&self.inner),
        }
    }
}

impl PartialEq for Owner {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Owner {}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("leased", &self.inner.lease.is_some())
            .finish()
    }
}

/// Non-owning reference held by a claim.
#[derive(Clone)]
pub struct OwnerRef {
    id: OwnerId,
    weak: Weak<OwnerInner>,
}

impl OwnerRef {
    /// Id the claim was made under, whether or not the owner still lives.
    pub fn id(&self) -> OwnerId {
        self.id
    }

    /// The owner's id while it is reachable and its lease (if any) is valid.
    pub fn resolve(&self) -> Option<OwnerId> {
        let inner = self.weak.upgrade()?;
        inner.is_live().then_some(self.id)
    }
}

impl fmt::Debug for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerRef")
            .field("id", &self.id)
            .field("live", &self.resolve().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::TimeZone;
    use std::sync::mpsc;

    #[test]
    fn dropping_last_clone_makes_owner_unreachable() {
        let (tx, rx) = mpsc::channel();
        let owner = Owner::new("upload", tx);
        let weak = owner.downgrade();
        let clone = owner.clone();

        drop(owner);
        assert_eq!(weak.resolve(), Some(clone.id()));
        assert!(rx.try_recv().is_err());

        let id = clone.id();
        drop(clone);
        assert_eq!(weak.resolve(), None);
        assert_eq!(weak.id(), id);
        assert_eq!(rx.try_recv().unwrap(), id);
    }

    #[test]
    fn expired_lease_resolves_to_none_until_renewed() {
        let (tx, _rx) = mpsc::channel();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::new(start));
        let owner = Owner::leased("poller", chrono::Duration::seconds(10), clock.clone(), tx);
        let weak = owner.downgrade();

        clock.advance(chrono::Duration::seconds(9));
        assert!(owner.is_live());
        assert_eq!(weak.resolve(), Some(owner.id()));

        clock.advance(chrono::Duration::seconds(1));
        assert!(!owner.is_live());
        assert_eq!(weak.resolve(), None);

        assert!(owner.renew());
        assert_eq!(owner.lease_expires_at(), Some(start + chrono::Duration::seconds(20)));
        assert_eq!(weak.resolve(), Some(owner.id()));
    }

    #[test]
    fn plain_owner_has_no_lease() {
        let (tx, _rx) = mpsc::channel();
        let owner = Owner::new("thread", tx);
        assert!(!owner.renew());
        assert_eq!(owner.lease_expires_at(), None);
        assert!(owner.is_live());
    }
}
