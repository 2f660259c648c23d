//! Domain identifiers (strongly-typed IDs).
//!
//! ULID ベースの ID を Phantom type パターンで型ごとに区別します。
//! `OwnerId` と `WorkerId` は中身が同じ 128-bit でも混同できません。
//!
//! ## ULID の特性
//! - **時刻でソート可能**: 生成順序で並ぶので、ログを追いやすい
//! - **調整不要**: スレッドをまたいでロックなしで生成できる

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"owner-", "claim-" など）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// `T` は PhantomData で、実行時にはメモリを消費しません。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// 新しい ID を生成（現在時刻 + ランダム部分）
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Owner {}

impl IdMarker for Owner {
    fn prefix() -> &'static str {
        "owner-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Claim {}

impl IdMarker for Claim {
    fn prefix() -> &'static str {
        "claim-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Worker {}

impl IdMarker for Worker {
    fn prefix() -> &'static str {
        "worker-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Coordinator {}

impl IdMarker for Coordinator {
    fn prefix() -> &'static str {
        "coord-"
    }
}

// ========================================
// Type Alias
// ========================================

/// Identity of a lock owner (thread, session, upload, ...).
pub type OwnerId = Id<Owner>;

/// Identity of one claim (one `lock` call).
pub type ClaimId = Id<Claim>;

/// Identity of a pooled worker thread.
pub type WorkerId = Id<Worker>;

/// Identity of a coordinator instance; keys the per-thread owners.
pub type CoordinatorId = Id<Coordinator>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let owner = OwnerId::generate();
        let claim = ClaimId::generate();
        let worker = WorkerId::generate();

        assert!(owner.to_string().starts_with("owner-"));
        assert!(claim.to_string().starts_with("claim-"));
        assert!(worker.to_string().starts_with("worker-"));

        // let _: OwnerId = claim; // <- does not compile
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = OwnerId::generate();
        let b = OwnerId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_can_be_serialized() {
        let id = WorkerId::generate();

        let serialized = serde_json::to_string(&id).unwrap();
        let deserialized: WorkerId = serde_json::from_str(&serialized).unwrap();

        assert_eq!(id, deserialized);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;

        assert_eq!(size_of::<OwnerId>(), size_of::<Ulid>());
        assert_eq!(size_of::<ClaimId>(), 16);
    }
}
