//! Execution-unit context tags.
//!
//! The active unit is carried as a tokio task-local, so it follows the
//! future that runs a unit across every `.await` and is restored when the
//! scope exits, whether the future completes, fails or is dropped.

use std::cell::{Cell, RefCell};
use std::future::Future;

use rustc_hash::{FxHashMap, FxHashSet};

use super::protocol::UnitId;

/// One activation of an execution unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextTag {
    pub unit: UnitId,
    pub epoch: u64,
}

tokio::task_local! {
    static ACTIVE_UNIT: ContextTag;
}

/// The tag ambient in the current task, if any.
pub fn current() -> Option<ContextTag> {
    ACTIVE_UNIT.try_with(Clone::clone).ok()
}

/// Run `fut` with `tag` as the ambient unit.
pub async fn scope<F: Future>(tag: ContextTag, fut: F) -> F::Output {
    ACTIVE_UNIT.scope(tag, fut).await
}

/// Run `fut` under the same tag as the caller, if it has one.
///
/// Used for guest tasks: a task created by a unit writes as that unit.
pub async fn propagate<F: Future>(tag: Option<ContextTag>, fut: F) -> F::Output {
    match tag {
        Some(tag) => ACTIVE_UNIT.scope(tag, fut).await,
        None => fut.await,
    }
}

/// Which tags are live.
///
/// A tag is live from [`ContextTable::activate`] until it is retired,
/// either individually when its run delivers a result or together with
/// every other tag of its unit by [`ContextTable::clear`]. Epochs are
/// never reused, so a retired tag cannot become live again.
#[derive(Debug, Default)]
pub struct ContextTable {
    next_epoch: Cell<u64>,
    live: RefCell<FxHashMap<UnitId, FxHashSet<u64>>>,
}

impl ContextTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&self, unit: &UnitId) -> ContextTag {
        let epoch = self.next_epoch.get();
        self.next_epoch.set(epoch + 1);
        self.live
            .borrow_mut()
            .entry(unit.clone())
            .or_default()
            .insert(epoch);
        ContextTag {
            unit: unit.clone(),
            epoch,
        }
    }

    pub fn is_live(&self, tag: &ContextTag) -> bool {
        self.live
            .borrow()
            .get(&tag.unit)
            .is_some_and(|epochs| epochs.contains(&tag.epoch))
    }

    pub fn retire(&self, tag: &ContextTag) {
        let mut live = self.live.borrow_mut();
        if let Some(epochs) = live.get_mut(&tag.unit) {
            epochs.remove(&tag.epoch);
            if epochs.is_empty() {
                live.remove(&tag.unit);
            }
        }
    }

    /// Retire every tag of `unit`. Returns how many were live.
    pub fn clear(&self, unit: &UnitId) -> usize {
        self.live
            .borrow_mut()
            .remove(unit)
            .map_or(0, |epochs| epochs.len())
    }

    /// Number of live tags.
    pub fn live_count(&self) -> usize {
        self.live.borrow().values().map(FxHashSet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epochs_are_fresh() {
        let table = ContextTable::new();
        let unit = UnitId::from("c1");
        let a = table.activate(&unit);
        let b = table.activate(&unit);
        assert_ne!(a, b);
        assert!(table.is_live(&a) && table.is_live(&b));

        table.retire(&a);
        assert!(!table.is_live(&a));
        assert!(table.is_live(&b));
    }

    #[test]
    fn test_clear_retires_all_tags_of_unit() {
        let table = ContextTable::new();
        let c1 = UnitId::from("c1");
        let c2 = UnitId::from("c2");
        let a = table.activate(&c1);
        let b = table.activate(&c1);
        let other = table.activate(&c2);

        assert_eq!(table.clear(&c1), 2);
        assert!(!table.is_live(&a));
        assert!(!table.is_live(&b));
        assert!(table.is_live(&other));

        // A later activation of the same unit gets a new epoch; old tags stay dead.
        let c = table.activate(&c1);
        assert!(table.is_live(&c));
        assert!(!table.is_live(&a));
        assert_eq!(table.live_count(), 2);
    }

    #[tokio::test]
    async fn test_scope_is_task_local() {
        assert!(current().is_none());
        let tag = ContextTag {
            unit: "c1".into(),
            epoch: 7,
        };
        let seen = scope(tag.clone(), async {
            tokio::task::yield_now().await;
            current()
        })
        .await;
        assert_eq!(seen, Some(tag));
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn test_interleaved_scopes_keep_their_tags() {
        let a = ContextTag { unit: "a".into(), epoch: 0 };
        let b = ContextTag { unit: "b".into(), epoch: 1 };
        let (ra, rb) = tokio::join!(
            scope(a.clone(), async {
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                current()
            }),
            scope(b.clone(), async {
                tokio::task::yield_now().await;
                current()
            }),
        );
        assert_eq!(ra, Some(a));
        assert_eq!(rb, Some(b));
    }
}
