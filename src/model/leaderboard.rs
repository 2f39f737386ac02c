use std::{
    cmp::Ordering,
    collections::HashMap,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard}
};

use indexmap::IndexMap;

use crate::model::structures::entity_class::EntityClass;

/// Per-class sorted score index. Entries are (entity id, score) pairs held
/// in descending score order, ties broken by ascending id so rank queries
/// are reproducible across rebuilds.
///
/// The index is a derived cache of persisted entity state, never a source
/// of truth; it can be rebuilt wholesale at any time. Only the rating
/// service mutates it.
pub struct Leaderboard {
    boards: RwLock<HashMap<EntityClass, IndexMap<i32, f64>>>
}

impl Default for Leaderboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Leaderboard {
    pub fn new() -> Leaderboard {
        Leaderboard {
            boards: RwLock::new(HashMap::new())
        }
    }

    pub fn upsert(&self, class: EntityClass, id: i32, score: f64) {
        let mut boards = self.write();
        let board = boards.entry(class).or_default();
        board.insert(id, score);
        Self::sort(board);
    }

    pub fn remove(&self, class: EntityClass, id: i32) {
        if let Some(board) = self.write().get_mut(&class) {
            board.shift_remove(&id);
        }
    }

    /// 0-based rank in descending score order; rank 0 is the highest score.
    pub fn rank_of(&self, class: EntityClass, id: i32) -> Option<usize> {
        self.read().get(&class).and_then(|board| board.get_index_of(&id))
    }

    pub fn cardinality(&self, class: EntityClass) -> usize {
        self.read().get(&class).map(IndexMap::len).unwrap_or(0)
    }

    /// Replaces the whole class index in one swap under the write lock, so a
    /// concurrent rank query observes either the old complete board or the
    /// new one.
    pub fn clear_and_rebuild(&self, class: EntityClass, entries: Vec<(i32, f64)>) {
        let mut board: IndexMap<i32, f64> = entries.into_iter().collect();
        Self::sort(&mut board);
        self.write().insert(class, board);
    }

    fn sort(board: &mut IndexMap<i32, f64>) {
        board.sort_by(|id_a, score_a, id_b, score_b| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(Ordering::Equal)
                .then_with(|| id_a.cmp(id_b))
        });
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<EntityClass, IndexMap<i32, f64>>> {
        self.boards.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<EntityClass, IndexMap<i32, f64>>> {
        self.boards.write().unwrap_or_else(PoisonError::into_inner)
    }
}
