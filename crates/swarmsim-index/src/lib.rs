//! Spatial indexing abstractions for agent neighborhood queries.
//!
//! The world owns one index over *all* live agents and keeps it current
//! through its move/remove operations, so radius queries issued mid-tick see
//! positions as they stand at query time rather than a stale tick-start
//! snapshot.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors emitted by spatial index implementations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., non-positive cell size).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Common behaviour exposed by neighborhood indices.
///
/// Entries are keyed by an opaque `u64` chosen by the caller (the world uses
/// the FFI form of its generational agent handles). A key must be inserted at
/// most once; `remove`/`relocate` on an unknown key are no-ops.
pub trait NeighborhoodIndex {
    /// Register `key` at `position`.
    fn insert(&mut self, key: u64, position: (f32, f32));

    /// Forget `key`, which was last placed at `position`.
    fn remove(&mut self, key: u64, position: (f32, f32));

    /// Move `key` from `from` to `to`.
    fn relocate(&mut self, key: u64, from: (f32, f32), to: (f32, f32));

    /// Drop every entry.
    fn clear(&mut self);

    /// Visit all entries within `radius` of `origin`, excluding `exclude`.
    ///
    /// The visitor receives the entry key and the squared distance to the
    /// origin. Visit order is deterministic for a given insertion history.
    fn neighbors_within(
        &self,
        origin: (f32, f32),
        radius: f32,
        exclude: Option<u64>,
        visitor: &mut dyn FnMut(u64, OrderedFloat<f32>),
    );
}

/// Uniform grid index bucketing entries into square cells.
///
/// Cells are addressed by floored integer coordinates, so positions anywhere
/// on the plane (including negative coordinates) are representable; the grid
/// does not assume a bounded domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniformGridIndex {
    cell_size: f32,
    #[serde(skip)]
    cells: HashMap<(i32, i32), Vec<(u64, (f32, f32))>>,
}

impl UniformGridIndex {
    /// Create a new uniform grid with the provided cell size.
    pub fn new(cell_size: f32) -> Result<Self, IndexError> {
        if !(cell_size > 0.0) || !cell_size.is_finite() {
            return Err(IndexError::InvalidConfig(
                "cell_size must be positive and finite",
            ));
        }
        Ok(Self {
            cell_size,
            cells: HashMap::new(),
        })
    }

    /// Edge length of one grid cell.
    #[must_use]
    pub const fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Number of entries currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }

    /// Returns true when the index holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.values().all(Vec::is_empty)
    }

    #[inline]
    fn cell_of(&self, position: (f32, f32)) -> (i32, i32) {
        (
            (position.0 / self.cell_size).floor() as i32,
            (position.1 / self.cell_size).floor() as i32,
        )
    }
}

impl NeighborhoodIndex for UniformGridIndex {
    fn insert(&mut self, key: u64, position: (f32, f32)) {
        let cell = self.cell_of(position);
        self.cells.entry(cell).or_default().push((key, position));
    }

    fn remove(&mut self, key: u64, position: (f32, f32)) {
        let cell = self.cell_of(position);
        if let Some(bucket) = self.cells.get_mut(&cell) {
            bucket.retain(|(entry, _)| *entry != key);
            if bucket.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }

    fn relocate(&mut self, key: u64, from: (f32, f32), to: (f32, f32)) {
        let from_cell = self.cell_of(from);
        let to_cell = self.cell_of(to);
        if from_cell == to_cell {
            if let Some(bucket) = self.cells.get_mut(&from_cell)
                && let Some(entry) = bucket.iter_mut().find(|(entry, _)| *entry == key)
            {
                entry.1 = to;
            }
            return;
        }
        self.remove(key, from);
        self.insert(key, to);
    }

    fn clear(&mut self) {
        self.cells.clear();
    }

    fn neighbors_within(
        &self,
        origin: (f32, f32),
        radius: f32,
        exclude: Option<u64>,
        visitor: &mut dyn FnMut(u64, OrderedFloat<f32>),
    ) {
        if !(radius > 0.0) {
            return;
        }
        let radius_sq = radius * radius;
        let min_cell = self.cell_of((origin.0 - radius, origin.1 - radius));
        let max_cell = self.cell_of((origin.0 + radius, origin.1 + radius));
        for cy in min_cell.1..=max_cell.1 {
            for cx in min_cell.0..=max_cell.0 {
                let Some(bucket) = self.cells.get(&(cx, cy)) else {
                    continue;
                };
                for &(key, position) in bucket {
                    if exclude == Some(key) {
                        continue;
                    }
                    let dx = position.0 - origin.0;
                    let dy = position.1 - origin.1;
                    let dist_sq = dx * dx + dy * dy;
                    if dist_sq <= radius_sq {
                        visitor(key, OrderedFloat(dist_sq));
                    }
                }
            }
        }
    }
}
