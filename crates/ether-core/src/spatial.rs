//! Coarse grid index over positioned hotspots.
//!
//! The world is cut into cubic cells of `cell_size` blocks. A hotspot (a
//! centre block plus a radius) is filed under every cell that its
//! radius-expanded box touches. Looking up a block returns everything filed
//! under that block's cell: false positives are expected and callers filter
//! them by real distance; false negatives never happen.
//!
//! Hotspots are re-filed incrementally. [`SpatialIndex::update`] diffs the
//! previously filed cells against the new ones, so a hotspot that moves a
//! single block inside its cell costs no map writes at all.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::math::BlockPos;

/// Radius, in blocks, past which a hotspot stops being filed per cell and is
/// instead returned for every query.
pub const MAX_FILED_REACH: i32 = 128;

/// Anything with a centre block and a radius.
pub trait Hotspot {
    fn center(&self) -> BlockPos;
    fn radius(&self) -> f32;
}

/// Integer coordinate of a grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// Where a hotspot is currently filed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Filing {
    Cells(Vec<CellPos>),
    Unbounded,
}

/// Secondary index from grid cells to the hotspots overlapping them.
///
/// `K` is the caller's handle for a hotspot (the registry uses
/// [`EntryId`](crate::handle::EntryId)).
#[derive(Debug)]
pub struct SpatialIndex<K> {
    cell_size: i32,
    cells: HashMap<CellPos, HashSet<K>>,
    unbounded: HashSet<K>,
    filed: HashMap<K, Filing>,
}

impl<K: Copy + Eq + Hash> SpatialIndex<K> {
    /// Create an empty index.
    ///
    /// # Panics
    ///
    /// Panics if `cell_size` is not positive.
    pub fn new(cell_size: i32) -> Self {
        assert!(cell_size > 0, "cell_size must be positive, got {cell_size}");
        Self {
            cell_size,
            cells: HashMap::new(),
            unbounded: HashSet::new(),
            filed: HashMap::new(),
        }
    }

    pub fn cell_size(&self) -> i32 {
        self.cell_size
    }

    /// The cell containing `pos`.
    pub fn cell_of(&self, pos: BlockPos) -> CellPos {
        CellPos {
            x: pos.x.div_euclid(self.cell_size),
            y: pos.y.div_euclid(self.cell_size),
            z: pos.z.div_euclid(self.cell_size),
        }
    }

    /// Blocks covered on each side of the centre block.
    ///
    /// Keyed off the truncated radius. The two extra blocks cover `radius + 1`
    /// measured from any point inside the centre block.
    fn reach(radius: f32) -> i32 {
        let radius = if radius.is_finite() { radius.max(0.0) } else { f32::MAX };
        (radius as i32).saturating_add(2)
    }

    fn filing_for(&self, center: BlockPos, radius: f32) -> Filing {
        let reach = Self::reach(radius);
        if reach > MAX_FILED_REACH {
            return Filing::Unbounded;
        }
        let lo = self.cell_of(center.offset(-reach, -reach, -reach));
        let hi = self.cell_of(center.offset(reach, reach, reach));
        let mut cells = Vec::new();
        for x in lo.x..=hi.x {
            for y in lo.y..=hi.y {
                for z in lo.z..=hi.z {
                    cells.push(CellPos { x, y, z });
                }
            }
        }
        Filing::Cells(cells)
    }

    /// File `key` under exactly the cells `hotspot` now touches.
    ///
    /// Returns true if its filing changed.
    pub fn update(&mut self, key: K, hotspot: &impl Hotspot) -> bool {
        let filing = self.filing_for(hotspot.center(), hotspot.radius());
        if self.filed.get(&key) == Some(&filing) {
            return false;
        }
        let previous = self.filed.remove(&key);

        match (previous, &filing) {
            (Some(Filing::Cells(old)), Filing::Cells(new)) => {
                let new_set: HashSet<&CellPos> = new.iter().collect();
                let old_set: HashSet<&CellPos> = old.iter().collect();
                for cell in old.iter().filter(|c| !new_set.contains(c)) {
                    self.detach(key, cell);
                }
                for cell in new.iter().filter(|c| !old_set.contains(c)) {
                    self.cells.entry(*cell).or_default().insert(key);
                }
            }
            (previous, _) => {
                if let Some(previous) = previous {
                    self.unfile(key, previous);
                }
                self.file(key, &filing);
            }
        }

        self.filed.insert(key, filing);
        true
    }

    /// Drop `key` from every cell it occupies. No-op if it is not filed.
    pub fn remove(&mut self, key: K) -> bool {
        match self.filed.remove(&key) {
            Some(filing) => {
                self.unfile(key, filing);
                true
            }
            None => false,
        }
    }

    /// Every key filed under the cell containing `pos`.
    pub fn get_state(&self, pos: BlockPos) -> HashSet<K> {
        let mut found = self.unbounded.clone();
        if let Some(keys) = self.cells.get(&self.cell_of(pos)) {
            found.extend(keys.iter().copied());
        }
        found
    }

    pub fn contains(&self, key: K) -> bool {
        self.filed.contains_key(&key)
    }

    /// Number of filed keys.
    pub fn len(&self) -> usize {
        self.filed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filed.is_empty()
    }

    /// Number of non-empty cells.
    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.unbounded.clear();
        self.filed.clear();
    }

    fn file(&mut self, key: K, filing: &Filing) {
        match filing {
            Filing::Cells(cells) => {
                for cell in cells {
                    self.cells.entry(*cell).or_default().insert(key);
                }
            }
            Filing::Unbounded => {
                self.unbounded.insert(key);
            }
        }
    }

    fn unfile(&mut self, key: K, filing: Filing) {
        match filing {
            Filing::Cells(cells) => {
                for cell in &cells {
                    self.detach(key, cell);
                }
            }
            Filing::Unbounded => {
                self.unbounded.remove(&key);
            }
        }
    }

    fn detach(&mut self, key: K, cell: &CellPos) {
        if let Some(keys) = self.cells.get_mut(cell) {
            keys.remove(&key);
            if keys.is_empty() {
                self.cells.remove(cell);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
