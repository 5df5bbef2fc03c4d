//! Uniform grid over point items (pellet indices).
//!
//! Rebuilt from scratch every tick; queries return slice indices in
//! ascending order so callers can apply lowest-index-wins rules.

use glam::Vec2;
use protocol::WorldBounds;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bounds {
    pub min: Vec2,
    pub max: Vec2,
}

impl Bounds {
    /// Square bounds centred on `center` with half-extent `radius`.
    #[inline]
    pub fn around(center: Vec2, radius: f32) -> Self {
        Self {
            min: center - Vec2::splat(radius),
            max: center + Vec2::splat(radius),
        }
    }

    #[inline]
    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
    }
}

/// Spatial hash grid over points.
pub struct PointGrid {
    origin: Vec2,
    cell_size: f32,
    grid_size: usize,
    cells: Vec<Vec<u32>>,
    points: Vec<Vec2>,
}

impl PointGrid {
    /// Grid covering `bounds` with `grid_size × grid_size` cells.
    pub fn new(bounds: &WorldBounds, grid_size: usize) -> Self {
        let grid_size = grid_size.max(1);
        let span = bounds.width().max(bounds.height()).max(1.0);
        Self {
            origin: bounds.min,
            cell_size: span / grid_size as f32,
            grid_size,
            cells: vec![Vec::new(); grid_size * grid_size],
            points: Vec::new(),
        }
    }

    #[inline]
    fn cell_coord(&self, value: f32, origin: f32) -> usize {
        let c = ((value - origin) / self.cell_size).floor();
        if c <= 0.0 {
            0
        } else {
            (c as usize).min(self.grid_size - 1)
        }
    }

    /// Replace the contents with `points`; item `i` is `points[i]`.
    pub fn rebuild<I>(&mut self, points: I)
    where
        I: IntoIterator<Item = Vec2>,
    {
        for cell in &mut self.cells {
            cell.clear();
        }
        self.points.clear();
        self.points.extend(points);

        for (index, point) in self.points.iter().enumerate() {
            let gx = self.cell_coord(point.x, self.origin.x);
            let gy = self.cell_coord(point.y, self.origin.y);
            self.cells[gy * self.grid_size + gx].push(index as u32);
        }
    }

    /// Indices of all points inside `bound`, ascending.
    pub fn query(&self, bound: &Bounds) -> Vec<u32> {
        let min_gx = self.cell_coord(bound.min.x, self.origin.x);
        let max_gx = self.cell_coord(bound.max.x, self.origin.x);
        let min_gy = self.cell_coord(bound.min.y, self.origin.y);
        let max_gy = self.cell_coord(bound.max.y, self.origin.y);

        let mut result = Vec::new();
        for gy in min_gy..=max_gy {
            let row = gy * self.grid_size;
            for gx in min_gx..=max_gx {
                for &index in &self.cells[row + gx] {
                    if bound.contains(self.points[index as usize]) {
                        result.push(index);
                    }
                }
            }
        }
        // Each point lives in exactly one cell, so sorting is enough.
        result.sort_unstable();
        result
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl std::fmt::Debug for PointGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointGrid")
            .field("points", &self.points.len())
            .field("grid_size", &self.grid_size)
            .finish()
    }
}
