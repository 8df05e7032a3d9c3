//! Field-of-view computation.
//!
//! An agent looks at a square window of side `size` laid out so that the
//! agent sits at the bottom-centre cell (the anchor) and "up" in the window is
//! the agent's forward direction. Visibility spreads outward from the anchor
//! row by row and stops at opaque cells.

use crate::{
    Direction, Position,
    map::{Mask, WorldGrid},
};

/// Geometry of one agent's observation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewFrame {
    pub position: Position,
    pub direction: Direction,
    pub size: usize,
}

impl ViewFrame {
    pub fn new(position: Position, direction: Direction, size: usize) -> Self {
        ViewFrame {
            position,
            direction,
            size,
        }
    }

    /// Cell the agent occupies inside its own window.
    pub fn anchor(&self) -> (usize, usize) {
        (self.size / 2, self.size - 1)
    }

    /// World coordinates of the window's top-left corner before rotation.
    pub fn extents(&self) -> (isize, isize) {
        let (x, y) = (self.position.x as isize, self.position.y as isize);
        let size = self.size as isize;
        let half = size / 2;
        match self.direction {
            Direction::Right => (x, y - half),
            Direction::Down => (x - half, y),
            Direction::Left => (x - size + 1, y - half),
            Direction::Up => (x - half, y - size + 1),
        }
    }

    /// Maps a window cell back to (possibly out of range) world coordinates.
    pub fn to_world(&self, vx: usize, vy: usize) -> (isize, isize) {
        let (fx, fy) = self.direction.delta();
        let (rx, ry) = self.direction.right_delta();
        let size = self.size as isize;
        let half = size / 2;
        let top_x = self.position.x as isize + fx * (size - 1) - rx * half;
        let top_y = self.position.y as isize + fy * (size - 1) - ry * half;
        let (vx, vy) = (vx as isize, vy as isize);
        (top_x - fx * vy + rx * vx, top_y - fy * vy + ry * vx)
    }

    /// Window coordinates of world cell `(x, y)`, if it falls inside the window.
    pub fn relative_coords(&self, x: usize, y: usize) -> Option<(usize, usize)> {
        let (fx, fy) = self.direction.delta();
        let (rx, ry) = self.direction.right_delta();
        let size = self.size as isize;
        let half = size / 2;
        let top_x = self.position.x as isize + fx * (size - 1) - rx * half;
        let top_y = self.position.y as isize + fy * (size - 1) - ry * half;
        let (lx, ly) = (x as isize - top_x, y as isize - top_y);
        let vx = rx * lx + ry * ly;
        let vy = -(fx * lx + fy * ly);
        let range = 0..size;
        (range.contains(&vx) && range.contains(&vy)).then_some((vx as usize, vy as usize))
    }

    pub fn in_view(&self, x: usize, y: usize) -> bool {
        self.relative_coords(x, y).is_some()
    }

    /// The window contents, rotated into the agent's frame.
    pub fn window(&self, world: &WorldGrid) -> WorldGrid {
        let (top_x, top_y) = self.extents();
        let mut grid = world.slice(top_x, top_y, self.size, self.size);
        for _ in 0..=self.direction.index() {
            grid = grid.rotate_left();
        }
        grid
    }

    /// Window contents and visibility mask for this frame.
    pub fn observe(&self, world: &WorldGrid, see_through_walls: bool) -> (WorldGrid, Mask) {
        let grid = self.window(world);
        let mask = if see_through_walls {
            Mask::filled(grid.width(), grid.height(), true)
        } else {
            process_vis(&grid, self.anchor())
        };
        (grid, mask)
    }
}

fn opaque(grid: &WorldGrid, x: usize, y: usize) -> bool {
    grid[(x, y)].as_ref().is_some_and(|e| !e.see_behind())
}

/// Occlusion propagation over a window whose anchor sits on the bottom row.
///
/// Rows are scanned from the anchor row towards the top. In each row a
/// left-to-right pass lets every visible, transparent cell light up its right
/// neighbour and the two cells ahead of it, then a right-to-left pass does the
/// same towards the left. Opaque cells are visible when reached but never
/// propagate.
pub fn process_vis(grid: &WorldGrid, anchor: (usize, usize)) -> Mask {
    let (width, height) = (grid.width(), grid.height());
    let mut mask = Mask::filled(width, height, false);
    mask[anchor] = true;

    for j in (0..height).rev() {
        for i in 0..width.saturating_sub(1) {
            if !mask[(i, j)] || opaque(grid, i, j) {
                continue;
            }
            mask[(i + 1, j)] = true;
            if j > 0 {
                mask[(i + 1, j - 1)] = true;
                mask[(i, j - 1)] = true;
            }
        }

        for i in (1..width).rev() {
            if !mask[(i, j)] || opaque(grid, i, j) {
                continue;
            }
            mask[(i - 1, j)] = true;
            if j > 0 {
                mask[(i - 1, j - 1)] = true;
                mask[(i, j - 1)] = true;
            }
        }
    }

    mask
}
