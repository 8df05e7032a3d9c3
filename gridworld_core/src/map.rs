use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::{
    Position,
    entity::{Entity, Location},
};

/// Errors raised by bounds-checked grid writes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("Coordinates ({x}, {y}) are out of bounds for grid size ({width}, {height})")]
    OutOfBounds {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    },
}

/// A generic 2D grid structure.
///
/// Stores elements of type `T` in a flat vector using row-major order and
/// provides access by `(x, y)` coordinates or by [`Position`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    cells: Vec<T>,
}

/// The world map: each cell holds at most one entity.
pub type WorldGrid = Grid<Option<Entity>>;

/// Per-cell visibility flags for an observation window.
pub type Mask = Grid<bool>;

impl<T> Grid<T> {
    /// Creates a grid filled with `T::default()`.
    ///
    /// # Arguments
    ///
    /// * `width`: The width of the grid.
    /// * `height`: The height of the grid.
    ///
    /// # Panics
    ///
    /// Panics if `width * height` overflows `usize`.
    pub fn new(width: usize, height: usize) -> Self
    where
        T: Default + Clone,
    {
        Self::filled(width, height, T::default())
    }

    /// Creates a grid with every cell set to `value`.
    ///
    /// # Panics
    ///
    /// Panics if `width * height` overflows `usize`.
    pub fn filled(width: usize, height: usize, value: T) -> Self
    where
        T: Clone,
    {
        let size = width.checked_mul(height).expect("Grid size overflow");
        Grid {
            width,
            height,
            cells: vec![value; size],
        }
    }

    /// Creates a grid filled by a generator function.
    ///
    /// Cells are generated in row-major order, so `f` sees `(0, 0)`, `(1, 0)`,
    /// ... before moving to the next row.
    ///
    /// # Arguments
    ///
    /// * `width`: The width of the grid.
    /// * `height`: The height of the grid.
    /// * `f`: A function `FnMut(usize, usize) -> T` giving the value of `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `width * height` overflows `usize`.
    pub fn from_generator<F>(width: usize, height: usize, mut f: F) -> Self
    where
        F: FnMut(usize, usize) -> T,
    {
        let size = width.checked_mul(height).expect("Grid size overflow");
        let mut cells = Vec::with_capacity(size);
        for y in 0..height {
            for x in 0..width {
                cells.push(f(x, y));
            }
        }
        Grid {
            width,
            height,
            cells,
        }
    }

    /// Returns the width of the grid.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns the height of the grid.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Converts (x, y) coordinates to a flat vector index.
    ///
    /// Returns `None` if the coordinates are out of bounds.
    #[inline]
    fn coords_to_index(&self, x: usize, y: usize) -> Option<usize> {
        self.is_valid(x, y).then(|| y * self.width + x)
    }

    /// Checks if the given coordinates are within the grid boundaries.
    #[inline]
    pub fn is_valid(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height
    }

    /// Bounds check for signed coordinates, returning the cell position when
    /// it lies inside the grid.
    #[inline]
    pub fn position(&self, x: isize, y: isize) -> Option<Position> {
        let (x, y) = (usize::try_from(x).ok()?, usize::try_from(y).ok()?);
        self.is_valid(x, y).then_some(Position { x, y })
    }

    /// Gets an immutable reference to the cell at the given coordinates.
    ///
    /// Returns `None` if the coordinates are out of bounds.
    pub fn get(&self, x: usize, y: usize) -> Option<&T> {
        let index = self.coords_to_index(x, y)?;
        self.cells.get(index)
    }

    /// Gets a mutable reference to the cell at the given coordinates.
    ///
    /// Returns `None` if the coordinates are out of bounds.
    pub fn get_mut(&mut self, x: usize, y: usize) -> Option<&mut T> {
        let index = self.coords_to_index(x, y)?;
        self.cells.get_mut(index)
    }

    /// Sets the value of the cell at the given coordinates.
    ///
    /// Returns `Ok(())` on success, or `Err(GridError::OutOfBounds)` if the
    /// coordinates are invalid.
    pub fn set(&mut self, x: usize, y: usize, value: T) -> Result<(), GridError> {
        let index = self.coords_to_index(x, y).ok_or(GridError::OutOfBounds {
            x,
            y,
            width: self.width,
            height: self.height,
        })?;
        self.cells[index] = value;
        Ok(())
    }

    /// Returns an iterator over the cells of the grid in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.cells.iter()
    }

    /// Returns an iterator that yields `((x, y), &T)` for each cell, in
    /// row-major order.
    pub fn enumerate(&self) -> impl Iterator<Item = ((usize, usize), &T)> {
        let width = self.width;
        self.cells
            .iter()
            .enumerate()
            .map(move |(index, cell)| ((index % width, index / width), cell))
    }

    /// Returns a slice containing all cells in the grid.
    pub fn as_slice(&self) -> &[T] {
        &self.cells
    }

    /// Extracts the `width × height` window whose top-left corner is `(x, y)`.
    ///
    /// The corner may lie outside the grid; cells that fall outside are
    /// produced by `fill` instead of panicking.
    ///
    /// # Arguments
    ///
    /// * `x`, `y`: Signed coordinates of the window's top-left corner.
    /// * `width`, `height`: Size of the extracted window.
    /// * `fill`: Produces the value of every out-of-range cell.
    pub fn slice_or<F>(&self, x: isize, y: isize, width: usize, height: usize, mut fill: F) -> Self
    where
        T: Clone,
        F: FnMut() -> T,
    {
        Grid::from_generator(width, height, |i, j| {
            match self.position(x + i as isize, y + j as isize) {
                Some(pos) => self[pos].clone(),
                None => fill(),
            }
        })
    }

    /// Returns a copy rotated 90° counter-clockwise.
    pub fn rotate_left(&self) -> Self
    where
        T: Clone,
    {
        // Source (i, j) lands on (j, width - 1 - i) of a height × width grid.
        Grid::from_generator(self.height, self.width, |x, y| {
            self[(self.width - 1 - y, x)].clone()
        })
    }
}

/// Allows indexing the grid using `(usize, usize)` coordinates.
impl<T> Index<(usize, usize)> for Grid<T> {
    type Output = T;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &Self::Output {
        match self.coords_to_index(x, y) {
            Some(idx) => &self.cells[idx],
            None => panic!(
                "Grid index ({}, {}) out of bounds for grid size ({}, {})",
                x, y, self.width, self.height
            ),
        }
    }
}

/// Allows mutable indexing using `(usize, usize)` coordinates.
impl<T> IndexMut<(usize, usize)> for Grid<T> {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut Self::Output {
        match self.coords_to_index(x, y) {
            Some(idx) => &mut self.cells[idx],
            None => panic!(
                "Grid index ({}, {}) out of bounds for grid size ({}, {})",
                x, y, self.width, self.height
            ),
        }
    }
}

/// Indexing using Position coordinates for access
impl<T> Index<Position> for Grid<T> {
    type Output = T;

    #[inline]
    fn index(&self, pos: Position) -> &Self::Output {
        &self[(pos.x, pos.y)]
    }
}

/// Indexing using Position coordinates for mutable access
impl<T> IndexMut<Position> for Grid<T> {
    #[inline]
    fn index_mut(&mut self, pos: Position) -> &mut Self::Output {
        &mut self[(pos.x, pos.y)]
    }
}

impl WorldGrid {
    /// Empty world of the given size.
    pub fn empty(width: usize, height: usize) -> Self {
        Grid::new(width, height)
    }

    /// Places `entity` at `pos`, recording its location. Returns whatever was
    /// there before.
    ///
    /// # Panics
    ///
    /// Panics if `pos` is outside the grid.
    pub fn put(&mut self, pos: Position, mut entity: Entity) -> Option<Entity> {
        entity.location = Location::OnGrid(pos);
        self[pos].replace(entity)
    }

    /// Removes and returns the entity at `pos`.
    pub fn take(&mut self, pos: Position) -> Option<Entity> {
        let mut entity = self[pos].take()?;
        entity.location = Location::Unplaced;
        Some(entity)
    }

    /// Fills `length` cells rightwards from `(x, y)`, or up to the right edge.
    pub fn horz_wall(&mut self, x: usize, y: usize, length: Option<usize>) {
        let length = length.unwrap_or(self.width.saturating_sub(x));
        for i in 0..length {
            self.put(Position::new(x + i, y), Entity::wall());
        }
    }

    /// Fills `length` cells downwards from `(x, y)`, or down to the bottom edge.
    pub fn vert_wall(&mut self, x: usize, y: usize, length: Option<usize>) {
        let length = length.unwrap_or(self.height.saturating_sub(y));
        for j in 0..length {
            self.put(Position::new(x, y + j), Entity::wall());
        }
    }

    /// Outline of a `w × h` rectangle with its top-left corner at `(x, y)`.
    pub fn wall_rect(&mut self, x: usize, y: usize, w: usize, h: usize) {
        if w == 0 || h == 0 {
            return;
        }
        self.horz_wall(x, y, Some(w));
        self.horz_wall(x, y + h - 1, Some(w));
        self.vert_wall(x, y, Some(h));
        self.vert_wall(x + w - 1, y, Some(h));
    }

    /// Window extraction that never fails: out-of-range cells read as walls.
    pub fn slice(&self, x: isize, y: isize, width: usize, height: usize) -> Self {
        self.slice_or(x, y, width, height, || Some(Entity::wall()))
    }

    /// Iterates over placed entities with their positions.
    pub fn entities(&self) -> impl Iterator<Item = (Position, &Entity)> {
        self.enumerate()
            .filter_map(|((x, y), cell)| cell.as_ref().map(|e| (Position { x, y }, e)))
    }

    /// Position of the first entity matching `predicate`.
    pub fn find<P>(&self, mut predicate: P) -> Option<Position>
    where
        P: FnMut(&Entity) -> bool,
    {
        self.entities()
            .find(|(_, entity)| predicate(*entity))
            .map(|(pos, _)| pos)
    }
}
