//! Spatial index of the city.
//!
//! Agents live in a continuous wrap-around space of `length x width` and are
//! bucketed into unit grid cells; agents sharing a cell are neighbors.

use crate::model::AgentId;
use std::collections::HashMap;

#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

type Cell = (usize, usize);

pub struct Grid {
    length: usize,
    width: usize,
    positions: Vec<Point>,
    cells: HashMap<Cell, Vec<AgentId>>,
}

impl Grid {
    /// Create a grid with every agent placed at the origin.
    pub fn new(length: usize, width: usize, n_agents: usize) -> Self {
        let mut cells = HashMap::new();
        cells.insert((0, 0), (0..n_agents).collect());
        Self {
            length,
            width,
            positions: vec![Point::default(); n_agents],
            cells,
        }
    }

    /// Agents in the same cell as `id`, including `id` itself.
    pub fn neighbors_of(&self, id: AgentId) -> &[AgentId] {
        let cell = self.cell_of(self.positions[id]);
        self.cells.get(&cell).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Move an agent to `point`, wrapping around the borders.
    pub fn move_to(&mut self, id: AgentId, point: Point) {
        let point = self.wrap(point);
        let old_cell = self.cell_of(self.positions[id]);
        let new_cell = self.cell_of(point);
        self.positions[id] = point;
        if old_cell == new_cell {
            return;
        }

        if let Some(ids) = self.cells.get_mut(&old_cell) {
            if let Some(idx) = ids.iter().position(|&other| other == id) {
                ids.swap_remove(idx);
            }
            if ids.is_empty() {
                self.cells.remove(&old_cell);
            }
        }
        self.cells.entry(new_cell).or_default().push(id);
    }

    /// Move an agent by a displacement.
    pub fn move_by(&mut self, id: AgentId, dx: f64, dy: f64) {
        let Point { x, y } = self.positions[id];
        self.move_to(id, Point::new(x + dx, y + dy));
    }

    fn wrap(&self, point: Point) -> Point {
        let x = point.x.rem_euclid(self.length as f64);
        let y = point.y.rem_euclid(self.width as f64);
        // rem_euclid can round up to the modulus for tiny negative inputs
        Point::new(
            if x >= self.length as f64 { 0.0 } else { x },
            if y >= self.width as f64 { 0.0 } else { y },
        )
    }

    fn cell_of(&self, point: Point) -> Cell {
        let i = (point.x.floor() as usize).min(self.length - 1);
        let j = (point.y.floor() as usize).min(self.width - 1);
        (i, j)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agents_in_same_cell_are_neighbors() {
        let mut grid = Grid::new(10, 10, 3);
        grid.move_to(0, Point::new(2.2, 3.7));
        grid.move_to(1, Point::new(2.9, 3.1));
        grid.move_to(2, Point::new(5.0, 5.0));

        let mut ngh = grid.neighbors_of(0).to_vec();
        ngh.sort();
        assert_eq!(ngh, [0, 1]);
        assert_eq!(grid.neighbors_of(2), [2]);
    }

    #[test]
    fn moves_wrap_around_borders() {
        let mut grid = Grid::new(10, 8, 1);
        grid.move_to(0, Point::new(9.5, 7.5));
        grid.move_by(0, 1.0, 1.0);
        let loc = grid.positions[0];
        assert!((loc.x - 0.5).abs() < 1e-12);
        assert!((loc.y - 0.5).abs() < 1e-12);

        grid.move_by(0, -1.0, -1.0);
        let loc = grid.positions[0];
        assert!((loc.x - 9.5).abs() < 1e-12);
        assert!((loc.y - 7.5).abs() < 1e-12);
    }

    #[test]
    fn leaving_a_cell_updates_occupancy() {
        let mut grid = Grid::new(5, 5, 2);
        assert_eq!(grid.neighbors_of(0).len(), 2);
        grid.move_to(1, Point::new(4.0, 4.0));
        assert_eq!(grid.neighbors_of(0), [0]);
        assert_eq!(grid.neighbors_of(1), [1]);
    }
}
