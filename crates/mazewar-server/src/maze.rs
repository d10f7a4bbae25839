// maze.rs — the shared maze grid: avatar placement, movement, line of
// sight, and periscope view extraction.
//
// Every operation takes the grid lock for its whole duration, so each call
// sees and produces one consistent snapshot. The placement PRNG lives under
// the same lock.

use std::time::{SystemTime, UNIX_EPOCH};

use mazewar_common::defs::{
    is_avatar, is_empty, Direction, View, ViewRow, CORRIDOR, EMPTY, LEFT_WALL, RIGHT_WALL,
    VIEW_WIDTH,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("maze template is empty")]
    Empty,
    #[error("maze template is not rectangular: row {row} is {len} cells wide, expected {expected}")]
    NotRectangular {
        row: usize,
        len: usize,
        expected: usize,
    },
    #[error("reserved character {0:?} in maze template (uppercase letters identify players)")]
    Reserved(char),
}

pub struct Maze {
    grid: Mutex<Grid>,
}

struct Grid {
    rows: usize,
    cols: usize,
    cells: Vec<u8>,
    rng: StdRng,
}

impl Grid {
    fn in_bounds(&self, row: i64, col: i64) -> bool {
        row >= 0 && (row as usize) < self.rows && col >= 0 && (col as usize) < self.cols
    }

    fn at(&self, row: usize, col: usize) -> u8 {
        self.cells[row * self.cols + col]
    }

    fn set(&mut self, row: usize, col: usize, cell: u8) {
        self.cells[row * self.cols + col] = cell;
    }

    /// Cell lookup for the wall columns of a view row: coordinates one step
    /// outside the grid read as EMPTY, so templates are not required to
    /// carry a solid border.
    fn at_or_empty(&self, row: i64, col: i64) -> u8 {
        if self.in_bounds(row, col) {
            self.at(row as usize, col as usize)
        } else {
            EMPTY
        }
    }
}

impl Maze {
    /// Build the grid from a template, one string per row. The template
    /// must be non-empty, rectangular, and free of uppercase letters. The
    /// placement PRNG is seeded from the system clock.
    pub fn from_template<S: AsRef<str>>(template: &[S]) -> Result<Maze, TemplateError> {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as u64);
        Maze::from_template_seeded(template, seed)
    }

    /// Like `from_template` with a caller-supplied PRNG seed, so tests can
    /// pin down random placement.
    pub fn from_template_seeded<S: AsRef<str>>(
        template: &[S],
        seed: u64,
    ) -> Result<Maze, TemplateError> {
        if template.is_empty() {
            return Err(TemplateError::Empty);
        }
        let rows = template.len();
        let cols = template[0].as_ref().len();
        if cols == 0 {
            return Err(TemplateError::Empty);
        }

        let mut cells = Vec::with_capacity(rows * cols);
        for (row, line) in template.iter().enumerate() {
            let line = line.as_ref();
            if line.len() != cols {
                return Err(TemplateError::NotRectangular {
                    row,
                    len: line.len(),
                    expected: cols,
                });
            }
            if let Some(reserved) = line.chars().find(|c| c.is_ascii_uppercase()) {
                return Err(TemplateError::Reserved(reserved));
            }
            cells.extend_from_slice(line.as_bytes());
        }

        Ok(Maze {
            grid: Mutex::new(Grid {
                rows,
                cols,
                cells,
                rng: StdRng::seed_from_u64(seed),
            }),
        })
    }

    pub fn dimensions(&self) -> (usize, usize) {
        let grid = self.grid.lock();
        (grid.rows, grid.cols)
    }

    /// Put an avatar into a specific cell. Succeeds only when the cell is
    /// in bounds and EMPTY.
    pub fn place(&self, avatar: u8, row: usize, col: usize) -> bool {
        let mut grid = self.grid.lock();
        if !grid.in_bounds(row as i64, col as i64) || !is_empty(grid.at(row, col)) {
            return false;
        }
        grid.set(row, col, avatar);
        true
    }

    /// Put an avatar into a uniformly chosen EMPTY cell. Returns the chosen
    /// coordinates, or `None` (with no mutation) when the maze is full.
    pub fn place_random(&self, avatar: u8) -> Option<(usize, usize)> {
        let mut grid = self.grid.lock();
        let mut empties = Vec::new();
        for row in 0..grid.rows {
            for col in 0..grid.cols {
                if is_empty(grid.at(row, col)) {
                    empties.push((row, col));
                }
            }
        }
        if empties.is_empty() {
            return None;
        }
        let (row, col) = empties[grid.rng.gen_range(0..empties.len())];
        grid.set(row, col, avatar);
        Some((row, col))
    }

    /// Clear a cell, but only if it currently holds exactly this avatar.
    /// Out-of-bounds coordinates or a mismatched cell are a no-op.
    pub fn remove(&self, avatar: u8, row: usize, col: usize) {
        let mut grid = self.grid.lock();
        if grid.in_bounds(row as i64, col as i64) && grid.at(row, col) == avatar {
            grid.set(row, col, EMPTY);
        }
    }

    /// Move the avatar at (row, col) one cell in `direction`. Succeeds only
    /// when the source holds an avatar and the destination is in bounds and
    /// EMPTY; on success the avatar is transferred and the source cleared.
    pub fn step(&self, row: usize, col: usize, direction: Direction) -> bool {
        let mut grid = self.grid.lock();
        if !grid.in_bounds(row as i64, col as i64) {
            return false;
        }
        let object = grid.at(row, col);
        if !is_avatar(object) {
            return false;
        }
        let (dr, dc) = direction.delta();
        let (new_row, new_col) = (row as i64 + dr, col as i64 + dc);
        if !grid.in_bounds(new_row, new_col) || !is_empty(grid.at(new_row as usize, new_col as usize))
        {
            return false;
        }
        grid.set(row, col, EMPTY);
        grid.set(new_row as usize, new_col as usize, object);
        true
    }

    /// Scan outward from (row, col) in `direction`. The first non-EMPTY
    /// cell ends the scan: its avatar if it holds one, otherwise nothing.
    /// Falling off the grid also ends the scan with nothing.
    pub fn find_target(&self, row: usize, col: usize, direction: Direction) -> Option<u8> {
        let grid = self.grid.lock();
        let (dr, dc) = direction.delta();
        let (mut r, mut c) = (row as i64 + dr, col as i64 + dc);
        while grid.in_bounds(r, c) {
            let object = grid.at(r as usize, c as usize);
            if !is_empty(object) {
                return is_avatar(object).then_some(object);
            }
            r += dr;
            c += dc;
        }
        None
    }

    /// Extract up to `max_depth` rows of the three-column periscope view
    /// from (row, col) looking along `gaze`. Extraction stops before an
    /// out-of-bounds corridor cell, and the first non-EMPTY corridor cell
    /// beyond the viewer's own is included and ends the view.
    pub fn view(&self, row: usize, col: usize, gaze: Direction, max_depth: usize) -> View {
        let grid = self.grid.lock();
        let (dr, dc) = gaze.delta();
        let (lr, lc) = gaze.turn_left().delta();
        let (rr, rc) = gaze.turn_right().delta();

        let mut view = View::with_capacity(max_depth);
        for depth in 0..max_depth {
            let r = row as i64 + dr * depth as i64;
            let c = col as i64 + dc * depth as i64;
            if !grid.in_bounds(r, c) {
                break;
            }
            let mut view_row: ViewRow = [EMPTY; VIEW_WIDTH];
            view_row[LEFT_WALL] = grid.at_or_empty(r + lr, c + lc);
            view_row[CORRIDOR] = grid.at(r as usize, c as usize);
            view_row[RIGHT_WALL] = grid.at_or_empty(r + rr, c + rc);
            view.push(view_row);
            if depth > 0 && !is_empty(view_row[CORRIDOR]) {
                break;
            }
        }
        view
    }

    /// Dump the whole grid at trace level.
    pub fn trace_dump(&self) {
        if !tracing::enabled!(tracing::Level::TRACE) {
            return;
        }
        let grid = self.grid.lock();
        trace!(rows = grid.rows, cols = grid.cols, "maze state");
        for row in 0..grid.rows {
            let line = &grid.cells[row * grid.cols..(row + 1) * grid.cols];
            trace!("{}", String::from_utf8_lossy(line));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 5x7, walled border, one inner pillar at (2, 3).
    const SMALL: [&str; 5] = [
        "*******",
        "*     *",
        "*  #  *",
        "*     *",
        "*******",
    ];

    fn small_maze() -> Maze {
        Maze::from_template_seeded(&SMALL, 42).unwrap()
    }

    #[test]
    fn test_template_validation() {
        assert_eq!(
            Maze::from_template(&Vec::<String>::new()).err(),
            Some(TemplateError::Empty)
        );
        assert_eq!(
            Maze::from_template(&["***", "**"]).err(),
            Some(TemplateError::NotRectangular {
                row: 1,
                len: 2,
                expected: 3
            })
        );
        assert_eq!(
            Maze::from_template(&["***", "*Q*"]).err(),
            Some(TemplateError::Reserved('Q'))
        );
        assert!(Maze::from_template(&SMALL).is_ok());
    }

    #[test]
    fn test_dimensions() {
        assert_eq!(small_maze().dimensions(), (5, 7));
    }

    #[test]
    fn test_place_requires_empty_cell() {
        let maze = small_maze();
        assert!(maze.place(b'A', 1, 1));
        // occupied by the avatar now
        assert!(!maze.place(b'B', 1, 1));
        // wall
        assert!(!maze.place(b'B', 0, 0));
        // out of bounds
        assert!(!maze.place(b'B', 9, 9));
    }

    #[test]
    fn test_remove_only_matching_avatar() {
        let maze = small_maze();
        assert!(maze.place(b'A', 1, 1));
        maze.remove(b'B', 1, 1); // mismatch: no-op
        assert!(!maze.place(b'C', 1, 1));
        maze.remove(b'A', 1, 1);
        assert!(maze.place(b'C', 1, 1));
        maze.remove(b'Z', 9, 9); // out of bounds: no-op
    }

    #[test]
    fn test_step_moves_avatar() {
        let maze = small_maze();
        assert!(maze.place(b'A', 1, 1));
        assert!(maze.step(1, 1, Direction::East));
        // origin is free again, destination is not
        assert!(maze.place(b'B', 1, 1));
        assert!(!maze.place(b'C', 1, 2));
    }

    #[test]
    fn test_step_blocked_at_walls_and_avatars() {
        let maze = small_maze();
        assert!(maze.place(b'A', 1, 1));
        // border walls
        assert!(!maze.step(1, 1, Direction::North));
        assert!(!maze.step(1, 1, Direction::West));
        // another avatar
        assert!(maze.place(b'B', 1, 2));
        assert!(!maze.step(1, 1, Direction::East));
        // no avatar at the source
        assert!(!maze.step(3, 3, Direction::East));
        // nothing moved
        assert!(!maze.place(b'C', 1, 1));
        assert!(!maze.place(b'C', 1, 2));
    }

    #[test]
    fn test_find_target() {
        let maze = small_maze();
        assert!(maze.place(b'A', 1, 1));
        assert!(maze.place(b'B', 1, 5));
        // clear corridor between A and B
        assert_eq!(maze.find_target(1, 1, Direction::East), Some(b'B'));
        assert_eq!(maze.find_target(1, 5, Direction::West), Some(b'A'));
        // first non-empty cell is a wall: scan ends with nothing
        assert_eq!(maze.find_target(1, 1, Direction::North), None);
        // pillar shadows the shot
        assert!(maze.place(b'C', 2, 1));
        assert!(maze.place(b'D', 2, 5));
        assert_eq!(maze.find_target(2, 1, Direction::East), None);
        // empty corridor to the border
        assert_eq!(maze.find_target(3, 1, Direction::East), None);
    }

    #[test]
    fn test_view_corridor_matches_grid() {
        let maze = small_maze();
        assert!(maze.place(b'A', 1, 1));
        let view = maze.view(1, 1, Direction::East, 16);
        // corridor runs to the far wall: depths 0..=5 are in bounds
        assert_eq!(view.len(), 6);
        assert_eq!(view[0][CORRIDOR], b'A');
        for row in &view[1..5] {
            assert_eq!(row[CORRIDOR], EMPTY);
        }
        assert_eq!(view[5][CORRIDOR], b'*');
        // looking East, the left wall is one row north
        assert_eq!(view[0][LEFT_WALL], b'*');
        assert_eq!(view[1][RIGHT_WALL], EMPTY);
        assert_eq!(view[2][RIGHT_WALL], b'#');
    }

    #[test]
    fn test_view_includes_blocker_and_stops() {
        let maze = small_maze();
        assert!(maze.place(b'A', 1, 1));
        assert!(maze.place(b'B', 1, 3));
        let view = maze.view(1, 1, Direction::East, 16);
        assert_eq!(view.len(), 3);
        assert_eq!(view[2][CORRIDOR], b'B');
    }

    #[test]
    fn test_view_respects_max_depth() {
        let maze = small_maze();
        let view = maze.view(1, 1, Direction::East, 2);
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn test_view_clamps_walls_outside_grid() {
        // no border: wall reads past the edge come back EMPTY
        let maze = Maze::from_template_seeded(&["   ", "   "], 1).unwrap();
        let view = maze.view(0, 0, Direction::East, 4);
        assert_eq!(view.len(), 3);
        for row in &view {
            assert_eq!(row[LEFT_WALL], EMPTY);
        }
    }

    #[test]
    fn test_view_from_the_border_looking_out() {
        let maze = Maze::from_template_seeded(&["   "], 1).unwrap();
        // one in-bounds row, then out of bounds
        assert_eq!(maze.view(0, 2, Direction::East, 4).len(), 1);
    }

    #[test]
    fn test_place_random_until_full() {
        let maze = Maze::from_template_seeded(&["* *", "* *"], 7).unwrap();
        let mut placed = Vec::new();
        for avatar in [b'A', b'B'] {
            let (row, col) = maze.place_random(avatar).unwrap();
            assert_eq!(col, 1);
            placed.push((row, col));
        }
        placed.sort_unstable();
        assert_eq!(placed, vec![(0, 1), (1, 1)]);
        // full now
        assert_eq!(maze.place_random(b'C'), None);
        // and the failed placement mutated nothing
        maze.remove(b'A', placed[0].0, 1);
        maze.remove(b'B', placed[1].0, 1);
        assert!(maze.place_random(b'C').is_some());
    }

    #[test]
    fn test_place_random_is_seed_deterministic() {
        let a = Maze::from_template_seeded(&SMALL, 99).unwrap();
        let b = Maze::from_template_seeded(&SMALL, 99).unwrap();
        for avatar in b'A'..=b'F' {
            assert_eq!(a.place_random(avatar), b.place_random(avatar));
        }
    }
}
