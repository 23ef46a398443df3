//! Screen coordinates

use std::fmt;

use serde::Serialize;

/// A point in screen pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Axis-aligned screen rectangle; `width`/`height` are in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScreenRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl ScreenRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.x < self.x + self.width
            && point.y >= self.y
            && point.y < self.y + self.height
    }

    /// Nearest point inside the rectangle
    pub fn clamp(&self, point: Point) -> Point {
        let max_x = self.x + (self.width - 1).max(0);
        let max_y = self.y + (self.height - 1).max(0);
        Point {
            x: point.x.clamp(self.x, max_x),
            y: point.y.clamp(self.y, max_y),
        }
    }

    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2,
            y: self.y + self.height / 2,
        }
    }

    /// Cell (`row`, `col`) of an `n` x `n` split; the last row and column
    /// absorb the remainder so cells tile the rectangle exactly
    pub fn grid_cell(&self, n: i32, row: i32, col: i32) -> ScreenRect {
        let n = n.max(1);
        let row = row.clamp(0, n - 1);
        let col = col.clamp(0, n - 1);
        let cell_w = self.width / n;
        let cell_h = self.height / n;

        let x = self.x + col * cell_w;
        let y = self.y + row * cell_h;
        let width = if col == n - 1 { self.x + self.width - x } else { cell_w };
        let height = if row == n - 1 { self.y + self.height - y } else { cell_h };
        ScreenRect::new(x, y, width.max(1), height.max(1))
    }
}

impl fmt::Display for ScreenRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}
