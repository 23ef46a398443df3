//! Grid navigation state
//!
//! The nine grid keys pick a cell of a 3x3 split of the current region,
//! which then becomes the region; the pointer follows the region's centre.

use keygrid_daemon::manager::{MouseButton, Point, ScreenRect};

const GRID_SIZE: i32 = 3;

/// Pointer action requested by a key in grid mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridAction {
    Hover(Point),
    Click(Point, MouseButton),
}

#[derive(Debug, Clone)]
pub struct Grid {
    screen: ScreenRect,
    region: ScreenRect,
}

impl Grid {
    pub fn new(screen: ScreenRect) -> Self {
        Self {
            screen,
            region: screen,
        }
    }

    pub fn region(&self) -> ScreenRect {
        self.region
    }

    /// Apply one accepted key; `None` when the key moves nothing
    pub fn handle(&mut self, token: &str) -> Option<GridAction> {
        if let Some((row, col)) = cell_for_key(token) {
            self.region = self.region.grid_cell(GRID_SIZE, row, col);
            return Some(GridAction::Hover(self.region.center()));
        }

        let center = self.region.center();
        match token {
            "return" => Some(GridAction::Click(center, MouseButton::Left)),
            "r" => Some(GridAction::Click(center, MouseButton::Right)),
            "h" => Some(GridAction::Hover(center)),
            "backspace" => {
                self.region = self.screen;
                None
            }
            _ => None,
        }
    }
}

fn cell_for_key(token: &str) -> Option<(i32, i32)> {
    let cell = match token {
        "q" => (0, 0),
        "w" => (0, 1),
        "e" => (0, 2),
        "a" => (1, 0),
        "s" => (1, 1),
        "d" => (1, 2),
        "z" => (2, 0),
        "x" => (2, 1),
        "c" => (2, 2),
        _ => return None,
    };
    Some(cell)
}
