//! Collaborators for hosts without a native mouse or screen backend
//!
//! They log and record what they were asked to do. The daemon uses them on
//! platforms without native support; tests inspect the recordings.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info};

use super::geometry::{Point, ScreenRect};
use super::{MouseController, ScreenGeometry, SystemMonitor};
use crate::error::PlatformError;

/// One recorded pointer action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseAction {
    Move(Point),
    SmoothMove(Point),
    LeftClick(Point),
    RightClick(Point),
}

/// Pointer that only moves in memory
#[derive(Debug, Default)]
pub struct HeadlessMouse {
    position: Mutex<Point>,
    actions: Mutex<Vec<MouseAction>>,
}

impl HeadlessMouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything done so far, oldest first
    pub fn actions(&self) -> Vec<MouseAction> {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, action: MouseAction, to: Point) {
        *self.position.lock().unwrap_or_else(PoisonError::into_inner) = to;
        self.actions.lock().unwrap_or_else(PoisonError::into_inner).push(action);
    }
}

impl MouseController for HeadlessMouse {
    fn move_to(&self, point: Point) -> Result<(), PlatformError> {
        debug!(%point, "pointer moved");
        self.record(MouseAction::Move(point), point);
        Ok(())
    }

    fn smooth_move_to(&self, point: Point, duration: Duration) -> Result<(), PlatformError> {
        debug!(%point, duration_ms = duration.as_millis() as u64, "pointer glided");
        self.record(MouseAction::SmoothMove(point), point);
        Ok(())
    }

    fn left_click(&self, point: Point) -> Result<(), PlatformError> {
        info!(%point, "left click");
        self.record(MouseAction::LeftClick(point), point);
        Ok(())
    }

    fn right_click(&self, point: Point) -> Result<(), PlatformError> {
        info!(%point, "right click");
        self.record(MouseAction::RightClick(point), point);
        Ok(())
    }

    fn cursor_position(&self) -> Point {
        *self.position.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-size virtual screen
#[derive(Debug, Clone, Copy)]
pub struct HeadlessScreen {
    rect: ScreenRect,
}

impl HeadlessScreen {
    pub fn new(rect: ScreenRect) -> Self {
        Self { rect }
    }
}

impl Default for HeadlessScreen {
    fn default() -> Self {
        Self::new(ScreenRect::new(0, 0, 1920, 1080))
    }
}

impl ScreenGeometry for HeadlessScreen {
    fn primary_rect(&self) -> ScreenRect {
        self.rect
    }
}

/// System hooks with no real resources behind them
#[derive(Debug)]
pub struct HeadlessSystem {
    compatible: bool,
    tuned: AtomicBool,
    monitoring: AtomicBool,
}

impl HeadlessSystem {
    pub fn new() -> Self {
        Self {
            compatible: true,
            tuned: AtomicBool::new(false),
            monitoring: AtomicBool::new(true),
        }
    }

    /// A system that fails the compatibility check
    pub fn incompatible() -> Self {
        Self {
            compatible: false,
            ..Self::new()
        }
    }

    pub fn is_tuned(&self) -> bool {
        self.tuned.load(Ordering::SeqCst)
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }
}

impl Default for HeadlessSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMonitor for HeadlessSystem {
    fn check_compatibility(&self) -> Result<(), PlatformError> {
        if self.compatible {
            Ok(())
        } else {
            Err(PlatformError::SystemResource(
                "system compatibility check failed".into(),
            ))
        }
    }

    fn optimize_for_performance(&self) -> Result<(), PlatformError> {
        self.tuned.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_monitoring(&self) {
        if self.monitoring.swap(false, Ordering::SeqCst) {
            debug!("resource monitoring stopped");
        }
    }

    fn restore_defaults(&self) {
        self.tuned.store(false, Ordering::SeqCst);
    }
}
