//! In-process event feed
//!
//! Fans each event out to every live session on the caller's thread, so
//! arrival order is preserved. The daemon feeds it from stdin on platforms
//! without a native hook; tests drive it with [`ReplayHook::emit`].
//!
//! Line format: `press <key>` / `release <key>`, where `<key>` is a single
//! character, a key name (`esc`, `shift_l`, `f1`) or `raw:<text>` for the
//! hook's fallback textual form. Blank lines and `#` comments are skipped.

use std::io::BufRead;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use super::{HookSession, InputHook, KeyEventSink};
use crate::error::HookError;
use crate::hotkey::{KeyEvent, RawKey};

type SinkList = Mutex<Vec<(u64, Arc<dyn KeyEventSink>)>>;

/// Errors parsing a replay line
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayParseError {
    #[error("unknown event kind {0:?}, expected press or release")]
    UnknownKind(String),

    #[error("missing key after {0:?}")]
    MissingKey(String),
}

/// Parse one replay line; `Ok(None)` for blank lines and comments
pub fn parse_event_line(line: &str) -> Result<Option<KeyEvent>, ReplayParseError> {
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let (kind, rest) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
    // Keep a lone space as the key itself: "press  " presses the space bar
    let key = if rest == " " { rest } else { rest.trim() };
    if key.is_empty() {
        return Err(ReplayParseError::MissingKey(kind.to_string()));
    }

    let raw = if let Some(repr) = key.strip_prefix("raw:") {
        RawKey::Other(repr.to_string())
    } else {
        let mut chars = key.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => RawKey::Char(c),
            _ => RawKey::Named(key.to_string()),
        }
    };

    match kind.to_ascii_lowercase().as_str() {
        "press" | "down" => Ok(Some(KeyEvent::press(raw))),
        "release" | "up" => Ok(Some(KeyEvent::release(raw))),
        other => Err(ReplayParseError::UnknownKind(other.to_string())),
    }
}

/// Hook backed by explicit event injection
pub struct ReplayHook {
    sinks: Arc<SinkList>,
    next_id: AtomicU64,
}

impl ReplayHook {
    pub fn new() -> Self {
        Self {
            sinks: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Deliver an event to every live session; returns how many received it
    pub fn emit(&self, event: &KeyEvent) -> usize {
        // Snapshot so sinks run without the list locked
        let sinks: Vec<Arc<dyn KeyEventSink>> = self
            .sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, sink)| Arc::clone(sink))
            .collect();

        for sink in &sinks {
            sink.on_event(event);
        }
        sinks.len()
    }

    pub fn session_count(&self) -> usize {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Read events line by line on a dedicated thread until EOF
    pub fn spawn_reader<R>(self: &Arc<Self>, reader: R) -> Result<JoinHandle<()>, HookError>
    where
        R: BufRead + Send + 'static,
    {
        let hook = Arc::clone(self);
        thread::Builder::new()
            .name("replay-hook".to_string())
            .spawn(move || {
                info!("replay reader started");
                for (line_no, line) in reader.lines().enumerate() {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            warn!(?e, "replay input failed");
                            break;
                        }
                    };
                    match parse_event_line(&line) {
                        Ok(Some(event)) => {
                            let delivered = hook.emit(&event);
                            debug!(?event, delivered, "replayed event");
                        }
                        Ok(None) => {}
                        Err(e) => warn!(line = line_no + 1, error = %e, "skipping replay line"),
                    }
                }
                info!("replay reader reached end of input");
            })
            .map_err(|e| HookError::ThreadSpawn(e.to_string()))
    }
}

impl Default for ReplayHook {
    fn default() -> Self {
        Self::new()
    }
}

impl InputHook for ReplayHook {
    fn start(&self, sink: Arc<dyn KeyEventSink>) -> Result<Box<dyn HookSession>, HookError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, sink));

        Ok(Box::new(ReplaySession {
            id,
            sinks: Arc::downgrade(&self.sinks),
            running: true,
        }))
    }

    fn name(&self) -> &'static str {
        "replay"
    }
}

struct ReplaySession {
    id: u64,
    sinks: Weak<SinkList>,
    running: bool,
}

impl HookSession for ReplaySession {
    fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        if let Some(sinks) = self.sinks.upgrade() {
            sinks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

impl Drop for ReplaySession {
    fn drop(&mut self) {
        self.stop();
    }
}
