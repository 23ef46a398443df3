//! Global key hook using macOS CGEventTap
//!
//! Listen-only tap on key down/up and flags-changed events. Runs on a
//! dedicated thread with its own CFRunLoop; events are handed to the sink
//! from that thread in arrival order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventTapProxy, CGEventType, EventField,
};
use tracing::{error, info, warn};

use super::{HookSession, InputHook, KeyEventSink};
use crate::error::HookError;
use crate::hotkey::{KeyEvent, RawKey};

/// How long `start` waits for the tap thread to create the tap
const STARTUP_TIMEOUT: Duration = Duration::from_secs(1);

/// CGEventTap-backed hook; needs the Accessibility permission
#[derive(Debug, Default, Clone, Copy)]
pub struct MacHook;

impl InputHook for MacHook {
    fn start(&self, sink: Arc<dyn KeyEventSink>) -> Result<Box<dyn HookSession>, HookError> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), HookError>>();

        thread::Builder::new()
            .name("mac-event-tap".to_string())
            .spawn(move || {
                info!("event tap thread started");

                if let Err(e) = run_event_loop(sink, Arc::clone(&thread_running), &ready_tx) {
                    error!(?e, "event tap error");
                    let _ = ready_tx.send(Err(e));
                }

                thread_running.store(false, Ordering::SeqCst);
                info!("event tap thread stopped");
            })
            .map_err(|e| HookError::ThreadSpawn(e.to_string()))?;

        await_ready(&ready_rx, &running)?;
        Ok(Box::new(MacSession { running }))
    }

    fn name(&self) -> &'static str {
        "cg-event-tap"
    }
}

struct MacSession {
    running: Arc<AtomicBool>,
}

impl HookSession for MacSession {
    fn stop(&mut self) {
        // The run loop notices within one 100ms slice
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for MacSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Wait for the tap thread to report whether the tap is live
fn await_ready(
    ready_rx: &mpsc::Receiver<Result<(), HookError>>,
    running: &AtomicBool,
) -> Result<(), HookError> {
    let outcome = match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(HookError::Unavailable(
            "event tap did not start in time".into(),
        )),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(HookError::Unavailable(
            "event tap thread exited during startup".into(),
        )),
    };
    if outcome.is_err() {
        running.store(false, Ordering::SeqCst);
    }
    outcome
}

/// Run the CFRunLoop with the event tap until `running` clears
///
/// Sends `Ok(())` on `ready` once the tap is enabled; setup errors are
/// returned to the caller instead.
fn run_event_loop(
    sink: Arc<dyn KeyEventSink>,
    running: Arc<AtomicBool>,
    ready: &mpsc::Sender<Result<(), HookError>>,
) -> Result<(), HookError> {
    let (callback_tx, callback_rx) = mpsc::channel::<KeyEvent>();

    // Tap callback: translate and hand off, nothing else
    let callback = move |_proxy: CGEventTapProxy,
                         event_type: CGEventType,
                         event: &CGEvent|
                         -> Option<CGEvent> {
        match event_type {
            CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                warn!("event tap disabled by the system");
            }
            _ => {
                if let Some(key_event) = translate(event_type, event) {
                    let _ = callback_tx.send(key_event);
                }
            }
        }
        Some(event.clone())
    };

    let tap = CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![
            CGEventType::KeyDown,
            CGEventType::KeyUp,
            CGEventType::FlagsChanged,
        ],
        callback,
    )
    .map_err(|_| {
        HookError::Unavailable("failed to create event tap - check Accessibility permissions".into())
    })?;

    let run_loop_source = tap
        .mach_port
        .create_runloop_source(0)
        .map_err(|_| HookError::Unavailable("failed to create run loop source".into()))?;
    let run_loop = CFRunLoop::get_current();

    unsafe {
        run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
    }
    tap.enable();

    info!("event tap created and enabled");
    let _ = ready.send(Ok(()));

    while running.load(Ordering::SeqCst) {
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, Duration::from_millis(100), true);
        }

        while let Ok(event) = callback_rx.try_recv() {
            sink.on_event(&event);
        }
    }

    Ok(())
}

fn translate(event_type: CGEventType, event: &CGEvent) -> Option<KeyEvent> {
    let keycode = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE);
    match event_type {
        CGEventType::KeyDown => Some(KeyEvent::press(key_for_keycode(keycode))),
        CGEventType::KeyUp => Some(KeyEvent::release(key_for_keycode(keycode))),
        CGEventType::FlagsChanged => modifier_transition(keycode, event.get_flags()),
        _ => None,
    }
}

/// Flags-changed events carry the modifier's keycode; whether it went down
/// or up is read from the flag word
fn modifier_transition(keycode: i64, flags: CGEventFlags) -> Option<KeyEvent> {
    let (name, flag) = match keycode {
        0x38 => ("shift_l", CGEventFlags::CGEventFlagShift),
        0x3C => ("shift_r", CGEventFlags::CGEventFlagShift),
        0x3B => ("ctrl_l", CGEventFlags::CGEventFlagControl),
        0x3E => ("ctrl_r", CGEventFlags::CGEventFlagControl),
        0x3A => ("alt_l", CGEventFlags::CGEventFlagAlternate),
        0x3D => ("alt_r", CGEventFlags::CGEventFlagAlternate),
        0x37 => ("cmd_l", CGEventFlags::CGEventFlagCommand),
        0x36 => ("cmd_r", CGEventFlags::CGEventFlagCommand),
        _ => return None,
    };

    let key = RawKey::named(name);
    if flags.contains(flag) {
        Some(KeyEvent::press(key))
    } else {
        Some(KeyEvent::release(key))
    }
}

/// ANSI-layout virtual keycodes
fn key_for_keycode(keycode: i64) -> RawKey {
    let ch = match keycode {
        0x00 => 'a',
        0x01 => 's',
        0x02 => 'd',
        0x03 => 'f',
        0x04 => 'h',
        0x05 => 'g',
        0x06 => 'z',
        0x07 => 'x',
        0x08 => 'c',
        0x09 => 'v',
        0x0B => 'b',
        0x0C => 'q',
        0x0D => 'w',
        0x0E => 'e',
        0x0F => 'r',
        0x10 => 'y',
        0x11 => 't',
        0x12 => '1',
        0x13 => '2',
        0x14 => '3',
        0x15 => '4',
        0x16 => '6',
        0x17 => '5',
        0x18 => '=',
        0x19 => '9',
        0x1A => '7',
        0x1B => '-',
        0x1C => '8',
        0x1D => '0',
        0x1E => ']',
        0x1F => 'o',
        0x20 => 'u',
        0x21 => '[',
        0x22 => 'i',
        0x23 => 'p',
        0x25 => 'l',
        0x26 => 'j',
        0x27 => '\'',
        0x28 => 'k',
        0x29 => ';',
        0x2A => '\\',
        0x2B => ',',
        0x2C => '/',
        0x2D => 'n',
        0x2E => 'm',
        0x2F => '.',
        0x32 => '`',
        _ => return named_keycode(keycode),
    };
    RawKey::Char(ch)
}

fn named_keycode(keycode: i64) -> RawKey {
    let name = match keycode {
        0x24 => "enter",
        0x30 => "tab",
        0x31 => "space",
        0x33 => "backspace",
        0x35 => "esc",
        0x73 => "home",
        0x74 => "page_up",
        0x75 => "delete",
        0x77 => "end",
        0x79 => "page_down",
        0x7A => "f1",
        0x78 => "f2",
        0x63 => "f3",
        0x76 => "f4",
        0x60 => "f5",
        0x61 => "f6",
        0x62 => "f7",
        0x64 => "f8",
        0x65 => "f9",
        0x6D => "f10",
        0x67 => "f11",
        0x6F => "f12",
        0x7B => "left",
        0x7C => "right",
        0x7D => "down",
        0x7E => "up",
        _ => return RawKey::Other(format!("Key.keycode_{keycode}")),
    };
    RawKey::named(name)
}
