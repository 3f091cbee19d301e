//! Synthetic keyboard and mouse input.
//!
//! `InputController` owns the held-key set and turns one `Action` per cycle into key
//! transitions on an `InputBackend`. Backends:
//! - `RecordingBackend`: dry run, records events
//! - `XdotoolBackend`: X11 via the `xdotool` tool

mod backend;
pub mod backends;
mod controller;
pub mod keys;
mod ledger;

pub use backend::InputBackend;
pub use backends::{InputEvent, RecordingBackend, RecordingHandle, XdotoolBackend};
pub use controller::{
    ControllerConfig, InputController, AXIS_DEAD_ZONE, DEFAULT_MAX_CONSECUTIVE_FAILURES,
    DEFAULT_STALE_HOLD_TICKS,
};
pub use keys::{Key, KeyBinds, KeyCombo, MouseButton};
pub use ledger::{InjectionLedger, PointerMove};
