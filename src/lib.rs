//! Realm Pilot
//!
//! A perception-action control loop that plays a real-time action game by watching the
//! screen and driving the keyboard and mouse.
//!
//! # Architecture
//!
//! Each cycle runs a fixed pipeline:
//!
//! 1. **Capture**: grab the game window (`capture`).
//! 2. **Detect**: match the frame against a template library (`detect`).
//! 3. **Estimate**: read the health bar and place detections relative to the player (`state`).
//! 4. **Decide**: a closed state machine picks one `Action` (`decision`).
//! 5. **Act**: translate the action into key transitions without ever leaving a key stuck (`input`).
//!
//! The `safety` monitor can stop the session (stop file, Ctrl-C, hotkey) or hand control
//! back to a human operator at any point. `session` owns the threads.
//!
//! # Module Structure
//!
//! - `frame`, `geometry`: shared value types
//! - `capture`, `detect`, `state`, `decision`, `input`: pipeline stages
//! - `safety`, `session`: control and teardown
//! - `config`, `error`, `events`: ambient plumbing

pub mod capture;
pub mod config;
pub mod decision;
pub mod detect;
pub mod error;
pub mod events;
pub mod frame;
pub mod geometry;
pub mod input;
pub mod safety;
pub mod session;
pub mod state;

pub use capture::{open_source, CaptureBackoff, FrameSource};
pub use config::PilotConfig;
pub use decision::{Action, DecisionConfig, DecisionEngine, Mode, MovementMode};
pub use detect::{Detection, DetectionSet, Detector, TemplateLibrary};
pub use error::{PilotError, Result};
pub use events::PilotEvent;
pub use frame::{Frame, FrameStamp};
pub use geometry::{Region, Vec2};
pub use input::{InputBackend, InputController, Key, KeyBinds};
pub use safety::{CancelToken, SafetyMonitor, SafetyVerdict, StopReason};
pub use session::{BotSession, SessionMode, SessionReport, SessionShared, SessionSnapshot};
pub use state::{GameState, Hp, StateEstimator};
