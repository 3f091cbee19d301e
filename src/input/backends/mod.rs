pub mod recording;
pub mod xdotool;

pub use recording::{InputEvent, RecordingBackend, RecordingHandle};
pub use xdotool::XdotoolBackend;
