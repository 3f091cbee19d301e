use crate::error::Result;

use super::keys::MouseButton;

/// Synthetic input sink.
///
/// Backends inject exactly what they are told. Held-key bookkeeping, release ordering
/// and failure escalation live in `InputController`, so a backend never needs to
/// remember what is down.
pub trait InputBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn key_down(&mut self, key: &str) -> Result<()>;

    fn key_up(&mut self, key: &str) -> Result<()>;

    fn button_down(&mut self, button: MouseButton) -> Result<()>;

    fn button_up(&mut self, button: MouseButton) -> Result<()>;

    /// Move the pointer to absolute screen coordinates.
    fn move_pointer(&mut self, x: i32, y: i32) -> Result<()>;

    /// Current pointer position in screen coordinates.
    fn pointer_position(&mut self) -> Result<(i32, i32)>;
}
