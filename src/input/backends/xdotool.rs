//! X11 input injection through the `xdotool` command line tool.
//!
//! Every call is a short-lived child process. The tool is looked up on `PATH` once at
//! construction so a missing binary fails at start instead of mid-fight.

use regex::Regex;
use std::process::Command;
use std::sync::OnceLock;

use crate::error::{PilotError, Result};
use crate::input::backend::InputBackend;
use crate::input::keys::MouseButton;

pub struct XdotoolBackend {
    program: String,
}

impl XdotoolBackend {
    pub fn new() -> Result<Self> {
        Self::with_program("xdotool")
    }

    pub fn with_program(program: &str) -> Result<Self> {
        let backend = Self {
            program: program.to_string(),
        };
        backend
            .run(&["version"])
            .map_err(|e| PilotError::InputInjectionFailed(format!("{} unusable: {}", program, e)))?;
        Ok(backend)
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| {
                PilotError::InputInjectionFailed(format!("spawn {}: {}", self.program, e))
            })?;
        if !output.status.success() {
            return Err(PilotError::InputInjectionFailed(format!(
                "{} {} exited with {}: {}",
                self.program,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// First window whose title contains `title`.
    pub fn search_window(&self, title: &str) -> Result<Option<String>> {
        match self.run(&["search", "--name", title]) {
            Ok(out) => Ok(out.lines().map(str::trim).find(|l| !l.is_empty()).map(String::from)),
            // xdotool exits non-zero when nothing matches.
            Err(_) => Ok(None),
        }
    }

    pub fn activate_window(&self, window_id: &str) -> Result<()> {
        self.run(&["windowactivate", window_id]).map(|_| ())
    }
}

impl InputBackend for XdotoolBackend {
    fn name(&self) -> &'static str {
        "xdotool"
    }

    fn key_down(&mut self, key: &str) -> Result<()> {
        self.run(&["keydown", key]).map(|_| ())
    }

    fn key_up(&mut self, key: &str) -> Result<()> {
        self.run(&["keyup", key]).map(|_| ())
    }

    fn button_down(&mut self, button: MouseButton) -> Result<()> {
        self.run(&["mousedown", button_code(button)]).map(|_| ())
    }

    fn button_up(&mut self, button: MouseButton) -> Result<()> {
        self.run(&["mouseup", button_code(button)]).map(|_| ())
    }

    fn move_pointer(&mut self, x: i32, y: i32) -> Result<()> {
        let (x, y) = (x.to_string(), y.to_string());
        self.run(&["mousemove", &x, &y]).map(|_| ())
    }

    fn pointer_position(&mut self) -> Result<(i32, i32)> {
        let out = self.run(&["getmouselocation", "--shell"])?;
        parse_mouse_location(&out).ok_or_else(|| {
            PilotError::InputInjectionFailed(format!("unparseable pointer location: {}", out.trim()))
        })
    }
}

fn button_code(button: MouseButton) -> &'static str {
    match button {
        MouseButton::Left => "1",
        MouseButton::Middle => "2",
        MouseButton::Right => "3",
    }
}

/// Parse `getmouselocation --shell` output (`X=..`, `Y=..` lines).
pub fn parse_mouse_location(out: &str) -> Option<(i32, i32)> {
    static X: OnceLock<Regex> = OnceLock::new();
    static Y: OnceLock<Regex> = OnceLock::new();
    let x = X.get_or_init(|| Regex::new(r"(?m)^X=(-?\d+)").expect("static pattern"));
    let y = Y.get_or_init(|| Regex::new(r"(?m)^Y=(-?\d+)").expect("static pattern"));
    Some((
        x.captures(out)?[1].parse().ok()?,
        y.captures(out)?[1].parse().ok()?,
    ))
}
