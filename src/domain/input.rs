//! Input device identity and selection preference

use std::fmt;

/// Rough class of an input device, used for reconnection preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Headset, USB or Bluetooth microphone
    Peripheral,
    /// The device's own microphone
    BuiltIn,
}

/// A selectable audio input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPort {
    /// Stable identifier, typically the device name
    pub id: String,
    pub kind: InputKind,
}

impl InputPort {
    pub fn new(id: impl Into<String>, kind: InputKind) -> Self {
        Self { id: id.into(), kind }
    }
}

impl fmt::Display for InputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Pick the input to capture from, in preference order: the previously
/// used device if it is present again, then any peripheral, then the
/// built-in microphone.
pub fn choose_input<'a>(
    previous: Option<&InputPort>,
    available: &'a [InputPort],
) -> Option<&'a InputPort> {
    if let Some(prev) = previous {
        if let Some(found) = available.iter().find(|p| p.id == prev.id) {
            return Some(found);
        }
    }
    available
        .iter()
        .find(|p| p.kind == InputKind::Peripheral)
        .or_else(|| available.iter().find(|p| p.kind == InputKind::BuiltIn))
}
