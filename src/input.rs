//! Input event types for data channel forwarding
//!
//! Controllers send these upstream as JSON on the `input` data channel. Zero
//! valued fields are left out of the encoded form, so a left click at the
//! origin is just `{"type":"mouse_down"}`.

use serde::{Deserialize, Serialize};

/// Input event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputEventType {
    MouseMove,
    MouseDown,
    MouseUp,
    MouseScroll,
    KeyDown,
    KeyUp,
}

/// Mouse buttons as carried in `button`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MouseButton {
    Left = 0,
    Right = 1,
    Middle = 2,
}

/// Modifier bitfield
pub mod modifiers {
    pub const SHIFT: u8 = 1;
    pub const CTRL: u8 = 2;
    pub const ALT: u8 = 4;
    pub const CMD: u8 = 8;
}

/// Input event wire format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    #[serde(rename = "type")]
    pub event_type: InputEventType,

    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub x: f64,

    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub y: f64,

    #[serde(default, skip_serializing_if = "is_zero_u8")]
    pub button: u8,

    #[serde(rename = "keyCode", default, skip_serializing_if = "is_zero_u16")]
    pub key_code: u16,

    #[serde(default, skip_serializing_if = "is_zero_u8")]
    pub modifiers: u8,

    #[serde(rename = "scrollDX", default, skip_serializing_if = "is_zero_f64")]
    pub scroll_dx: f64,

    #[serde(rename = "scrollDY", default, skip_serializing_if = "is_zero_f64")]
    pub scroll_dy: f64,
}

impl InputEvent {
    fn new(event_type: InputEventType) -> Self {
        Self {
            event_type,
            x: 0.0,
            y: 0.0,
            button: 0,
            key_code: 0,
            modifiers: 0,
            scroll_dx: 0.0,
            scroll_dy: 0.0,
        }
    }

    pub fn mouse_move(x: f64, y: f64) -> Self {
        Self { x, y, ..Self::new(InputEventType::MouseMove) }
    }

    pub fn mouse_down(x: f64, y: f64, button: MouseButton) -> Self {
        Self {
            x,
            y,
            button: button as u8,
            ..Self::new(InputEventType::MouseDown)
        }
    }

    pub fn mouse_up(x: f64, y: f64, button: MouseButton) -> Self {
        Self {
            x,
            y,
            button: button as u8,
            ..Self::new(InputEventType::MouseUp)
        }
    }

    pub fn scroll(x: f64, y: f64, dx: f64, dy: f64) -> Self {
        Self {
            x,
            y,
            scroll_dx: dx,
            scroll_dy: dy,
            ..Self::new(InputEventType::MouseScroll)
        }
    }

    pub fn key_down(key_code: u16, modifiers: u8) -> Self {
        Self {
            key_code,
            modifiers,
            ..Self::new(InputEventType::KeyDown)
        }
    }

    pub fn key_up(key_code: u16, modifiers: u8) -> Self {
        Self {
            key_code,
            modifiers,
            ..Self::new(InputEventType::KeyUp)
        }
    }

    pub fn mouse_button(&self) -> Option<MouseButton> {
        match self.button {
            0 => Some(MouseButton::Left),
            1 => Some(MouseButton::Right),
            2 => Some(MouseButton::Middle),
            _ => None,
        }
    }

    pub fn has_modifier(&self, flag: u8) -> bool {
        self.modifiers & flag != 0
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn is_zero_f64(value: &f64) -> bool {
    *value == 0.0
}

fn is_zero_u8(value: &u8) -> bool {
    *value == 0
}

fn is_zero_u16(value: &u16) -> bool {
    *value == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_fields_are_omitted() {
        let json = InputEvent::mouse_down(0.0, 0.0, MouseButton::Left).to_json().unwrap();
        assert_eq!(json, r#"{"type":"mouse_down"}"#);

        let json = InputEvent::scroll(10.5, 20.0, 0.0, -3.0).to_json().unwrap();
        assert_eq!(json, r#"{"type":"mouse_scroll","x":10.5,"y":20.0,"scrollDY":-3.0}"#);
    }

    #[test]
    fn key_event_wire_names() {
        let event = InputEvent::key_down(0x08, modifiers::CMD | modifiers::SHIFT);
        assert_eq!(event.to_json().unwrap(), r#"{"type":"key_down","keyCode":8,"modifiers":9}"#);
        assert!(event.has_modifier(modifiers::CMD));
        assert!(!event.has_modifier(modifiers::ALT));
    }

    #[test]
    fn decodes_sparse_events() {
        let event: InputEvent = serde_json::from_str(r#"{"type":"mouse_up","button":1}"#).unwrap();
        assert_eq!(event.event_type, InputEventType::MouseUp);
        assert_eq!(event.mouse_button(), Some(MouseButton::Right));
        assert_eq!(event.x, 0.0);
    }
}
