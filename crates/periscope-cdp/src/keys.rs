//! Keyboard mapping for `Input.dispatchKeyEvent`.
//!
//! Maps mnemonic key names to the `key` / `code` / `windowsVirtualKeyCode`
//! triple CDP expects, and folds modifier names into the CDP bitmask
//! (Alt=1, Ctrl=2, Meta=4, Shift=8).

use periscope_types::CdpError;

/// Resolved key event parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyDefinition {
    pub key: String,
    pub code: String,
    pub windows_virtual_key_code: i64,
    /// Text produced by the key, when it produces any (printable keys,
    /// Enter).
    pub text: Option<String>,
}

/// Named keys understood by [`lookup_key`], with their DOM `code` and
/// Windows virtual key code.
const NAMED_KEYS: &[(&str, &str, i64, Option<&str>)] = &[
    ("Enter", "Enter", 13, Some("\r")),
    ("Escape", "Escape", 27, None),
    ("Tab", "Tab", 9, None),
    ("Backspace", "Backspace", 8, None),
    ("Delete", "Delete", 46, None),
    ("ArrowUp", "ArrowUp", 38, None),
    ("ArrowDown", "ArrowDown", 40, None),
    ("ArrowLeft", "ArrowLeft", 37, None),
    ("ArrowRight", "ArrowRight", 39, None),
    ("Home", "Home", 36, None),
    ("End", "End", 35, None),
    ("PageUp", "PageUp", 33, None),
    ("PageDown", "PageDown", 34, None),
    ("Space", "Space", 32, Some(" ")),
];

/// Resolve a mnemonic key name or single printable character.
///
/// Named keys match case-insensitively ("enter" works). Anything else must
/// be a single character; multi-character unknown names are rejected.
pub fn lookup_key(name: &str) -> Result<KeyDefinition, CdpError> {
    for (key, code, vk, text) in NAMED_KEYS {
        if key.eq_ignore_ascii_case(name) {
            return Ok(KeyDefinition {
                key: (*key).to_string(),
                code: (*code).to_string(),
                windows_virtual_key_code: *vk,
                text: text.map(str::to_string),
            });
        }
    }

    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) if !ch.is_control() => Ok(KeyDefinition {
            key: ch.to_string(),
            code: code_for_char(ch),
            windows_virtual_key_code: virtual_key_for_char(ch),
            text: Some(ch.to_string()),
        }),
        _ => Err(CdpError::input_rejected(format!(
            "unknown key name '{name}'"
        ))),
    }
}

/// DOM `code` for a printable character, best effort.
fn code_for_char(ch: char) -> String {
    if ch.is_ascii_alphabetic() {
        format!("Key{}", ch.to_ascii_uppercase())
    } else if ch.is_ascii_digit() {
        format!("Digit{ch}")
    } else if ch == ' ' {
        "Space".to_string()
    } else {
        String::new()
    }
}

/// Windows virtual key code for a printable character, best effort.
fn virtual_key_for_char(ch: char) -> i64 {
    if ch.is_ascii_alphanumeric() {
        ch.to_ascii_uppercase() as i64
    } else if ch == ' ' {
        32
    } else {
        0
    }
}

/// Fold modifier names into the CDP `modifiers` bitmask.
pub fn modifier_bitmask(modifiers: &[String]) -> Result<i64, CdpError> {
    let mut mask = 0i64;
    for modifier in modifiers {
        mask |= match modifier.to_ascii_lowercase().as_str() {
            "alt" => 1,
            "ctrl" | "control" => 2,
            "meta" | "cmd" | "command" => 4,
            "shift" => 8,
            other => {
                return Err(CdpError::input_rejected(format!(
                    "unknown modifier '{other}'"
                )))
            }
        };
    }
    Ok(mask)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
