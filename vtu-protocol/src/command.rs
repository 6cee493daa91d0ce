//! Interpretation of remote commands received in 0x80 frames.
//!
//! Server command payloads are null-padded vendor text with no formal
//! grammar, so classification is substring matching over the uppercased
//! text, in a fixed precedence order.

use serde::Serialize;

/// A remote command decoded from a server frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Payload text after stripping padding, whitespace-trimmed, original
    /// casing preserved.
    pub raw_text: String,
    pub kind: CommandKind,
    /// Serial of the inbound frame; the acknowledgement must echo it.
    pub serial: u16,
}

impl Command {
    /// Text forwarded to the relay transport: the canonical relay string
    /// for classified commands, the original text for unknown ones.
    pub fn relay_text(&self) -> &str {
        match self.kind.canonical_relay_text() {
            Some(text) => text,
            None => &self.raw_text,
        }
    }
}

/// What a remote command asks the relay to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    EngineStop,
    EngineResume,
    Unknown,
}

impl CommandKind {
    /// Canonical command string understood by the relay firmware.
    pub fn canonical_relay_text(self) -> Option<&'static str> {
        match self {
            CommandKind::EngineStop => Some("RELAY,1#"),
            CommandKind::EngineResume => Some("RELAY,0#"),
            CommandKind::Unknown => None,
        }
    }
}

/// Decodes a 0x80 command payload into a [`Command`].
///
/// Zero bytes are stripped (the payload is null-padded text), the remainder
/// is decoded as UTF-8 with replacement, trimmed and matched uppercased.
pub fn interpret(payload: &[u8], serial: u16) -> Command {
    let cleaned: Vec<u8> = payload.iter().copied().filter(|&b| b != 0).collect();
    let raw_text = String::from_utf8_lossy(&cleaned).trim().to_string();
    let kind = classify(&raw_text.to_uppercase());
    Command {
        raw_text,
        kind,
        serial,
    }
}

fn classify(upper: &str) -> CommandKind {
    if upper.contains("RELAY") {
        if upper.contains(",1") || upper.contains("1#") {
            return CommandKind::EngineStop;
        }
        if upper.contains(",0") || upper.contains("0#") {
            return CommandKind::EngineResume;
        }
    }

    // DESBLOQUEAR embeds BLOQUEAR, so it must not trip the stop keywords.
    if upper.contains("STOP")
        || upper.contains("DESLIGAR")
        || (upper.contains("BLOQUEAR") && !upper.contains("DESBLOQUEAR"))
    {
        return CommandKind::EngineStop;
    }
    if upper.contains("START") || upper.contains("LIGAR") || upper.contains("DESBLOQUEAR") {
        return CommandKind::EngineResume;
    }

    CommandKind::Unknown
}
