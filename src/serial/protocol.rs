//! Text protocol spoken with the rollershutter controller.
//!
//! Commands are plain ASCII strings terminated by a newline. The controller may
//! print lines back (e.g. when a physical button is pressed); those are only
//! split into lines here, never interpreted.

use std::borrow::Cow;

pub const TERMINATOR: char = '\n';

/// Upper bound for an unterminated line before the buffer is trimmed
const MAX_PARTIAL: usize = 8192;
const TRIM_TO: usize = 4096;

/// Append the newline terminator unless the command already ends with one
pub fn frame_command(command: &str) -> String {
    if command.ends_with(TERMINATOR) {
        command.to_string()
    } else {
        format!("{}{}", command, TERMINATOR)
    }
}

/// Accumulates raw bytes and yields complete, trimmed, non-empty lines.
/// Bytes are decoded per line so multi-byte characters may span reads.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n' || *b == b'\r') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..pos]).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }

        if self.partial.len() > MAX_PARTIAL {
            let cut = self.partial.len() - TRIM_TO;
            log::warn!("Discarding {} bytes of unterminated serial input", cut);
            self.partial.drain(..cut);
        }

        lines
    }

    /// Unterminated input received so far
    pub fn pending(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.partial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_appends_newline() {
        assert_eq!(frame_command("LR_OPEN"), "LR_OPEN\n");
    }

    #[test]
    fn test_frame_keeps_existing_newline() {
        assert_eq!(frame_command("LR_OPEN\n"), "LR_OPEN\n");
    }

    #[test]
    fn test_line_buffer_splits_across_chunks() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"BTN:1").is_empty());
        assert_eq!(buffer.pending(), "BTN:1");

        let lines = buffer.push(b":DOWN\r\nBTN:2:UP\n");
        assert_eq!(lines, vec!["BTN:1:DOWN".to_string(), "BTN:2:UP".to_string()]);
        assert_eq!(buffer.pending(), "");
    }

    #[test]
    fn test_line_buffer_keeps_split_utf8_characters() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"TEMP:21\xC2").is_empty());
        let lines = buffer.push(b"\xB0C\n");
        assert_eq!(lines, vec!["TEMP:21\u{b0}C".to_string()]);
    }

    #[test]
    fn test_line_buffer_skips_blank_lines() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"\r\n\r\nREADY\n\n");
        assert_eq!(lines, vec!["READY".to_string()]);
    }

    #[test]
    fn test_line_buffer_trims_runaway_input() {
        let mut buffer = LineBuffer::new();
        let noise = vec![b'x'; MAX_PARTIAL + 100];
        assert!(buffer.push(&noise).is_empty());
        assert_eq!(buffer.pending().len(), TRIM_TO);
    }
}
