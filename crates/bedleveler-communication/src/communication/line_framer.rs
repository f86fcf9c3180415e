//! Newline framing of a serial byte stream

/// Longest partial line kept while waiting for its newline
pub const MAX_PENDING: usize = 4096;

/// Accumulates raw bytes and yields complete lines.
///
/// Lines are split on `\n` and a trailing `\r` is stripped. Lines that are
/// not plain ASCII are logged and discarded. A partial line longer than
/// [`MAX_PENDING`] bytes is dropped, which happens on a wrong baud rate.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    /// Create an empty framer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return every line completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }

            if !raw.is_ascii() {
                tracing::warn!(
                    "Discarding non-ASCII line: {}",
                    String::from_utf8_lossy(&raw)
                );
                continue;
            }

            lines.push(raw.into_iter().map(char::from).collect());
        }

        if self.buffer.len() > MAX_PENDING {
            tracing::warn!(
                "Dropping {} bytes without a newline, check the baud rate",
                self.buffer.len()
            );
            self.buffer.clear();
        }

        lines
    }

    /// Number of buffered bytes not yet terminated by a newline
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial line
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
