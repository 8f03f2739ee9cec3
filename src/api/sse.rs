/// Incremental line assembler for `text/event-stream` bodies.
///
/// Network chunks split lines at arbitrary byte offsets, including inside a
/// multibyte UTF-8 character, so the buffer holds raw bytes and decodes only
/// complete lines. It yields the payloads of `data: `-prefixed lines;
/// non-data lines (comments, blank keep-alives) are discarded.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buf: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the data payloads completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(['\n', '\r']);
            if let Some(data) = text.strip_prefix("data: ") {
                payloads.push(data.to_string());
            }
        }
        payloads
    }
}
