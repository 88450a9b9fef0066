/// Running reply buffer for one in-flight request.
///
/// `emitted` is a byte offset into `buffer` and always sits on a char
/// boundary, since it only ever moves to the end of the buffer.
#[derive(Debug, Default)]
pub struct Accumulator {
    buffer: String,
    emitted: usize,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &str) {
        self.buffer.push_str(fragment);
    }

    /// Content not yet handed to the display.
    pub fn pending(&self) -> &str {
        &self.buffer[self.emitted..]
    }

    pub fn has_pending(&self) -> bool {
        self.emitted < self.buffer.len()
    }

    pub fn mark_flushed(&mut self) {
        self.emitted = self.buffer.len();
    }

    /// Return the pending suffix and mark it flushed.
    pub fn take_pending(&mut self) -> String {
        let delta = self.pending().to_string();
        self.mark_flushed();
        delta
    }

    /// Everything accumulated so far.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn finish(self) -> String {
        self.buffer
    }
}
