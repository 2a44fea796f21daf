//! Per-broadcast accumulator

/// Chunks emitted by one in-flight broadcast
#[derive(Debug, Default)]
pub struct StreamingState {
    chunks: Vec<String>,
    completed: bool,
}

impl StreamingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: String) {
        debug_assert!(!self.completed, "chunk pushed after completion");
        self.chunks.push(chunk);
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Mark the broadcast complete and return the aggregate text
    pub fn complete(&mut self) -> String {
        self.completed = true;
        self.chunks.concat()
    }
}
