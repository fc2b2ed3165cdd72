// Status output sink
//
// Every operation that talks to a human takes an explicit sink instead of
// printing directly. There is no process-wide default: the CLI passes
// StdoutSink, embedders and tests pass their own.

use std::sync::Mutex;

/// Destination for human-readable status lines.
pub trait StatusSink {
    /// Write one line of status text.
    fn line(&self, text: &str);
}

/// Sink that writes to standard output.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl StatusSink for StdoutSink {
    fn line(&self, text: &str) {
        println!("{}", text);
    }
}

/// Sink that discards everything, for callers that want quiet operations.
#[derive(Debug, Default)]
pub struct NullSink;

impl StatusSink for NullSink {
    fn line(&self, _text: &str) {}
}

/// Sink that collects lines in memory, for embedders and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("sink lock poisoned").clone()
    }
}

impl StatusSink for MemorySink {
    fn line(&self, text: &str) {
        self.lines
            .lock()
            .expect("sink lock poisoned")
            .push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_collects_in_order() {
        let sink = MemorySink::new();
        sink.line("first");
        sink.line("second");
        assert_eq!(sink.lines(), vec!["first", "second"]);
    }
}
