//! Reader frames for dependency tracking
//!
//! A frame is pushed for every mapper run and every lazy computation. While
//! the frame is on the stack, each dependency-recording read appends the
//! source path and its write time. On pop the engine indexes the collected
//! edges: eager sources get the reader added to their `readers` set, lazy
//! readers keep the pairs as their `deps`.

use skfs_core::{Path, Tick};

/// One active reader frame
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    /// The path being (re)computed
    pub reader: Path,
    /// Reads performed so far: source path and the write time observed
    pub deps: Vec<(Path, Tick)>,
}

/// Stack of reader frames owned by the context
#[derive(Debug, Default)]
pub(crate) struct Tracker {
    frames: Vec<Frame>,
}

impl Tracker {
    pub fn push(&mut self, reader: Path) {
        self.frames.push(Frame {
            reader,
            deps: Vec::new(),
        });
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// The path of the innermost active frame, if any
    pub fn current_reader(&self) -> Option<&Path> {
        self.frames.last().map(|f| &f.reader)
    }

    /// Record a read against the innermost frame; no-op outside a frame
    pub fn record(&mut self, source: Path, at: Tick) {
        if let Some(frame) = self.frames.last_mut() {
            frame.deps.push((source, at));
        }
    }
}
