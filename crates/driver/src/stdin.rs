//! Stdin write protocol
//!
//! A stream of key/value records feeding an input directory:
//!
//! ```text
//! key<TAB>"value"<NL>
//! ```
//!
//! - The key runs to the first unescaped tab.
//! - The value begins with `"` and terminates with `"` immediately before an
//!   unescaped newline.
//! - Escapes in both keys and values: `\\`, `\t`, `\n`, `\"`; any other
//!   backslash is literal.
//! - A blank key line separates batches: everything since the previous
//!   separator is flushed to the target directory as one write batch.
//!
//! The parser is an explicit state machine fed byte-at-a-time, so feeding
//! any chunking of the same stream produces the same event sequence —
//! interrupted and retried inputs never change the parsed result. Malformed
//! lines are dropped and counted, never fatal.

use skfs_core::{BaseName, DirName, FileData, SkfsResult};
use skfs_engine::Context;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// One parsed protocol event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteEvent {
    /// A key/value record
    Record {
        /// Target entry key
        key: String,
        /// Value string (unescaped, quotes stripped)
        value: String,
    },
    /// Batch separator (blank key line)
    Flush,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// At the start of a line, reading the key
    KeyStart,
    /// Inside the key
    Key,
    /// After a backslash inside the key
    KeyEscape,
    /// After the tab, expecting the opening quote
    ValueQuote,
    /// Inside the value
    Value,
    /// After a backslash inside the value
    ValueEscape,
}

/// Chunk-tolerant protocol parser
#[derive(Debug)]
pub struct WriteParser {
    state: State,
    key: Vec<u8>,
    value: Vec<u8>,
    malformed: u64,
}

impl Default for WriteParser {
    fn default() -> Self {
        WriteParser::new()
    }
}

impl WriteParser {
    /// Create a parser at the start of a stream
    pub fn new() -> Self {
        WriteParser {
            state: State::KeyStart,
            key: Vec::new(),
            value: Vec::new(),
            malformed: 0,
        }
    }

    /// Lines dropped as malformed so far
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// Feed a chunk, returning the events it completes
    ///
    /// State carries across calls; the chunking of the stream never affects
    /// the event sequence.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<WriteEvent> {
        let mut events = Vec::new();
        for &byte in bytes {
            self.step(byte, &mut events);
        }
        events
    }

    /// Finish the stream, dropping any trailing partial line
    pub fn finish(&mut self) -> Vec<WriteEvent> {
        if self.state != State::KeyStart {
            self.malformed += 1;
            self.reset_line();
        }
        Vec::new()
    }

    fn reset_line(&mut self) {
        self.state = State::KeyStart;
        self.key.clear();
        self.value.clear();
    }

    fn drop_line(&mut self) {
        self.malformed += 1;
        self.reset_line();
    }

    fn unescape(byte: u8, buf: &mut Vec<u8>) {
        match byte {
            b'\\' => buf.push(b'\\'),
            b't' => buf.push(b'\t'),
            b'n' => buf.push(b'\n'),
            b'"' => buf.push(b'"'),
            other => {
                // Any other backslash is literal.
                buf.push(b'\\');
                buf.push(other);
            }
        }
    }

    fn step(&mut self, byte: u8, events: &mut Vec<WriteEvent>) {
        match self.state {
            State::KeyStart => match byte {
                b'\n' => events.push(WriteEvent::Flush),
                b'\t' => self.state = State::ValueQuote,
                b'\\' => self.state = State::KeyEscape,
                other => {
                    self.key.push(other);
                    self.state = State::Key;
                }
            },
            State::Key => match byte {
                b'\t' => self.state = State::ValueQuote,
                b'\\' => self.state = State::KeyEscape,
                // A key line without a value is malformed.
                b'\n' => self.drop_line(),
                other => self.key.push(other),
            },
            State::KeyEscape => {
                Self::unescape(byte, &mut self.key);
                self.state = State::Key;
            }
            State::ValueQuote => match byte {
                b'"' => self.state = State::Value,
                b'\n' => self.drop_line(),
                // Tolerate garbage between the tab and the opening quote.
                _ => {}
            },
            State::Value => match byte {
                b'\\' => self.state = State::ValueEscape,
                b'\n' => {
                    if self.value.last() == Some(&b'"') {
                        self.value.pop();
                        events.push(WriteEvent::Record {
                            key: String::from_utf8_lossy(&self.key).into_owned(),
                            value: String::from_utf8_lossy(&self.value).into_owned(),
                        });
                        self.reset_line();
                    } else {
                        self.drop_line();
                    }
                }
                other => self.value.push(other),
            },
            State::ValueEscape => {
                Self::unescape(byte, &mut self.value);
                self.state = State::Value;
            }
        }
    }
}

/// Apply parsed events to an input directory
///
/// Records accumulate per key within a batch (several records for one key
/// build up that entry's value array); each `Flush` boundary — and the end
/// of the event slice — commits the pending records as one write batch with
/// a single tick and a single reducer delta.
///
/// # Errors
///
/// Write errors from the engine.
pub fn apply_records(
    ctx: &mut Context,
    dir: &DirName,
    events: &[WriteEvent],
) -> SkfsResult<()> {
    let mut pending: BTreeMap<BaseName, Vec<skfs_core::File>> = BTreeMap::new();
    for event in events {
        match event {
            WriteEvent::Record { key, value } => {
                let key = match BaseName::sid(key) {
                    Ok(key) => key,
                    Err(err) => {
                        warn!(error = %err, "skipping record with invalid key");
                        continue;
                    }
                };
                let file = ctx.intern(FileData::Str(Arc::from(value.as_str())));
                pending.entry(key).or_default().push(file);
            }
            WriteEvent::Flush => {
                if !pending.is_empty() {
                    ctx.write_array_many(dir, std::mem::take(&mut pending))?;
                }
            }
        }
    }
    if !pending.is_empty() {
        ctx.write_array_many(dir, pending)?;
    }
    Ok(())
}
