//! Snapshot persistence for the SKFS engine
//!
//! A context survives across process invocations through a snapshot file:
//! an opaque binary image of the directory graph. The file starts with a
//! build magic and format version, followed by one CRC-checked frame holding
//! the bincode-encoded [`ContextImage`].
//!
//! Code (mappers, lazy compute functions, reducers, finalisers) is not data
//! and is not persisted; the client's registration function re-attaches it
//! after a load, matched by directory name.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoding;
pub mod image;
pub mod snapshot;

pub use encoding::{decode_frame, encode_frame, FORMAT_VERSION, SNAPSHOT_MAGIC};
pub use image::{ContextImage, DirImage, EntryImage, LazyEntryImage};
pub use snapshot::{load_snapshot, save_snapshot};
