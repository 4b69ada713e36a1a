//! Reactive incremental computation engine
//!
//! This crate implements the SKFS engine proper. All computation is organised
//! as a graph of named directories owned by a single mutable [`Context`]:
//!
//! - **Eager directories** hold materialised entries written by inputs or by
//!   per-key mappers registered on a source directory.
//! - **Lazy directories** compute entries on demand through a user function
//!   and memoise the result together with the dependencies it read.
//! - **Deleted directories** are tombstones that answer every query as empty
//!   until garbage collection drops them.
//!
//! Every dependency-recording read during a mapper run or a lazy computation
//! is tracked; a write invalidates exactly the readers of the cells it
//! touched, and [`Context::update`] recomputes the smallest sufficient set in
//! deterministic path order. Cycles between lazy directories are tolerated:
//! re-entering an in-flight cell yields its stale value and the next update
//! drives the graph to a fixed point.
//!
//! The engine is single-writer and single-threaded by design; the context is
//! an explicit parameter everywhere and there is no ambient state.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod dir;
pub mod eager;
pub mod external;
pub mod gc;
pub mod handle;
pub mod lazy;
pub mod mapper;
pub mod persist;
pub mod reduce;
pub mod session;
pub mod stats;
mod track;

pub use context::{Context, SessionKind};
pub use dir::Dir;
pub use eager::{EagerDir, Entry};
pub use external::{ExternalRegistry, Finalizer};
pub use gc::GcReport;
pub use handle::{EHandle, LHandle};
pub use lazy::{LazyDir, LazyEntry, LazyState};
pub use mapper::{map_key_values, MapperFn, Writer};
pub use reduce::Reducer;
pub use session::{ChangeEvent, SubId};
pub use stats::EngineStats;
