//! Context persistence
//!
//! Converts between the live context and the serde image the durability
//! layer writes to disk. The image is data only; on load every file is
//! re-interned into a fresh canonical table and the context comes back as a
//! `Loaded` session, ready for the client's registration function to
//! re-attach mappers, lazy compute functions, reducers, and finalisers.

use crate::context::{Context, SessionKind};
use crate::dir::{DeletedDir, Dir};
use crate::eager::{EagerDir, Entry};
use crate::external::ExternalRegistry;
use crate::lazy::{LazyDir, LazyEntry, LazyState};
use crate::mapper::MapperSpec;
use crate::reduce::ReducerState;
use skfs_core::SkfsResult;
use skfs_durability::{
    load_snapshot, save_snapshot, ContextImage, DirImage, EntryImage, LazyEntryImage,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path as FsPath;

/// Build the persistent image of a context
pub fn to_image(ctx: &Context) -> ContextImage {
    let dirs = ctx
        .dirs
        .values()
        .map(|dir| match dir {
            Dir::Eager(eager) => DirImage::Eager {
                name: eager.name().clone(),
                is_input: eager.is_input(),
                mapper_src: eager.mapper.as_ref().map(|m| m.src.clone()),
                derived: eager.derived().to_vec(),
                entries: eager
                    .entries()
                    .iter()
                    .map(|(key, entry)| EntryImage {
                        key: key.clone(),
                        slices: entry
                            .slices()
                            .iter()
                            .map(|(p, v)| (p.clone(), v.clone()))
                            .collect(),
                        producers: entry
                            .producers()
                            .iter()
                            .map(|(p, t)| (p.clone(), *t))
                            .collect(),
                        write_time: entry.write_time(),
                        tombstone: entry.is_tombstone(),
                        readers: entry.readers().iter().cloned().collect(),
                    })
                    .collect(),
                aggregate: eager.reducer.as_ref().map(|r| r.aggregate().to_vec()),
            },
            Dir::Lazy(lazy) => DirImage::Lazy {
                name: lazy.name().clone(),
                cache: lazy
                    .cache
                    .iter()
                    .map(|(key, entry)| LazyEntryImage {
                        key: key.clone(),
                        values: entry.values.clone(),
                        has_value: entry.has_value,
                        deps: entry.deps.clone(),
                        computed_at: entry.computed_at,
                        readers: entry.readers.iter().cloned().collect(),
                    })
                    .collect(),
            },
            Dir::Deleted(tomb) => DirImage::Deleted {
                name: tomb.name.clone(),
                time: tomb.time,
            },
        })
        .collect();

    ContextImage {
        time: ctx.time,
        dirs,
        globals: ctx
            .globals
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        externals: ctx.externals.export(),
        next_external: ctx.externals.next_id(),
    }
}

/// Rebuild a context from its persistent image
///
/// Every file is re-interned; the session kind is `Loaded` so registration
/// re-attaches code instead of colliding with the loaded directories.
pub fn from_image(image: ContextImage) -> Context {
    let mut ctx = Context::new();
    ctx.time = image.time;
    ctx.session = SessionKind::Loaded;
    ctx.externals = ExternalRegistry::import(image.next_external, image.externals);

    for (name, value) in image.globals {
        let value = ctx.intern_file(value);
        ctx.globals.insert(name, value);
    }

    for dir in image.dirs {
        match dir {
            DirImage::Eager {
                name,
                is_input,
                mapper_src,
                derived,
                entries,
                aggregate,
            } => {
                let mut eager = EagerDir::new(name.clone(), is_input);
                eager.mapper = mapper_src.map(|src| MapperSpec { src, func: None });
                eager.set_derived(derived);
                eager.reducer = aggregate.map(|agg| {
                    ReducerState::data_only(
                        agg.into_iter().map(|f| ctx.interner.intern_file(f)).collect(),
                    )
                });
                for entry in entries {
                    let slices: BTreeMap<_, _> = entry
                        .slices
                        .into_iter()
                        .map(|(p, values)| {
                            (
                                p,
                                values
                                    .into_iter()
                                    .map(|f| ctx.interner.intern_file(f))
                                    .collect(),
                            )
                        })
                        .collect();
                    let rebuilt = Entry::from_parts(
                        slices,
                        entry.producers.into_iter().collect(),
                        entry.write_time,
                        entry.tombstone,
                        entry.readers.into_iter().collect(),
                    );
                    eager.insert_entry(entry.key, rebuilt);
                }
                ctx.dirs.insert(name, Dir::Eager(eager));
            }
            DirImage::Lazy { name, cache } => {
                let cache: BTreeMap<_, _> = cache
                    .into_iter()
                    .map(|entry| {
                        let values = entry
                            .values
                            .into_iter()
                            .map(|f| ctx.interner.intern_file(f))
                            .collect();
                        let rebuilt = LazyEntry {
                            state: if entry.has_value {
                                LazyState::Clean
                            } else {
                                LazyState::Dirty
                            },
                            values,
                            has_value: entry.has_value,
                            deps: entry.deps,
                            computed_at: entry.computed_at,
                            readers: entry.readers.into_iter().collect::<BTreeSet<_>>(),
                        };
                        (entry.key, rebuilt)
                    })
                    .collect();
                ctx.dirs
                    .insert(name.clone(), Dir::Lazy(LazyDir::data_only(name, cache)));
            }
            DirImage::Deleted { name, time } => {
                ctx.dirs.insert(
                    name.clone(),
                    Dir::Deleted(DeletedDir { name, time }),
                );
            }
        }
    }
    ctx
}

/// Snapshot a context to `path` atomically
///
/// # Errors
///
/// Serialization and I/O errors from the durability layer.
pub fn save_context(ctx: &Context, path: &FsPath) -> SkfsResult<()> {
    save_snapshot(&to_image(ctx), path)
}

/// Load a context from a snapshot at `path`
///
/// # Errors
///
/// I/O, magic-mismatch, and corruption errors from the durability layer.
pub fn load_context(path: &FsPath) -> SkfsResult<Context> {
    Ok(from_image(load_snapshot(path)?))
}
