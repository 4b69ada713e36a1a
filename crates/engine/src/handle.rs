//! Typed directory handles
//!
//! Handles are lightweight value references into the context: a directory
//! name plus a decoder type. They never hold directory state and never
//! outlive the context they are used with. The decoder is applied at the
//! edge; the engine only ever sees `File`s.

use crate::context::Context;
use crate::lazy::LazyFn;
use skfs_core::{BaseName, DirName, File, FileDecode, SkfsResult};
use std::marker::PhantomData;
use std::sync::Arc;

// =============================================================================
// EHandle
// =============================================================================

/// Typed handle to an eager directory
pub struct EHandle<T: FileDecode> {
    name: DirName,
    _decoder: PhantomData<fn() -> T>,
}

impl<T: FileDecode> Clone for EHandle<T> {
    fn clone(&self) -> Self {
        EHandle::new(self.name.clone())
    }
}

impl<T: FileDecode> EHandle<T> {
    /// Wrap a directory name
    pub fn new(name: DirName) -> Self {
        EHandle {
            name,
            _decoder: PhantomData,
        }
    }

    /// The directory name
    pub fn name(&self) -> &DirName {
        &self.name
    }

    /// First value for `key`, decoded; `None` when the entry is empty
    ///
    /// # Errors
    ///
    /// Directory lookup and decode errors.
    pub fn get(&self, ctx: &mut Context, key: &BaseName) -> SkfsResult<Option<T>> {
        let values = ctx.read_array(&self.name, key)?;
        values.first().map(File::decode).transpose()
    }

    /// All values for `key`, decoded
    ///
    /// # Errors
    ///
    /// Directory lookup and decode errors.
    pub fn get_array(&self, ctx: &mut Context, key: &BaseName) -> SkfsResult<Vec<T>> {
        let values = ctx.read_array(&self.name, key)?;
        values.iter().map(File::decode).collect()
    }

    /// Raw values for `key`, without dependency recording
    ///
    /// # Errors
    ///
    /// Directory lookup errors.
    pub fn get_array_raw(&self, ctx: &Context, key: &BaseName) -> SkfsResult<Vec<File>> {
        ctx.read_array_raw(&self.name, key)
    }

    /// Encode and write one value for `key`
    ///
    /// # Errors
    ///
    /// Directory lookup and write errors.
    pub fn write(&self, ctx: &mut Context, key: BaseName, value: &T) -> SkfsResult<()> {
        let file = ctx.intern_value(value);
        ctx.write_array(&self.name, key, vec![file])
    }

    /// Encode and write all values for `key`
    ///
    /// # Errors
    ///
    /// Directory lookup and write errors.
    pub fn write_array(&self, ctx: &mut Context, key: BaseName, values: &[T]) -> SkfsResult<()> {
        let files = values.iter().map(|v| ctx.intern_value(v)).collect();
        ctx.write_array(&self.name, key, files)
    }

    /// Remove the entry for `key`; a no-op when absent
    ///
    /// # Errors
    ///
    /// Directory lookup errors.
    pub fn remove(&self, ctx: &mut Context, key: BaseName) -> SkfsResult<()> {
        ctx.remove(&self.name, key)
    }

    /// Ordered live keys
    ///
    /// # Errors
    ///
    /// Directory lookup errors.
    pub fn keys(&self, ctx: &Context) -> SkfsResult<Vec<BaseName>> {
        Ok(ctx.unsafe_get_eager_dir(&self.name)?.keys())
    }

    /// The attached reducer's aggregate, if any
    ///
    /// # Errors
    ///
    /// Directory lookup errors.
    pub fn aggregate(&self, ctx: &Context) -> SkfsResult<Option<Vec<File>>> {
        ctx.aggregate(&self.name)
    }
}

// =============================================================================
// LHandle
// =============================================================================

/// Typed handle to a lazy directory
pub struct LHandle<T: FileDecode> {
    name: DirName,
    _decoder: PhantomData<fn() -> T>,
}

impl<T: FileDecode> Clone for LHandle<T> {
    fn clone(&self) -> Self {
        LHandle {
            name: self.name.clone(),
            _decoder: PhantomData,
        }
    }
}

impl<T: FileDecode> LHandle<T> {
    /// Create a lazy directory (or re-attach its code after a snapshot load)
    ///
    /// The compute function receives the context, a handle to the directory
    /// itself (for recursive demands), and the demanded key.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateDir` when the name is occupied by a live directory
    /// of another shape.
    pub fn create<F>(ctx: &mut Context, name: &DirName, compute: F) -> SkfsResult<Self>
    where
        T: 'static,
        F: Fn(&mut Context, &LHandle<T>, &BaseName) -> SkfsResult<Vec<File>>
            + Send
            + Sync
            + 'static,
    {
        let inner: LazyFn = Arc::new(move |ctx, dir, key| {
            let handle = LHandle::<T> {
                name: dir.clone(),
                _decoder: PhantomData,
            };
            compute(ctx, &handle, key)
        });
        ctx.register_lazy(name, inner)?;
        Ok(LHandle {
            name: name.clone(),
            _decoder: PhantomData,
        })
    }

    /// The directory name
    pub fn name(&self) -> &DirName {
        &self.name
    }

    /// Force the cell and decode its first value
    ///
    /// # Errors
    ///
    /// Directory lookup and decode errors.
    pub fn get(&self, ctx: &mut Context, key: &BaseName) -> SkfsResult<Option<T>> {
        let values = ctx.force(&self.name, key)?;
        values.first().map(File::decode).transpose()
    }

    /// Force the cell and decode all values
    ///
    /// # Errors
    ///
    /// Directory lookup and decode errors.
    pub fn get_array(&self, ctx: &mut Context, key: &BaseName) -> SkfsResult<Vec<T>> {
        let values = ctx.force(&self.name, key)?;
        values.iter().map(File::decode).collect()
    }

    /// Cached values without forcing; `None` when never computed
    ///
    /// # Errors
    ///
    /// Directory lookup and decode errors.
    pub fn maybe_get(&self, ctx: &Context, key: &BaseName) -> SkfsResult<Option<Vec<T>>> {
        match ctx.maybe_get(&self.name, key)? {
            Some(values) => Ok(Some(values.iter().map(File::decode).collect::<SkfsResult<_>>()?)),
            None => Ok(None),
        }
    }

    /// Force the cell, returning raw files
    ///
    /// # Errors
    ///
    /// Directory lookup errors.
    pub fn force(&self, ctx: &mut Context, key: &BaseName) -> SkfsResult<Vec<File>> {
        ctx.force(&self.name, key)
    }
}
