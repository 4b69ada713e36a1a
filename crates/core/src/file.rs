//! Interned immutable values
//!
//! A `File` is the opaque payload stored in directory cells. Files are deeply
//! immutable and interned: all construction funnels through an [`Interner`],
//! so structural equality coincides with pointer identity. Cache comparisons
//! in the engine rely on this and use [`File::same`].
//!
//! ## Value model
//!
//! `FileData` is a closed tagged union: `Str`, `Int`, `Blob`, `Record`, and
//! `External`. Client-defined shapes are expressed as `Record` values with a
//! client-chosen tag; typed access goes through the [`FileDecode`] trait,
//! which handles apply at the edge.
//!
//! [`Interner`]: crate::intern::Interner

use crate::error::{SkfsError, SkfsResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Opaque handle into the context's external pointer registry
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ExternalId(pub u64);

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ext#{}", self.0)
    }
}

/// Payload of a file value
///
/// Closed union; clients extend it through `Record` tags rather than new
/// variants. Equality is structural, with no cross-variant coercions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileData {
    /// UTF-8 string
    Str(Arc<str>),
    /// 64-bit signed integer
    Int(i64),
    /// Raw bytes
    Blob(Arc<[u8]>),
    /// Client-tagged composite value
    Record {
        /// Client-chosen shape tag
        tag: u32,
        /// Field values, in shape order
        fields: Vec<File>,
    },
    /// Handle to a non-managed resource
    External(ExternalId),
}

impl FileData {
    /// The variant name, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            FileData::Str(_) => "Str",
            FileData::Int(_) => "Int",
            FileData::Blob(_) => "Blob",
            FileData::Record { .. } => "Record",
            FileData::External(_) => "External",
        }
    }
}

/// An interned, immutable value
///
/// Cheap to clone (one `Arc` bump). Two files produced by the same context
/// are structurally equal iff they are pointer-equal; [`File::same`] is the
/// identity test the engine uses for cutoff decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct File(Arc<FileData>);

impl File {
    /// Wrap payload without interning
    ///
    /// Only the interner and the snapshot loader call this; everything else
    /// goes through `Context::intern` so the identity invariant holds.
    pub fn from_arc(data: Arc<FileData>) -> Self {
        File(data)
    }

    /// The payload
    #[inline]
    pub fn data(&self) -> &FileData {
        &self.0
    }

    /// The underlying shared allocation
    #[inline]
    pub fn as_arc(&self) -> &Arc<FileData> {
        &self.0
    }

    /// Pointer identity test
    ///
    /// For interned files this coincides with structural equality and is the
    /// comparison used by the engine's write cutoff and cache validation.
    #[inline]
    pub fn same(&self, other: &File) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// String payload, if this is a `Str`
    pub fn as_str(&self) -> Option<&str> {
        match self.data() {
            FileData::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload, if this is an `Int`
    pub fn as_int(&self) -> Option<i64> {
        match self.data() {
            FileData::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Blob payload, if this is a `Blob`
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self.data() {
            FileData::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// External handle, if this is an `External`
    pub fn as_external(&self) -> Option<ExternalId> {
        match self.data() {
            FileData::External(id) => Some(*id),
            _ => None,
        }
    }

    /// Decode into a client type
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` if the payload shape does not match.
    pub fn decode<T: FileDecode>(&self) -> SkfsResult<T> {
        T::decode(self)
    }
}

impl PartialEq for File {
    fn eq(&self, other: &Self) -> bool {
        // Interned files short-circuit on identity.
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for File {}

impl Hash for File {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Display for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data() {
            FileData::Str(s) => write!(f, "{:?}", s),
            FileData::Int(i) => write!(f, "{}", i),
            FileData::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
            FileData::Record { tag, fields } => {
                write!(f, "#{}(", tag)?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, ")")
            }
            FileData::External(id) => write!(f, "{}", id),
        }
    }
}

// =============================================================================
// FileDecode - Typed Access
// =============================================================================

/// Conversion between client types and file payloads
///
/// Handles carry an implementation of this trait and apply it at the edge;
/// the engine itself only ever sees `File`.
pub trait FileDecode: Sized {
    /// Decode a file into the client type
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` when the payload shape does not match.
    fn decode(file: &File) -> SkfsResult<Self>;

    /// Encode the client type as a payload, ready for interning
    fn encode(&self) -> FileData;
}

impl FileDecode for String {
    fn decode(file: &File) -> SkfsResult<Self> {
        file.as_str()
            .map(str::to_owned)
            .ok_or_else(|| SkfsError::decode("Str", file.data().kind()))
    }

    fn encode(&self) -> FileData {
        FileData::Str(Arc::from(self.as_str()))
    }
}

impl FileDecode for i64 {
    fn decode(file: &File) -> SkfsResult<Self> {
        file.as_int()
            .ok_or_else(|| SkfsError::decode("Int", file.data().kind()))
    }

    fn encode(&self) -> FileData {
        FileData::Int(*self)
    }
}

impl FileDecode for Vec<u8> {
    fn decode(file: &File) -> SkfsResult<Self> {
        file.as_blob()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| SkfsError::decode("Blob", file.data().kind()))
    }

    fn encode(&self) -> FileData {
        FileData::Blob(Arc::from(self.as_slice()))
    }
}

impl FileDecode for File {
    fn decode(file: &File) -> SkfsResult<Self> {
        Ok(file.clone())
    }

    fn encode(&self) -> FileData {
        self.data().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality_across_allocations() {
        let a = File::from_arc(Arc::new(FileData::Int(7)));
        let b = File::from_arc(Arc::new(FileData::Int(7)));
        assert_eq!(a, b);
        assert!(!a.same(&b));
    }

    #[test]
    fn test_no_cross_variant_equality() {
        let s = File::from_arc(Arc::new(FileData::Str(Arc::from("7"))));
        let i = File::from_arc(Arc::new(FileData::Int(7)));
        assert_ne!(s, i);
    }

    #[test]
    fn test_decode_roundtrip() {
        let f = File::from_arc(Arc::new("hello".to_string().encode()));
        assert_eq!(f.decode::<String>().unwrap(), "hello");
        assert!(f.decode::<i64>().is_err());
    }

    #[test]
    fn test_record_display() {
        let f = File::from_arc(Arc::new(FileData::Record {
            tag: 3,
            fields: vec![File::from_arc(Arc::new(FileData::Int(1)))],
        }));
        assert_eq!(f.to_string(), "#3(1)");
    }
}
