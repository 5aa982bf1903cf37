//! PDF writing for signed documents.
//!
//! ## Architecture
//!
//! ```text
//! SigningData
//!     ↓
//! [SignatureAppearance] (widget appearance stream, image XObject)
//!     ↓
//! [IncrementalUpdate] (new objects, xref section, trailer with /Prev)
//!     ↓
//! [ObjectSerializer] (serializes PDF objects)
//!     ↓
//! PDF bytes
//! ```

mod incremental;
mod object_serializer;
mod signature_appearance;

pub use incremental::{IncrementalUpdate, UpdatedFile};
pub use object_serializer::ObjectSerializer;
pub use signature_appearance::{AppearanceStyle, ImageXObject, SignatureAppearance};
