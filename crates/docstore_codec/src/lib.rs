//! # Docstore Codec
//!
//! Value model and byte encodings shared by every docstore crate.
//!
//! - [`Value`] is the dynamic value type stored in documents. It has no
//!   floats, so values are totally comparable and hashable by content.
//! - [`Content`] is a document's raw attribute map. It is ordered, so the
//!   same content always produces the same bytes.
//! - [`path`] resolves dotted paths (`"address.city"`) over content trees.
//! - [`Encoding`] selects CBOR (via `ciborium`) or JSON for backups and
//!   other persisted records.
//!
//! ## Usage
//!
//! ```
//! use docstore_codec::{path, Content, Encoding, Value};
//!
//! let mut content = Content::new();
//! path::set_path(&mut content, "address.city", Value::from("Paris")).unwrap();
//!
//! let bytes = Encoding::Cbor.encode(&content).unwrap();
//! let decoded: Content = Encoding::Cbor.decode(&bytes).unwrap();
//! assert_eq!(path::resolve(&decoded, "address.city"), Some(&Value::from("Paris")));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod format;
pub mod path;
mod value;

pub use error::{CodecError, CodecResult};
pub use format::{from_cbor, to_cbor, Encoding};
pub use value::{Content, Value};
