//! Upload decoding and row normalization for bulk product imports.
//!
//! - [`decode`]: CSV / spreadsheet bytes -> ordered [`RawRow`](tabload_core::RawRow)s
//! - [`normalize`]: [`RawRow`](tabload_core::RawRow) -> [`NewProduct`](tabload_core::NewProduct) or a rejection reason

pub mod decode;
pub mod normalize;

pub use decode::{decode, detect_format, DecodeError, TabularFormat};
pub use normalize::{Normalizer, RowRejection};
