//! HPACK (RFC 7541) header table: the static table plus a size-bounded
//! dynamic table shared by an encoder and a decoder side. Integer/string
//! literal coding and Huffman compression belong to the HTTP/2 framer
//! built on top of this crate and are not implemented here.

mod static_table;
mod table;

pub use static_table::{DYNAMIC_START_INDEX, STATIC_TABLE};
pub use table::{HpackTable, Mode};
