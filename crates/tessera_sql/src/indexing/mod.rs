//! Secondary-index definitions and key codec.
//!
//! An index entry is a pointer: its key embeds the indexed column values and
//! the primary key of the row it was built from. Decoding an entry yields a
//! [`SearchRow`]; the full row still has to be fetched from the primary table.

mod definition;
mod keys;

pub use definition::{ColumnDef, ColumnType, IndexDefinition};
pub use keys::{
    decode_search_row, encode_index_key, encode_index_prefix, encode_primary_row_key,
    index_key_range, prefix_end, SearchRow,
};
