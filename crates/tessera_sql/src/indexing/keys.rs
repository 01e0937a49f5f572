use anyhow::{anyhow, Result};
use datafusion::common::ScalarValue;

use super::definition::{ColumnDef, ColumnType, IndexDefinition};

const DATA_PREFIX_PRIMARY_ROW: u8 = 0x20;
const DATA_PREFIX_SECONDARY_INDEX_ROW: u8 = 0x21;
const TUPLE_TAG_PRIMARY_KEY: u8 = 0x02;
const KEY_NULL_MARKER: u8 = 0x00;
const KEY_NOT_NULL_MARKER: u8 = 0x01;
const SIGN_FLIP_MASK: u64 = 1u64 << 63;
/// Tag, reserved byte and 8-byte ordered primary key.
const PRIMARY_KEY_SUFFIX_LEN: usize = 10;
/// Prefix byte, table id and index id.
const INDEX_HEADER_LEN: usize = 1 + 8 + 8;

/// Column values embedded in one index key plus the primary key it points at.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRow {
    pub primary_key: i64,
    /// Values of the index key columns, in index key order.
    pub values: Vec<ScalarValue>,
}

impl SearchRow {
    pub fn primary_key_value(&self) -> ScalarValue {
        ScalarValue::Int64(Some(self.primary_key))
    }
}

fn encode_i64_ordered(value: i64) -> [u8; 8] {
    (value as u64 ^ SIGN_FLIP_MASK).to_be_bytes()
}

fn decode_i64_ordered(bytes: [u8; 8]) -> i64 {
    let raw = u64::from_be_bytes(bytes) ^ SIGN_FLIP_MASK;
    raw as i64
}

fn scalar_is_null(value: &ScalarValue) -> bool {
    matches!(
        value,
        ScalarValue::Null
            | ScalarValue::Int8(None)
            | ScalarValue::Int16(None)
            | ScalarValue::Int32(None)
            | ScalarValue::Int64(None)
            | ScalarValue::UInt8(None)
            | ScalarValue::UInt16(None)
            | ScalarValue::UInt32(None)
            | ScalarValue::UInt64(None)
            | ScalarValue::Float32(None)
            | ScalarValue::Float64(None)
            | ScalarValue::Boolean(None)
            | ScalarValue::Utf8(None)
            | ScalarValue::LargeUtf8(None)
    )
}

fn scalar_to_i64(value: &ScalarValue) -> Option<i64> {
    match value {
        ScalarValue::Int8(Some(v)) => Some(i64::from(*v)),
        ScalarValue::Int16(Some(v)) => Some(i64::from(*v)),
        ScalarValue::Int32(Some(v)) => Some(i64::from(*v)),
        ScalarValue::Int64(Some(v)) => Some(*v),
        ScalarValue::UInt8(Some(v)) => Some(i64::from(*v)),
        ScalarValue::UInt16(Some(v)) => Some(i64::from(*v)),
        ScalarValue::UInt32(Some(v)) => Some(i64::from(*v)),
        ScalarValue::UInt64(Some(v)) => i64::try_from(*v).ok(),
        _ => None,
    }
}

fn encode_scalar_payload(value: &ScalarValue, column: &ColumnDef) -> Result<Vec<u8>> {
    let payload = match column.column_type {
        ColumnType::Int64 => {
            let v = scalar_to_i64(value)
                .ok_or_else(|| anyhow!("invalid value type for Int64 column '{}'", column.name))?;
            encode_i64_ordered(v).to_vec()
        }
        ColumnType::Float64 => {
            let v = match value {
                ScalarValue::Float64(Some(v)) => *v,
                ScalarValue::Float32(Some(v)) => f64::from(*v),
                other => scalar_to_i64(other).map(|v| v as f64).ok_or_else(|| {
                    anyhow!("invalid value type for Float64 column '{}'", column.name)
                })?,
            };
            v.to_be_bytes().to_vec()
        }
        ColumnType::Boolean => match value {
            ScalarValue::Boolean(Some(v)) => vec![u8::from(*v)],
            _ => {
                return Err(anyhow!(
                    "invalid value type for Boolean column '{}'",
                    column.name
                ));
            }
        },
        ColumnType::Utf8 => match value {
            ScalarValue::Utf8(Some(v)) | ScalarValue::LargeUtf8(Some(v)) => v.as_bytes().to_vec(),
            _ => {
                return Err(anyhow!(
                    "invalid value type for Utf8 column '{}'",
                    column.name
                ));
            }
        },
    };
    Ok(payload)
}

fn decode_scalar_payload(payload: &[u8], column: &ColumnDef) -> Result<ScalarValue> {
    match column.column_type {
        ColumnType::Int64 => {
            let bytes: [u8; 8] = payload
                .try_into()
                .map_err(|_| anyhow!("invalid Int64 payload length for '{}'", column.name))?;
            Ok(ScalarValue::Int64(Some(decode_i64_ordered(bytes))))
        }
        ColumnType::Float64 => {
            let bytes: [u8; 8] = payload
                .try_into()
                .map_err(|_| anyhow!("invalid Float64 payload length for '{}'", column.name))?;
            Ok(ScalarValue::Float64(Some(f64::from_be_bytes(bytes))))
        }
        ColumnType::Boolean => {
            if payload.len() != 1 {
                return Err(anyhow!(
                    "invalid Boolean payload length for '{}'",
                    column.name
                ));
            }
            Ok(ScalarValue::Boolean(Some(payload[0] != 0)))
        }
        ColumnType::Utf8 => {
            let value = std::str::from_utf8(payload)
                .map_err(|err| anyhow!("invalid Utf8 payload for '{}': {}", column.name, err))?;
            Ok(ScalarValue::Utf8(Some(value.to_string())))
        }
    }
}

fn encode_index_header(index: &IndexDefinition) -> Vec<u8> {
    let mut out = Vec::with_capacity(INDEX_HEADER_LEN);
    out.push(DATA_PREFIX_SECONDARY_INDEX_ROW);
    out.extend_from_slice(&index.table_id.to_be_bytes());
    out.extend_from_slice(&index.index_id.to_be_bytes());
    out
}

/// Encodes the index header followed by the leading `values.len()` key
/// columns. An empty `values` yields the prefix of the whole index.
pub fn encode_index_prefix(index: &IndexDefinition, values: &[ScalarValue]) -> Result<Vec<u8>> {
    if values.len() > index.key_columns.len() {
        return Err(anyhow!(
            "index prefix has {} values but index '{}' has {} key columns",
            values.len(),
            index.index_name,
            index.key_columns.len()
        ));
    }

    let mut out = encode_index_header(index);
    for (column, value) in index.key_column_defs()?.into_iter().zip(values) {
        if scalar_is_null(value) {
            if !column.nullable {
                return Err(anyhow!(
                    "null value violates not-null constraint for column '{}'",
                    column.name
                ));
            }
            out.push(KEY_NULL_MARKER);
            continue;
        }
        let payload = encode_scalar_payload(value, column)?;
        out.push(KEY_NOT_NULL_MARKER);
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&payload);
    }
    Ok(out)
}

/// Encodes a full index entry key for one row.
pub fn encode_index_key(
    index: &IndexDefinition,
    values: &[ScalarValue],
    primary_key: i64,
) -> Result<Vec<u8>> {
    if values.len() != index.key_columns.len() {
        return Err(anyhow!(
            "index '{}' expects {} key values, got {}",
            index.index_name,
            index.key_columns.len(),
            values.len()
        ));
    }
    let mut out = encode_index_prefix(index, values)?;
    out.push(TUPLE_TAG_PRIMARY_KEY);
    out.push(0);
    out.extend_from_slice(&encode_i64_ordered(primary_key));
    Ok(out)
}

/// Key range `[start, end)` covering every entry that starts with the given
/// leading key values.
pub fn index_key_range(
    index: &IndexDefinition,
    prefix_values: &[ScalarValue],
) -> Result<(Vec<u8>, Vec<u8>)> {
    let start = encode_index_prefix(index, prefix_values)?;
    let end = prefix_end(&start).unwrap_or_default();
    Ok((start, end))
}

/// Row key of a primary-table row.
pub fn encode_primary_row_key(table_id: u64, primary_key: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 8 + PRIMARY_KEY_SUFFIX_LEN);
    out.push(DATA_PREFIX_PRIMARY_ROW);
    out.extend_from_slice(&table_id.to_be_bytes());
    out.push(TUPLE_TAG_PRIMARY_KEY);
    out.push(0);
    out.extend_from_slice(&encode_i64_ordered(primary_key));
    out
}

/// Smallest key strictly greater than every key starting with `prefix`.
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut out = prefix.to_vec();
    for idx in (0..out.len()).rev() {
        if out[idx] != 0xFF {
            out[idx] = out[idx].saturating_add(1);
            out.truncate(idx + 1);
            return Some(out);
        }
    }
    None
}

/// Decodes an index entry key into the row it points at.
pub fn decode_search_row(index: &IndexDefinition, key: &[u8]) -> Result<SearchRow> {
    if key.len() < INDEX_HEADER_LEN + PRIMARY_KEY_SUFFIX_LEN {
        return Err(anyhow!("secondary index key too short"));
    }

    let mut cursor = 0usize;
    let prefix = key[cursor];
    cursor += 1;
    if prefix != DATA_PREFIX_SECONDARY_INDEX_ROW {
        return Err(anyhow!("invalid secondary index row-key prefix {}", prefix));
    }

    let table_id = read_u64(key, &mut cursor)?;
    if table_id != index.table_id {
        return Err(anyhow!(
            "secondary index key table_id mismatch: expected={}, got={}",
            index.table_id,
            table_id
        ));
    }
    let index_id = read_u64(key, &mut cursor)?;
    if index_id != index.index_id {
        return Err(anyhow!(
            "secondary index key index_id mismatch: expected={}, got={}",
            index.index_id,
            index_id
        ));
    }

    let suffix_start = key.len() - PRIMARY_KEY_SUFFIX_LEN;
    let mut values = Vec::with_capacity(index.key_columns.len());
    for column in index.key_column_defs()? {
        if cursor >= suffix_start {
            return Err(anyhow!(
                "secondary index key truncated while decoding column '{}'",
                column.name
            ));
        }
        let marker = key[cursor];
        cursor += 1;
        if marker == KEY_NULL_MARKER {
            values.push(ScalarValue::Null);
            continue;
        }
        if marker != KEY_NOT_NULL_MARKER {
            return Err(anyhow!("invalid secondary index key marker {}", marker));
        }
        let payload_len = read_u32(key, &mut cursor)? as usize;
        if cursor + payload_len > suffix_start {
            return Err(anyhow!(
                "secondary index key truncated while decoding payload"
            ));
        }
        values.push(decode_scalar_payload(
            &key[cursor..cursor + payload_len],
            column,
        )?);
        cursor += payload_len;
    }

    if cursor != suffix_start {
        return Err(anyhow!(
            "secondary index key has {} unexpected bytes before primary key suffix",
            suffix_start.saturating_sub(cursor)
        ));
    }
    if key[suffix_start] != TUPLE_TAG_PRIMARY_KEY || key[suffix_start + 1] != 0 {
        return Err(anyhow!("secondary index key has invalid primary key suffix"));
    }
    let mut payload = [0u8; 8];
    payload.copy_from_slice(&key[(suffix_start + 2)..]);

    Ok(SearchRow {
        primary_key: decode_i64_ordered(payload),
        values,
    })
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    if bytes.len() < *cursor + 4 {
        return Err(anyhow!("buffer underflow while decoding u32"));
    }
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes[*cursor..*cursor + 4]);
    *cursor += 4;
    Ok(u32::from_be_bytes(out))
}

fn read_u64(bytes: &[u8], cursor: &mut usize) -> Result<u64> {
    if bytes.len() < *cursor + 8 {
        return Err(anyhow!("buffer underflow while decoding u64"));
    }
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[*cursor..*cursor + 8]);
    *cursor += 8;
    Ok(u64::from_be_bytes(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> IndexDefinition {
        IndexDefinition {
            table_id: 9,
            index_id: 3,
            table_name: "accounts".to_string(),
            index_name: "idx_accounts_region_score".to_string(),
            key_columns: vec!["region".to_string(), "score".to_string()],
            columns: vec![
                ColumnDef::new("id", ColumnType::Int64).not_null(),
                ColumnDef::new("region", ColumnType::Utf8),
                ColumnDef::new("score", ColumnType::Int64),
                ColumnDef::new("active", ColumnType::Boolean),
            ],
            primary_key_column: "id".to_string(),
        }
    }

    #[test]
    fn decode_recovers_values_and_primary_key() {
        let def = definition();
        let values = vec![
            ScalarValue::Utf8(Some("emea".to_string())),
            ScalarValue::Int32(Some(-17)),
        ];
        let key = encode_index_key(&def, &values, -42).expect("encode");
        let row = decode_search_row(&def, &key).expect("decode");
        assert_eq!(row.primary_key, -42);
        assert_eq!(
            row.values,
            vec![
                ScalarValue::Utf8(Some("emea".to_string())),
                ScalarValue::Int64(Some(-17)),
            ]
        );
    }

    #[test]
    fn null_key_values_use_the_null_marker() {
        let def = definition();
        let key = encode_index_key(&def, &[ScalarValue::Null, ScalarValue::Int64(None)], 5)
            .expect("encode");
        let row = decode_search_row(&def, &key).expect("decode");
        assert_eq!(row.values, vec![ScalarValue::Null, ScalarValue::Null]);
    }

    #[test]
    fn primary_keys_sort_numerically_within_a_value() {
        let def = definition();
        let values = vec![
            ScalarValue::Utf8(Some("apac".to_string())),
            ScalarValue::Int64(Some(1)),
        ];
        let low = encode_index_key(&def, &values, -1).expect("encode");
        let high = encode_index_key(&def, &values, 1).expect("encode");
        assert!(low < high);
    }

    #[test]
    fn range_for_prefix_contains_only_matching_entries() {
        let def = definition();
        let (start, end) =
            index_key_range(&def, &[ScalarValue::Utf8(Some("emea".to_string()))]).expect("range");
        let inside = encode_index_key(
            &def,
            &[ScalarValue::Utf8(Some("emea".to_string())), ScalarValue::Int64(Some(3))],
            1,
        )
        .expect("encode");
        let outside = encode_index_key(
            &def,
            &[ScalarValue::Utf8(Some("emeb".to_string())), ScalarValue::Int64(Some(3))],
            1,
        )
        .expect("encode");
        assert!(inside >= start && inside < end);
        assert!(!(outside >= start && outside < end));
    }

    #[test]
    fn keys_of_another_index_are_rejected() {
        let def = definition();
        let mut other = definition();
        other.index_id = 4;
        let key = encode_index_key(
            &other,
            &[ScalarValue::Utf8(Some("x".to_string())), ScalarValue::Int64(Some(1))],
            1,
        )
        .expect("encode");
        let err = decode_search_row(&def, &key).expect_err("wrong index");
        assert!(err.to_string().contains("index_id mismatch"));
    }

    #[test]
    fn truncated_and_padded_keys_are_rejected() {
        let def = definition();
        let key = encode_index_key(
            &def,
            &[ScalarValue::Utf8(Some("emea".to_string())), ScalarValue::Int64(Some(1))],
            7,
        )
        .expect("encode");
        assert!(decode_search_row(&def, &key[..key.len() - 3]).is_err());

        let mut padded = key[..key.len() - PRIMARY_KEY_SUFFIX_LEN].to_vec();
        padded.push(0xAA);
        padded.extend_from_slice(&key[key.len() - PRIMARY_KEY_SUFFIX_LEN..]);
        assert!(decode_search_row(&def, &padded).is_err());
    }

    #[test]
    fn wrong_value_type_is_rejected() {
        let def = definition();
        let err = encode_index_key(
            &def,
            &[ScalarValue::Boolean(Some(true)), ScalarValue::Int64(Some(1))],
            1,
        )
        .expect_err("type mismatch");
        assert!(err.to_string().contains("Utf8 column 'region'"));
    }

    #[test]
    fn primary_row_keys_sort_by_primary_key() {
        assert!(encode_primary_row_key(9, -5) < encode_primary_row_key(9, 5));
        assert_eq!(encode_primary_row_key(9, 5).len(), 19);
    }
}
