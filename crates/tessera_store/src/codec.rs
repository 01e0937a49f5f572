use crate::Cells;

/// Encodes cells as `count` followed by length-prefixed name/value pairs.
pub fn encode_cells(cells: &Cells) -> Vec<u8> {
    let mut size = 4;
    for (name, value) in cells {
        size += 4 + name.len() + 4 + value.len();
    }
    let mut out = Vec::with_capacity(size);
    out.extend_from_slice(&(cells.len() as u32).to_be_bytes());
    for (name, value) in cells {
        out.extend_from_slice(&(name.len() as u32).to_be_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&(value.len() as u32).to_be_bytes());
        out.extend_from_slice(value);
    }
    out
}

pub fn decode_cells(data: &[u8]) -> anyhow::Result<Cells> {
    let mut offset = 0usize;
    let count = read_u32(data, &mut offset)? as usize;
    let mut cells = Cells::new();
    for _ in 0..count {
        let name_len = read_u32(data, &mut offset)? as usize;
        anyhow::ensure!(offset + name_len <= data.len(), "short cell name");
        let name = std::str::from_utf8(&data[offset..offset + name_len])
            .map_err(|err| anyhow::anyhow!("invalid cell name: {err}"))?
            .to_string();
        offset += name_len;

        let value_len = read_u32(data, &mut offset)? as usize;
        anyhow::ensure!(offset + value_len <= data.len(), "short cell value");
        cells.insert(name, data[offset..offset + value_len].to_vec());
        offset += value_len;
    }
    anyhow::ensure!(offset == data.len(), "trailing bytes after cells");
    Ok(cells)
}

pub(crate) fn read_u32(data: &[u8], offset: &mut usize) -> anyhow::Result<u32> {
    anyhow::ensure!(*offset + 4 <= data.len(), "short u32");
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[*offset..*offset + 4]);
    *offset += 4;
    Ok(u32::from_be_bytes(buf))
}

pub(crate) fn read_u64(data: &[u8], offset: &mut usize) -> anyhow::Result<u64> {
    anyhow::ensure!(*offset + 8 <= data.len(), "short u64");
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[*offset..*offset + 8]);
    *offset += 8;
    Ok(u64::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_cells_are_rejected() {
        let mut cells = Cells::new();
        cells.insert("c".to_string(), 7i64.to_be_bytes().to_vec());
        let encoded = encode_cells(&cells);
        assert_eq!(decode_cells(&encoded).expect("decode"), cells);

        let err = decode_cells(&encoded[..encoded.len() - 1]).expect_err("truncated value");
        assert!(err.to_string().contains("short cell value"));
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let mut encoded = encode_cells(&Cells::new());
        encoded.push(0xff);
        assert!(decode_cells(&encoded).is_err());
    }
}
