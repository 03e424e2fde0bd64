//! Workflow extraction from PNG images.
//!
//! The editor embeds the workflow JSON in a `tEXt` chunk keyed
//! `workflow` when saving images. This walks the chunk stream directly:
//! signature, then `length | type | data | crc` records until EOF.

use std::collections::HashMap;

use crate::error::{ComfyError, Result};

const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// All `tEXt` chunks of a PNG, keyed by keyword.
pub fn png_text_chunks(data: &[u8]) -> Result<HashMap<String, String>> {
    if data.len() < PNG_SIGNATURE.len() || data[..8] != PNG_SIGNATURE {
        return Err(ComfyError::Malformed("not a valid PNG file".to_string()));
    }

    let mut chunks = HashMap::new();
    let mut offset = PNG_SIGNATURE.len();
    while offset + 8 <= data.len() {
        let length = u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        let chunk_type = &data[offset + 4..offset + 8];
        let body_start = offset + 8;
        let body_end = body_start
            .checked_add(length)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| ComfyError::Malformed("truncated PNG chunk".to_string()))?;

        if chunk_type == b"tEXt" {
            let body = &data[body_start..body_end];
            let split = body
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| ComfyError::Malformed("malformed tEXt chunk".to_string()))?;
            let keyword = String::from_utf8_lossy(&body[..split]).into_owned();
            let content = String::from_utf8_lossy(&body[split + 1..]).into_owned();
            chunks.insert(keyword, content);
        }

        // body + 4-byte CRC
        offset = body_end + 4;
    }

    Ok(chunks)
}

/// The embedded workflow JSON, or `Malformed` when the image carries none.
pub fn workflow_from_png(data: &[u8]) -> Result<String> {
    let mut chunks = png_text_chunks(data)?;
    chunks
        .remove("workflow")
        .ok_or_else(|| ComfyError::Malformed("png does not contain workflow metadata".to_string()))
}
