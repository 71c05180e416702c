// SPDX-FileCopyrightText: © 2024 Tenstorrent Inc.
// SPDX-License-Identifier: Apache-2.0

//! Decoders for the two memory image encodings found in a workload bundle.

use super::ImageError;

pub const BIN_FILE_V1_MAGIC: u32 = 0x9704266B;
/// Eight little-endian words: the magic followed by seven must-be-zero words.
pub const BIN_HEADER_SIZE: usize = 32;
/// `address: u64`, `length: u32`, `reserved: u32`.
const CHUNK_HEADER_SIZE: usize = 16;

/// A contiguous run of bytes destined for one address in every core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageChunk {
    pub address: u64,
    pub data: Vec<u8>,
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut word = [0; 4];
    word.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(word)
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut word = [0; 8];
    word.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(word)
}

pub fn parse_bin(bytes: &[u8]) -> Result<Vec<ImageChunk>, ImageError> {
    if bytes.len() < BIN_HEADER_SIZE {
        return Err(ImageError::format("truncated within binary file header"));
    }

    let (header, mut rest) = bytes.split_at(BIN_HEADER_SIZE);
    if le_u32(header) != BIN_FILE_V1_MAGIC {
        return Err(ImageError::format("does not start with expected magic"));
    }
    if header[4..].iter().any(|b| *b != 0) {
        return Err(ImageError::format("header contains nonzero in MBZ field"));
    }

    let mut chunks = Vec::new();
    while !rest.is_empty() {
        if rest.len() < CHUNK_HEADER_SIZE {
            return Err(ImageError::format("truncated within chunk header"));
        }
        let address = le_u64(&rest[0..]);
        let length = le_u32(&rest[8..]) as usize;
        if le_u32(&rest[12..]) != 0 {
            return Err(ImageError::format("chunk header contains nonzero in MBZ field"));
        }
        rest = &rest[CHUNK_HEADER_SIZE..];

        if rest.len() < length {
            return Err(ImageError::format("truncated within data chunk"));
        }
        let (data, tail) = rest.split_at(length);
        chunks.push(ImageChunk {
            address,
            data: data.to_vec(),
        });
        rest = tail;
    }

    Ok(chunks)
}

pub fn parse_hex(text: &str) -> Result<Vec<ImageChunk>, ImageError> {
    let mut chunks = Vec::new();
    let mut current: Option<ImageChunk> = None;

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(addr) = line.strip_prefix('@') {
            let word = u64::from_str_radix(addr.trim(), 16).map_err(|_| {
                ImageError::format(format!("bad address on line {}: {line}", lineno + 1))
            })?;
            if let Some(chunk) = current.take() {
                if !chunk.data.is_empty() {
                    chunks.push(chunk);
                }
            }
            // Addresses are in words
            current = Some(ImageChunk {
                address: word * 4,
                data: Vec::new(),
            });
        } else {
            let value = u32::from_str_radix(line, 16).map_err(|_| {
                ImageError::format(format!("bad data word on line {}: {line}", lineno + 1))
            })?;
            match current.as_mut() {
                Some(chunk) => chunk.data.extend_from_slice(&value.to_le_bytes()),
                None => return Err(ImageError::format("data before the first address line")),
            }
        }
    }

    if let Some(chunk) = current {
        if !chunk.data.is_empty() {
            chunks.push(chunk);
        }
    }

    Ok(chunks)
}

#[cfg(test)]
pub(crate) fn encode_bin(chunks: &[ImageChunk]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&BIN_FILE_V1_MAGIC.to_le_bytes());
    out.extend_from_slice(&[0; BIN_HEADER_SIZE - 4]);
    for chunk in chunks {
        out.extend_from_slice(&chunk.address.to_le_bytes());
        out.extend_from_slice(&(chunk.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&chunk.data);
    }
    out
}
