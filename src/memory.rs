//! Width- and alignment-correct access to arbitrary target memory.
//!
//! The transaction port only guarantees correct transfers when the address
//! and the transfer width agree with natural alignment. An arbitrary byte
//! span is therefore decomposed into a leading partial transfer up to the
//! next aligned boundary, a run of maximal-width aligned transfers, and a
//! trailing partial transfer. Each chunk handed to the port has an address
//! and length sharing the chunk's natural alignment.
//!
//! Memory at this layer is not transactional: when a sub-transfer fails the
//! whole call aborts with the failing address, and earlier sub-transfers
//! are not rolled back.

use crate::error::DebugError;
use crate::probe::DebugPort;

/// Ceiling on the access width used for a memory transfer.
///
/// Some target memory only tolerates accesses of a specific width
/// (byte-wide peripheral FIFOs, for instance); the ceiling lets a caller pin
/// the decomposition below word width.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Align {
    /// Byte accesses only.
    Byte = 1,
    /// At most half-word accesses.
    Halfword = 2,
    /// At most word accesses, the default.
    Word = 4,
}

/// One aligned sub-transfer of a decomposed span.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub address: u32,
    pub len: usize,
}

/// Widest width usable at `address` given the remaining span and the
/// caller's ceiling.
fn width_at(address: u32, remaining: usize, ceiling: Align) -> usize {
    let mut width = ceiling as usize;
    while width > 1 && (address as usize % width != 0 || remaining < width) {
        width /= 2;
    }
    width
}

/// Decomposes `len` bytes at `address` into aligned sub-transfers.
///
/// Chunks of the ceiling width are batched into maximal runs; narrower
/// leading and trailing transfers are emitted one access at a time.
pub(crate) fn aligned_chunks(mut address: u32, mut len: usize, ceiling: Align) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    while len > 0 {
        let width = width_at(address, len, ceiling);
        // Only word-wide transfers are batched into runs. A longer run at a
        // narrower ceiling could legitimately be widened by the port (the
        // width is inferred from address and length), which would violate
        // the ceiling.
        let chunk_len = if ceiling == Align::Word && width == 4 {
            len - len % width
        } else {
            width
        };

        chunks.push(Chunk {
            address,
            len: chunk_len,
        });
        address += chunk_len as u32;
        len -= chunk_len;
    }

    chunks
}

/// Reads an arbitrary, possibly misaligned byte span from target memory.
pub(crate) fn read_memory<P: DebugPort>(
    port: &mut P,
    address: u32,
    data: &mut [u8],
    align: Align,
) -> Result<(), DebugError> {
    let base = address;
    for chunk in aligned_chunks(address, data.len(), align) {
        let offset = (chunk.address - base) as usize;
        port.read_block(chunk.address, &mut data[offset..offset + chunk.len])
            .map_err(|source| DebugError::MemoryAccessFault {
                address: chunk.address,
                source,
            })?;
    }
    Ok(())
}

/// Writes an arbitrary, possibly misaligned byte span to target memory.
pub(crate) fn write_memory<P: DebugPort>(
    port: &mut P,
    address: u32,
    data: &[u8],
    align: Align,
) -> Result<(), DebugError> {
    let base = address;
    for chunk in aligned_chunks(address, data.len(), align) {
        let offset = (chunk.address - base) as usize;
        port.write_block(chunk.address, &data[offset..offset + chunk.len])
            .map_err(|source| DebugError::MemoryAccessFault {
                address: chunk.address,
                source,
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(address: u32, len: usize) -> Chunk {
        Chunk { address, len }
    }

    #[test]
    fn aligned_span_is_a_single_run() {
        assert_eq!(
            aligned_chunks(0x2000_0000, 16, Align::Word),
            vec![chunk(0x2000_0000, 16)]
        );
    }

    #[test]
    fn misaligned_span_gets_head_run_and_tail() {
        // 1 byte to reach the half-word boundary, 2 bytes to reach the word
        // boundary, a word run, then a half-word and a byte tail.
        assert_eq!(
            aligned_chunks(0x2000_0001, 10, Align::Word),
            vec![
                chunk(0x2000_0001, 1),
                chunk(0x2000_0002, 2),
                chunk(0x2000_0004, 4),
                chunk(0x2000_0008, 2),
                chunk(0x2000_000A, 1),
            ]
        );
    }

    #[test]
    fn short_span_never_exceeds_its_length() {
        assert_eq!(
            aligned_chunks(0x2000_0000, 3, Align::Word),
            vec![chunk(0x2000_0000, 2), chunk(0x2000_0002, 1)]
        );
        assert_eq!(
            aligned_chunks(0x2000_0003, 1, Align::Word),
            vec![chunk(0x2000_0003, 1)]
        );
    }

    #[test]
    fn ceiling_caps_the_transfer_width() {
        // Sub-word ceilings are never batched: a 8-byte run at a word
        // aligned address would let the port widen the access again.
        assert_eq!(
            aligned_chunks(0x2000_0000, 4, Align::Byte),
            vec![
                chunk(0x2000_0000, 1),
                chunk(0x2000_0001, 1),
                chunk(0x2000_0002, 1),
                chunk(0x2000_0003, 1),
            ]
        );
        assert_eq!(
            aligned_chunks(0x2000_0000, 8, Align::Halfword),
            vec![
                chunk(0x2000_0000, 2),
                chunk(0x2000_0002, 2),
                chunk(0x2000_0004, 2),
                chunk(0x2000_0006, 2),
            ]
        );
    }

    #[test]
    fn decomposition_is_contiguous_and_alignment_correct() {
        for base in 0u32..8 {
            for len in 1usize..40 {
                for ceiling in [Align::Byte, Align::Halfword, Align::Word] {
                    let address = 0x1000_0000 + base;
                    let chunks = aligned_chunks(address, len, ceiling);

                    let total: usize = chunks.iter().map(|c| c.len).sum();
                    assert_eq!(total, len);

                    let mut next = address;
                    for c in &chunks {
                        assert_eq!(c.address, next);
                        // The width the port infers from address and length
                        // never exceeds the requested ceiling.
                        let implied = 1u32 << (c.address | c.len as u32).trailing_zeros();
                        assert!(implied.min(4) <= ceiling as u32);
                        next += c.len as u32;
                    }
                }
            }
        }
    }
}
