//! Bit packing for uncompressed frame payloads.
//!
//! Samples of `bit_depth` bits (10..=16) are stored back to back, most
//! significant bit first, in a stream of little-endian 16-bit words.
//! Unpacking sample `i` works on its bit address: the containing word pair
//! is loaded as one 32-bit value (first word in the high half), shifted so
//! the sample's first bit lands at bit 31, then the top `bit_depth` bits are
//! taken. The word buffer carries one zero word of padding so the last
//! sample needs no bounds branch.

/// Bytes needed to pack `samples` values at `bit_depth` bits each.
#[inline]
pub fn packed_len(samples: usize, bit_depth: u8) -> usize {
    (samples * bit_depth as usize).div_ceil(16) * 2
}

/// Pack samples into the container's bit layout.
///
/// Values wider than `bit_depth` are truncated to their low bits.
pub fn pack_bits(samples: &[u16], bit_depth: u8) -> Vec<u8> {
    let depth = bit_depth as usize;
    let word_count = (samples.len() * depth).div_ceil(16);
    let mut words = vec![0u16; word_count + 1];
    let mask = (1u32 << depth) - 1;

    for (i, &sample) in samples.iter().enumerate() {
        let bit_address = i * depth;
        let word = bit_address / 16;
        let shift = bit_address % 16;
        let aligned = ((sample as u32) & mask) << (32 - depth) >> shift;
        words[word] |= (aligned >> 16) as u16;
        words[word + 1] |= aligned as u16;
    }

    words.truncate(word_count);
    let mut out = Vec::with_capacity(word_count * 2);
    for w in words {
        out.extend_from_slice(&w.to_le_bytes());
    }
    out
}

/// Unpack `out.len()` samples from `packed` into 16-bit values.
///
/// `words` is scratch space reused across calls; it is resized as needed.
/// Returns `false` when `packed` is too short for the requested samples.
pub fn unpack_bits(packed: &[u8], bit_depth: u8, out: &mut [u16], words: &mut Vec<u16>) -> bool {
    let depth = bit_depth as u32;
    if packed.len() < packed_len(out.len(), bit_depth) {
        return false;
    }

    words.clear();
    words.extend(
        packed
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]])),
    );
    words.push(0);

    for (i, sample) in out.iter_mut().enumerate() {
        let bit_address = i as u32 * depth;
        let word = (bit_address / 16) as usize;
        let offset = bit_address % 16;
        // Two LE words read as one u32 have the first word in the low half;
        // rotating by 16 puts it in the high half for MSB-first extraction.
        let pair = (words[word] as u32) | ((words[word + 1] as u32) << 16);
        let data = pair.rotate_left(16);
        *sample = ((data << offset) >> (32 - depth)) as u16;
    }
    true
}
