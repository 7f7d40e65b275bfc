//! Shared helpers for the built-in `f32` spaces.

/// Width in bytes of one encoded component.
pub(crate) const COMPONENT_BYTES: usize = size_of::<f32>();

/// Encodes `values` as a little-endian byte blob suitable for insertion.
///
/// # Examples
/// ```
/// use vectorlib_core::{decode_f32, encode_f32};
///
/// let bytes = encode_f32(&[1.5, -2.0]);
/// assert_eq!(bytes.len(), 8);
/// assert_eq!(decode_f32(&bytes), vec![1.5, -2.0]);
/// ```
#[must_use]
pub fn encode_f32(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_le_bytes()).collect()
}

/// Decodes a little-endian byte blob back into `f32` components.
///
/// Trailing bytes that do not form a whole component are ignored.
#[must_use]
pub fn decode_f32(bytes: &[u8]) -> Vec<f32> {
    components(bytes).collect()
}

#[inline]
pub(crate) fn components(bytes: &[u8]) -> impl Iterator<Item = f32> + '_ {
    bytes
        .chunks_exact(COMPONENT_BYTES)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_ignores_partial_trailing_component() {
        let mut bytes = encode_f32(&[4.0]);
        bytes.push(0xFF);
        assert_eq!(decode_f32(&bytes), vec![4.0]);
    }
}
