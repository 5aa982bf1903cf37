//! ByteRange handling for PDF signatures.
//!
//! PDF digital signatures use a ByteRange array to specify which portions
//! of the document are covered by the signature. The signature itself is
//! stored in a placeholder that is excluded from the signed bytes.
//!
//! ## ByteRange Format
//!
//! The ByteRange is an array of four integers:
//! `[offset1, length1, offset2, length2]`
//!
//! Where:
//! - `offset1` = 0 (start of file)
//! - `length1` = byte offset where the signature value begins
//! - `offset2` = byte offset where the signature value ends
//! - `length2` = remaining bytes to end of file
//!
//! The signature value is a hex-encoded string within `<` and `>` delimiters.

use std::fmt;

use crate::error::{Error, Result};
use crate::object::Object;

/// Fixed-width `/ByteRange` value written before the real offsets are known.
///
/// Ten digits per entry leaves room for any offset below 10 GB, so the
/// patched array never needs more bytes than the placeholder.
pub const BYTE_RANGE_PLACEHOLDER: &str = "[0 9999999999 9999999999 9999999999]";

/// A signature's `/ByteRange` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteRange {
    pub pre_start: i64,
    pub pre_len: i64,
    pub post_start: i64,
    pub post_len: i64,
}

impl ByteRange {
    pub fn new(pre_start: i64, pre_len: i64, post_start: i64, post_len: i64) -> Self {
        Self {
            pre_start,
            pre_len,
            post_start,
            post_len,
        }
    }

    /// Ranges for a file of `file_size` bytes whose `/Contents` value starts
    /// at `contents_offset` (the `<`) and occupies `placeholder_size` bytes.
    pub fn around_placeholder(
        file_size: usize,
        contents_offset: usize,
        placeholder_size: usize,
    ) -> Self {
        let post_start = (contents_offset + placeholder_size) as i64;
        Self::new(0, contents_offset as i64, post_start, file_size as i64 - post_start)
    }

    /// Build from the four integers of a PDF array.
    pub fn from_slice(values: &[i64]) -> Option<Self> {
        match values {
            [a, b, c, d] => Some(Self::new(*a, *b, *c, *d)),
            _ => None,
        }
    }

    /// Read a `/ByteRange` array object.
    pub fn from_object(obj: &Object) -> Option<Self> {
        let values: Option<Vec<i64>> = obj.as_array()?.iter().map(Object::as_integer).collect();
        Self::from_slice(&values?)
    }

    pub fn to_array(&self) -> [i64; 4] {
        [self.pre_start, self.pre_len, self.post_start, self.post_len]
    }

    /// Boundary offsets `[pre_start, pre_end, post_start, post_end]`.
    pub fn boundaries(&self) -> Vec<i64> {
        vec![
            self.pre_start,
            self.pre_start + self.pre_len,
            self.post_start,
            self.post_start + self.post_len,
        ]
    }

    /// Check that both spans lie inside a document of `doc_len` bytes and
    /// that the first ends before the second starts.
    pub fn check(&self, doc_len: usize) -> Result<()> {
        let invalid = || Error::InvalidByteRange {
            range: self.to_array().to_vec(),
            len: doc_len,
        };
        if self.pre_start < 0 || self.pre_len < 0 || self.post_start < 0 || self.post_len < 0 {
            return Err(invalid());
        }
        let pre_end = self.pre_start.checked_add(self.pre_len).ok_or_else(invalid)?;
        let post_end = self.post_start.checked_add(self.post_len).ok_or_else(invalid)?;
        if pre_end > self.post_start || post_end > doc_len as i64 {
            return Err(invalid());
        }
        Ok(())
    }

    /// The two covered spans as `(offset, length)` pairs. Call [`check`]
    /// first; negative values are clamped to zero.
    ///
    /// [`check`]: ByteRange::check
    pub fn spans(&self) -> [(usize, usize); 2] {
        let clamp = |v: i64| v.max(0) as usize;
        [
            (clamp(self.pre_start), clamp(self.pre_len)),
            (clamp(self.post_start), clamp(self.post_len)),
        ]
    }

    /// The excluded gap between the spans, as `(offset, length)`.
    pub fn gap(&self) -> (usize, usize) {
        let start = (self.pre_start + self.pre_len).max(0) as usize;
        let end = self.post_start.max(0) as usize;
        (start, end.saturating_sub(start))
    }

    /// Concatenate the two covered spans of `data`.
    pub fn extract_signed_bytes(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.check(data.len())?;
        let [(o1, l1), (o2, l2)] = self.spans();
        let mut signed = Vec::with_capacity(l1 + l2);
        signed.extend_from_slice(&data[o1..o1 + l1]);
        signed.extend_from_slice(&data[o2..o2 + l2]);
        Ok(signed)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {} {} {}]", self.pre_start, self.pre_len, self.post_start, self.post_len)
    }
}

/// Decode the signature the gap actually holds.
///
/// The gap must be exactly `<` hex digits `>`; anything else (other
/// objects, stray bytes) yields an empty signature.
pub fn checked_signature(gap: &[u8]) -> Vec<u8> {
    let inner = match gap {
        [b'<', inner @ .., b'>'] => inner,
        _ => return Vec::new(),
    };
    if inner.is_empty() || inner.len() % 2 != 0 || !inner.iter().all(u8::is_ascii_hexdigit) {
        return Vec::new();
    }
    hex::decode(inner).unwrap_or_default()
}

/// Whether a signature covers the whole document except its own value.
///
/// `boundaries` is `[pre_start, pre_end, post_start, post_end]`. Appending a
/// single byte after signing makes this false.
pub fn signs_total_document(
    boundaries: &[i64],
    document_length: i64,
    checked_signature: &[u8],
) -> bool {
    match boundaries {
        [b0, b1, b2, b3] => {
            *b0 == 0
                && *b1 >= 0
                && b2 > b1
                && b3 >= b2
                && *b3 == document_length
                && !checked_signature.is_empty()
        },
        _ => false,
    }
}

/// Find the `/Contents` value in a signature dictionary.
///
/// Searches for `/Contents` followed by optional whitespace and `<`, starting
/// at `from`, and returns the offset of the `<`.
pub fn find_contents_offset(pdf_data: &[u8], from: usize) -> Option<usize> {
    find_after_key(pdf_data, from, b"/Contents", b'<')
}

/// Find the `[` of the `/ByteRange` placeholder, starting at `from`.
pub fn find_byte_range_offset(pdf_data: &[u8], from: usize) -> Option<usize> {
    find_after_key(pdf_data, from, b"/ByteRange", b'[')
}

fn find_after_key(pdf_data: &[u8], from: usize, key: &[u8], open: u8) -> Option<usize> {
    let window = pdf_data.get(from..)?;
    let mut pos = 0;
    while pos + key.len() < window.len() {
        if window[pos..].starts_with(key) {
            for (i, &byte) in window.iter().enumerate().skip(pos + key.len()) {
                if byte == open {
                    return Some(from + i);
                }
                if !matches!(byte, b' ' | b'\t' | b'\n' | b'\r') {
                    break;
                }
            }
        }
        pos += 1;
    }
    None
}

/// Overwrite the `/ByteRange` placeholder at `offset` with `range`,
/// padding with spaces so the file length is unchanged.
pub fn patch_byte_range(pdf_data: &mut [u8], offset: usize, range: &ByteRange) -> Result<()> {
    let width = BYTE_RANGE_PLACEHOLDER.len();
    let slot = pdf_data
        .get_mut(offset..offset + width)
        .ok_or_else(|| Error::InvalidPdf("ByteRange placeholder out of bounds".to_string()))?;
    if slot != BYTE_RANGE_PLACEHOLDER.as_bytes() {
        return Err(Error::InvalidPdf(format!("no ByteRange placeholder at offset {}", offset)));
    }
    let digits = format!(
        "{} {} {} {}",
        range.pre_start, range.pre_len, range.post_start, range.post_len
    );
    if digits.len() + 2 > width {
        return Err(Error::InvalidPdf(format!("ByteRange {} does not fit the placeholder", range)));
    }
    let patched = format!("[{:<pad$}]", digits, pad = width - 2);
    slot.copy_from_slice(patched.as_bytes());
    Ok(())
}

/// Replace the `/Contents` placeholder at `contents_offset` with the hex
/// encoding of `signature`, zero-padded to the placeholder width.
pub fn insert_signature(
    pdf_data: &mut [u8],
    contents_offset: usize,
    placeholder_size: usize,
    signature: &[u8],
) -> Result<()> {
    let signature_hex = hex::encode_upper(signature);
    if signature_hex.len() + 2 > placeholder_size {
        return Err(Error::InvalidPdf(format!(
            "Signature ({} bytes) exceeds placeholder size ({} bytes)",
            signature_hex.len() + 2,
            placeholder_size
        )));
    }
    let slot = pdf_data
        .get_mut(contents_offset..contents_offset + placeholder_size)
        .ok_or_else(|| {
            Error::InvalidPdf("Signature insertion would exceed file bounds".to_string())
        })?;

    let mut value = String::with_capacity(placeholder_size);
    value.push('<');
    value.push_str(&signature_hex);
    value.push_str(&"0".repeat(placeholder_size - 2 - signature_hex.len()));
    value.push('>');
    slot.copy_from_slice(value.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_around_placeholder() {
        let range = ByteRange::around_placeholder(1000, 400, 100);
        assert_eq!(range.to_array(), [0, 400, 500, 500]);
        assert_eq!(range.boundaries(), vec![0, 400, 500, 1000]);
        assert_eq!(range.to_string(), "[0 400 500 500]");
    }

    #[test]
    fn test_from_object() {
        let obj = Object::Array(vec![
            Object::Integer(0),
            Object::Integer(10),
            Object::Integer(20),
            Object::Integer(5),
        ]);
        assert_eq!(ByteRange::from_object(&obj), Some(ByteRange::new(0, 10, 20, 5)));
        let short = Object::Array(vec![Object::Integer(0), Object::Integer(10)]);
        assert_eq!(ByteRange::from_object(&short), None);
        let mixed = Object::Array(vec![
            Object::Integer(0),
            Object::Name("x".into()),
            Object::Integer(20),
            Object::Integer(5),
        ]);
        assert_eq!(ByteRange::from_object(&mixed), None);
    }

    #[test]
    fn test_extract_signed_bytes() {
        let pdf_data = b"AAABBBCCC";
        let range = ByteRange::new(0, 3, 6, 3);
        assert_eq!(range.extract_signed_bytes(pdf_data).unwrap(), b"AAACCC");
        assert_eq!(range.gap(), (3, 3));
    }

    #[test]
    fn test_check_rejects_out_of_bounds() {
        assert!(ByteRange::new(0, 100, 150, 50).check(200).is_ok());
        assert!(ByteRange::new(0, 100, 150, 100).check(200).is_err());
        assert!(ByteRange::new(0, 160, 150, 10).check(200).is_err());
        assert!(ByteRange::new(-1, 10, 20, 10).check(200).is_err());
        assert!(ByteRange::new(0, i64::MAX, 20, 10).check(200).is_err());
    }

    #[test]
    fn test_checked_signature() {
        assert_eq!(checked_signature(b"<0A0B>"), vec![0x0A, 0x0B]);
        assert!(checked_signature(b"<>").is_empty());
        assert!(checked_signature(b"<0A0B> ").is_empty());
        assert!(checked_signature(b"<0A0G>").is_empty());
        assert!(checked_signature(b"(0A0B)").is_empty());
    }

    #[test]
    fn test_signs_total_document() {
        let sig = [1u8, 2, 3];
        assert!(signs_total_document(&[0, 10, 20, 30], 30, &sig));
        assert!(!signs_total_document(&[0, 10, 20, 30], 31, &sig));
        assert!(!signs_total_document(&[0, 10, 10, 30], 30, &sig));
        assert!(!signs_total_document(&[1, 10, 20, 30], 30, &sig));
        assert!(!signs_total_document(&[0, 10, 20, 30], 30, &[]));
        assert!(!signs_total_document(&[0, 10, 20], 30, &sig));
    }

    #[test]
    fn test_patch_byte_range_keeps_width() {
        let mut data =
            format!("/ByteRange {} /Contents <0000>", BYTE_RANGE_PLACEHOLDER).into_bytes();
        let len = data.len();
        let offset = find_byte_range_offset(&data, 0).unwrap();
        assert_eq!(offset, 11);
        patch_byte_range(&mut data, offset, &ByteRange::new(0, 120, 380, 4096)).unwrap();
        assert_eq!(data.len(), len);
        let text = String::from_utf8(data).unwrap();
        assert!(text.starts_with("/ByteRange [0 120 380 4096"));
        assert!(text.contains(&format!("4096{}]", " ".repeat(20))));
    }

    #[test]
    fn test_patch_requires_placeholder() {
        let mut data = b"/ByteRange [0 1 2 3]".to_vec();
        assert!(patch_byte_range(&mut data, 11, &ByteRange::new(0, 1, 2, 3)).is_err());
    }

    #[test]
    fn test_insert_signature() {
        let mut pdf_data = b"XX<00000000>YY".to_vec();
        let offset = find_contents_offset(b"/Contents <00000000>", 0).unwrap();
        assert_eq!(offset, 10);
        insert_signature(&mut pdf_data, 2, 10, &[0xAB, 0xCD]).unwrap();
        assert_eq!(&pdf_data, b"XX<ABCD0000>YY");
    }

    #[test]
    fn test_insert_signature_too_large() {
        let mut pdf_data = b"XX<00000000>YY".to_vec();
        let result = insert_signature(&mut pdf_data, 2, 10, &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);
        assert!(result.is_err());
    }
}
