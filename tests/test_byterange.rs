//! Property tests for byte range coverage.

use pdf_oxide_sign::signatures::byterange::{checked_signature, insert_signature, patch_byte_range};
use pdf_oxide_sign::signatures::{signs_total_document, ByteRange};
use proptest::prelude::*;

/// A fake document with a zeroed `/Contents` placeholder of `max` bytes.
fn document(prefix: usize, suffix: usize, max: usize) -> (Vec<u8>, usize, usize) {
    let mut data = vec![b'a'; prefix];
    data.extend_from_slice(b"/Contents ");
    let contents_offset = data.len();
    data.push(b'<');
    data.extend(std::iter::repeat(b'0').take(max * 2));
    data.push(b'>');
    data.extend(std::iter::repeat(b'z').take(suffix));
    (data, contents_offset, max * 2 + 2)
}

proptest! {
    #[test]
    fn prop_range_around_placeholder_covers_document(
        prefix in 0usize..200,
        suffix in 0usize..200,
        max in 1usize..64,
        sig in prop::collection::vec(any::<u8>(), 1..32),
    ) {
        prop_assume!(sig.len() <= max);
        let (mut data, offset, size) = document(prefix, suffix, max);
        let range = ByteRange::around_placeholder(data.len(), offset, size);
        prop_assert!(range.check(data.len()).is_ok());

        insert_signature(&mut data, offset, size, &sig).unwrap();
        let (gap_start, gap_len) = range.gap();
        let checked = checked_signature(&data[gap_start..gap_start + gap_len]);
        prop_assert_eq!(&checked[..sig.len()], &sig[..]);

        let len = data.len() as i64;
        prop_assert!(signs_total_document(&range.boundaries(), len, &checked));
        // one trailing byte is enough to lose coverage
        prop_assert!(!signs_total_document(&range.boundaries(), len + 1, &checked));
    }

    #[test]
    fn prop_gap_must_be_a_hex_string(gap in prop::collection::vec(any::<u8>(), 0..40)) {
        let checked = checked_signature(&gap);
        let well_formed = gap.len() >= 4
            && gap.first() == Some(&b'<')
            && gap.last() == Some(&b'>')
            && (gap.len() - 2) % 2 == 0
            && gap[1..gap.len() - 1].iter().all(u8::is_ascii_hexdigit);
        prop_assert_eq!(!checked.is_empty(), well_formed);
    }
}

#[test]
fn test_boundaries_shape() {
    assert!(!signs_total_document(&[0, 10, 20], 30, b"sig"));
    assert!(!signs_total_document(&[1, 10, 20, 30], 30, b"sig"));
    assert!(!signs_total_document(&[0, 10, 20, 30], 30, b""));
    assert!(signs_total_document(&[0, 10, 20, 30], 30, b"sig"));
}

#[test]
fn test_patch_keeps_length() {
    let mut data = b"/ByteRange [0 9999999999 9999999999 9999999999] /Contents <00>".to_vec();
    let before = data.len();
    let range = ByteRange::new(0, 100, 200, 50);
    patch_byte_range(&mut data, 11, &range).unwrap();
    assert_eq!(data.len(), before);
    let text = String::from_utf8(data).unwrap();
    assert!(text.starts_with("/ByteRange [0 100 200 50 "));
    assert!(text.contains(" ] /Contents"));
}
