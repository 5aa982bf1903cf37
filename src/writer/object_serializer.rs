//! PDF object serialization.
//!
//! Serializes PDF objects to their byte representation according to
//! ISO 32000-1:2008, Section 7.3.

use std::collections::HashMap;

use crate::object::{Object, ObjectRef};

/// Serializer for PDF objects.
///
/// Dictionary keys are written in sorted order so output is deterministic,
/// which keeps placeholder offsets stable between runs.
#[derive(Debug, Clone, Default)]
pub struct ObjectSerializer {
    /// Whether to use compact formatting (minimal whitespace)
    compact: bool,
}

impl ObjectSerializer {
    /// Create a new object serializer with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a compact serializer (minimal whitespace).
    pub fn compact() -> Self {
        Self { compact: true }
    }

    /// Serialize an object to bytes.
    pub fn serialize(&self, obj: &Object) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_object(&mut buf, obj);
        buf
    }

    /// Serialize an object to a string (for debugging and tests).
    pub fn serialize_to_string(&self, obj: &Object) -> String {
        String::from_utf8_lossy(&self.serialize(obj)).into_owned()
    }

    /// Serialize an indirect object definition.
    ///
    /// Format: `{id} {gen} obj\n{object}\nendobj\n`
    pub fn serialize_indirect(&self, id: u32, gen: u16, obj: &Object) -> Vec<u8> {
        let mut buf = format!("{} {} obj\n", id, gen).into_bytes();
        self.write_object(&mut buf, obj);
        buf.extend_from_slice(b"\nendobj\n");
        buf
    }

    fn write_object(&self, w: &mut Vec<u8>, obj: &Object) {
        match obj {
            Object::Null => w.extend_from_slice(b"null"),
            Object::Boolean(b) => w.extend_from_slice(if *b { b"true" } else { b"false" }),
            Object::Integer(i) => w.extend_from_slice(i.to_string().as_bytes()),
            Object::Real(r) => w.extend_from_slice(format_real(*r).as_bytes()),
            Object::String(s) => write_string(w, s),
            Object::Name(n) => write_name(w, n),
            Object::Array(arr) => {
                w.push(b'[');
                for (i, item) in arr.iter().enumerate() {
                    if i > 0 {
                        w.push(b' ');
                    }
                    self.write_object(w, item);
                }
                w.push(b']');
            },
            Object::Dictionary(dict) => self.write_dictionary(w, dict),
            Object::Stream { dict, data } => {
                let mut dict = dict.clone();
                dict.insert("Length".to_string(), Object::Integer(data.len() as i64));
                self.write_dictionary(w, &dict);
                w.extend_from_slice(b"\nstream\n");
                w.extend_from_slice(data);
                w.extend_from_slice(b"\nendstream");
            },
            Object::Reference(r) => w.extend_from_slice(r.to_string().as_bytes()),
        }
    }

    fn write_dictionary(&self, w: &mut Vec<u8>, dict: &HashMap<String, Object>) {
        w.extend_from_slice(b"<<");
        let mut keys: Vec<_> = dict.keys().collect();
        keys.sort();
        for key in keys {
            w.extend_from_slice(if self.compact { b" " } else { b"\n  " });
            write_name(w, key);
            w.push(b' ');
            self.write_object(w, &dict[key]);
        }
        w.extend_from_slice(if self.compact || dict.is_empty() { b" >>" } else { b"\n>>" });
    }
}

/// Reals are written with at most five decimals and no trailing zeros.
fn format_real(value: f64) -> String {
    if value.fract() == 0.0 {
        return format!("{}", value as i64);
    }
    let formatted = format!("{:.5}", value);
    formatted.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Printable data becomes a literal string, anything else a hex string.
fn write_string(w: &mut Vec<u8>, data: &[u8]) {
    let printable = data
        .iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..=0x7E).contains(&b));

    if !printable {
        w.push(b'<');
        w.extend_from_slice(hex::encode_upper(data).as_bytes());
        w.push(b'>');
        return;
    }

    w.push(b'(');
    for &byte in data {
        match byte {
            b'(' | b')' | b'\\' => w.extend_from_slice(&[b'\\', byte]),
            b'\n' => w.extend_from_slice(b"\\n"),
            b'\r' => w.extend_from_slice(b"\\r"),
            b'\t' => w.extend_from_slice(b"\\t"),
            _ => w.push(byte),
        }
    }
    w.push(b')');
}

fn write_name(w: &mut Vec<u8>, name: &str) {
    w.push(b'/');
    for byte in name.bytes() {
        let regular = byte.is_ascii_graphic()
            && !matches!(
                byte,
                b'#' | b'/' | b'%' | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}'
            );
        if regular {
            w.push(byte);
        } else {
            w.extend_from_slice(format!("#{:02X}", byte).as_bytes());
        }
    }
}

/// Helper functions for building PDF objects.
impl ObjectSerializer {
    /// Create a Name object.
    pub fn name(s: &str) -> Object {
        Object::Name(s.to_string())
    }

    /// Create a String object from a Rust string.
    pub fn string(s: &str) -> Object {
        Object::String(s.as_bytes().to_vec())
    }

    /// Create an Integer object.
    pub fn integer(i: i64) -> Object {
        Object::Integer(i)
    }

    /// Create a Real object.
    pub fn real(r: f64) -> Object {
        Object::Real(r)
    }

    /// Create a Dictionary object.
    pub fn dict(entries: Vec<(&str, Object)>) -> Object {
        Object::Dictionary(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    /// Create a Reference object.
    pub fn reference(r: ObjectRef) -> Object {
        Object::Reference(r)
    }

    /// Create a rectangle array `[llx lly urx ury]` from origin and size.
    pub fn rect(x: f64, y: f64, width: f64, height: f64) -> Object {
        Object::Array(vec![
            Object::Real(x),
            Object::Real(y),
            Object::Real(x + width),
            Object::Real(y + height),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_scalars() {
        let s = ObjectSerializer::new();
        assert_eq!(s.serialize_to_string(&Object::Null), "null");
        assert_eq!(s.serialize_to_string(&Object::Boolean(false)), "false");
        assert_eq!(s.serialize_to_string(&Object::Integer(-123)), "-123");
        assert_eq!(s.serialize_to_string(&Object::Real(0.5)), "0.5");
        assert_eq!(s.serialize_to_string(&Object::Real(612.0)), "612");
    }

    #[test]
    fn test_serialize_string_escapes() {
        let s = ObjectSerializer::new();
        assert_eq!(
            s.serialize_to_string(&Object::String(b"Reason (final)".to_vec())),
            "(Reason \\(final\\))"
        );
    }

    #[test]
    fn test_binary_string_is_hex() {
        let s = ObjectSerializer::new();
        assert_eq!(s.serialize_to_string(&Object::String(vec![0x00, 0xFF, 0x80])), "<00FF80>");
    }

    #[test]
    fn test_name_escaping() {
        let s = ObjectSerializer::new();
        assert_eq!(s.serialize_to_string(&Object::Name("Sig 1".into())), "/Sig#201");
        assert_eq!(
            s.serialize_to_string(&Object::Name("adbe.pkcs7.detached".into())),
            "/adbe.pkcs7.detached"
        );
    }

    #[test]
    fn test_dictionary_sorted_keys() {
        let s = ObjectSerializer::compact();
        let dict = ObjectSerializer::dict(vec![
            ("Type", ObjectSerializer::name("Sig")),
            ("Filter", ObjectSerializer::name("Adobe.PPKLite")),
        ]);
        assert_eq!(s.serialize_to_string(&dict), "<< /Filter /Adobe.PPKLite /Type /Sig >>");
    }

    #[test]
    fn test_stream_length_is_set() {
        let s = ObjectSerializer::compact();
        let stream = Object::Stream {
            dict: HashMap::new(),
            data: bytes::Bytes::from_static(b"0 0 m"),
        };
        let out = s.serialize_to_string(&stream);
        assert!(out.starts_with("<< /Length 5 >>\nstream\n0 0 m\nendstream"));
    }

    #[test]
    fn test_serialize_indirect_round_trips_through_parser() {
        let s = ObjectSerializer::new();
        let obj = ObjectSerializer::dict(vec![("FT", ObjectSerializer::name("Sig"))]);
        let bytes = s.serialize_indirect(4, 0, &obj);
        let (r, parsed) = crate::parser::parse_indirect_object(&bytes).unwrap();
        assert_eq!(r, ObjectRef::new(4, 0));
        assert_eq!(parsed, obj);
    }

    #[test]
    fn test_rect_helper() {
        let rect = ObjectSerializer::rect(10.0, 20.0, 100.0, 50.0);
        assert_eq!(ObjectSerializer::compact().serialize_to_string(&rect), "[10 20 110 70]");
    }
}
