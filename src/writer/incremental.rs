//! Incremental updates.
//!
//! New and replaced objects are appended after the original bytes together
//! with a cross-reference section and a trailer whose `/Prev` points at the
//! previous section, leaving every original byte untouched.

use std::collections::{BTreeMap, HashMap};

use crate::object::{Object, ObjectRef};

use super::ObjectSerializer;

/// Trailer keys carried over from the previous trailer.
const INHERITED_TRAILER_KEYS: [&str; 4] = ["Root", "Info", "ID", "Encrypt"];

/// An incremental update being assembled.
#[derive(Debug, Clone)]
pub struct IncrementalUpdate {
    objects: BTreeMap<ObjectRef, Object>,
    next_id: u32,
}

/// The bytes of an updated file and where each appended object starts.
#[derive(Debug, Clone)]
pub struct UpdatedFile {
    pub data: Vec<u8>,
    pub offsets: HashMap<ObjectRef, usize>,
}

impl IncrementalUpdate {
    /// Start an update for a file whose trailer declares `/Size size`.
    pub fn new(size: u32) -> Self {
        Self {
            objects: BTreeMap::new(),
            next_id: size.max(1),
        }
    }

    /// Reserve a fresh object number.
    pub fn allocate(&mut self) -> ObjectRef {
        let r = ObjectRef::new(self.next_id, 0);
        self.next_id += 1;
        r
    }

    /// Add or replace an object. Later calls for the same reference win.
    pub fn put(&mut self, r: ObjectRef, obj: Object) {
        if r.id >= self.next_id {
            self.next_id = r.id + 1;
        }
        self.objects.insert(r, obj);
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Append the update to `original`.
    ///
    /// `trailer` is the previous trailer and `prev_xref` the offset of the
    /// previous cross-reference section.
    pub fn write(
        &self,
        original: &[u8],
        trailer: &HashMap<String, Object>,
        prev_xref: usize,
    ) -> UpdatedFile {
        let serializer = ObjectSerializer::compact();
        let mut data = Vec::with_capacity(original.len() + 4096);
        data.extend_from_slice(original);
        if !matches!(data.last(), Some(b'\n') | Some(b'\r')) {
            data.push(b'\n');
        }

        let mut offsets = HashMap::new();
        for (r, obj) in &self.objects {
            offsets.insert(*r, data.len());
            data.extend_from_slice(&serializer.serialize_indirect(r.id, r.gen, obj));
        }

        let xref_offset = data.len();
        data.extend_from_slice(b"xref\n");
        // One subsection per object keeps the table valid for sparse ids
        for r in self.objects.keys() {
            let entry = format!("{} 1\n{:010} {:05} n \n", r.id, offsets[r], r.gen);
            data.extend_from_slice(entry.as_bytes());
        }

        let mut new_trailer = HashMap::new();
        new_trailer.insert("Size".to_string(), Object::Integer(self.next_id as i64));
        new_trailer.insert("Prev".to_string(), Object::Integer(prev_xref as i64));
        for key in INHERITED_TRAILER_KEYS {
            if let Some(value) = trailer.get(key) {
                new_trailer.insert(key.to_string(), value.clone());
            }
        }

        data.extend_from_slice(b"trailer\n");
        data.extend_from_slice(&serializer.serialize(&Object::Dictionary(new_trailer)));
        data.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());

        log::debug!(
            "Incremental update: {} objects, xref at {}",
            self.objects.len(),
            xref_offset
        );

        UpdatedFile { data, offsets }
    }
}
