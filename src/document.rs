//! Document access for signature handling.
//!
//! [`SignatureDocument`] is what the validator and the signer need from a
//! PDF: raw bytes, indirect objects, the trailer and the signature fields of
//! the interactive form. [`MemoryDocument`] implements it for a PDF held in
//! memory with classic cross-reference tables, including incremental
//! updates chained through `/Prev`.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::object::{Object, ObjectRef};
use crate::parser::{parse_indirect_object, parse_object};
use crate::signatures::digest::digest;
use crate::signatures::secret::SecretString;
use crate::signatures::types::{HashAlgorithm, SignatureType};

/// Longest `/Prev` chain or field tree followed.
const MAX_DEPTH: usize = 64;

/// The document layer consumed by the validator and the signer.
pub trait SignatureDocument: Send + Sync {
    /// Stable identity of the document contents, used as a cache key.
    fn id(&self) -> String;

    /// Total length in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `len` bytes starting at `offset`.
    fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>>;

    /// Load an indirect object.
    fn object(&self, reference: ObjectRef) -> Result<Object>;

    /// The merged trailer dictionary.
    fn trailer(&self) -> &HashMap<String, Object>;

    /// Offset of the newest cross-reference section.
    fn startxref(&self) -> usize;

    /// Follow a reference, or clone a direct object.
    fn resolve(&self, object: &Object) -> Result<Object> {
        match object {
            Object::Reference(r) => self.object(*r),
            other => Ok(other.clone()),
        }
    }

    /// All signature fields of the interactive form, in field tree order.
    fn fields(&self) -> Result<Vec<SignatureField>> {
        collect_signature_fields(self)
    }

    /// The signature field named `name` whose widget is on `page`.
    fn field(&self, page: usize, name: &str) -> Result<Option<SignatureField>> {
        Ok(self
            .fields()?
            .into_iter()
            .find(|f| f.page() == page && (f.name() == name || f.partial_name() == name)))
    }

    fn is_encrypted(&self) -> bool {
        self.trailer().contains_key("Encrypt")
    }

    /// Open an encrypted document for writing. Unencrypted documents need
    /// no passwords.
    fn authenticate(
        &self,
        _owner_password: Option<&SecretString>,
        _user_password: Option<&SecretString>,
    ) -> bool {
        !self.is_encrypted()
    }

    /// Hook applied to every object written into an incremental update.
    fn encrypt_object(&self, _reference: ObjectRef, object: Object) -> Object {
        object
    }
}

/// A terminal form field of type `/Sig`.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureField {
    name: String,
    partial_name: String,
    field_ref: ObjectRef,
    widget_ref: ObjectRef,
    page: usize,
    page_ref: Option<ObjectRef>,
    rect: Rect,
    value_ref: Option<ObjectRef>,
    value: Option<HashMap<String, Object>>,
}

impl SignatureField {
    /// Fully qualified name (`parent.child`).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partial_name(&self) -> &str {
        &self.partial_name
    }

    pub fn field_ref(&self) -> ObjectRef {
        self.field_ref
    }

    /// The widget annotation; equal to [`field_ref`] for merged fields.
    ///
    /// [`field_ref`]: SignatureField::field_ref
    pub fn widget_ref(&self) -> ObjectRef {
        self.widget_ref
    }

    /// Zero-based page index of the widget.
    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_ref(&self) -> Option<ObjectRef> {
        self.page_ref
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// The `/V` signature dictionary, when the field is signed.
    pub fn value(&self) -> Option<&HashMap<String, Object>> {
        self.value.as_ref()
    }

    pub fn value_ref(&self) -> Option<ObjectRef> {
        self.value_ref
    }

    /// Identity of the field inside its document.
    pub fn id(&self) -> String {
        format!("{}-{}", self.field_ref.id, self.field_ref.gen)
    }

    /// The sub-filter of the signature, or `UnsignedSignatureField`.
    pub fn signature_type(&self) -> SignatureType {
        match &self.value {
            None => SignatureType::UnsignedSignatureField,
            Some(value) => value
                .get("SubFilter")
                .and_then(Object::as_name)
                .map(SignatureType::from_pdf_name)
                .unwrap_or(SignatureType::UnknownSignatureType),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct XrefEntry {
    offset: usize,
    gen: u16,
}

/// A PDF held in memory.
#[derive(Debug, Clone)]
pub struct MemoryDocument {
    data: bytes::Bytes,
    xref: HashMap<u32, XrefEntry>,
    trailer: HashMap<String, Object>,
    startxref: usize,
    id: String,
}

impl MemoryDocument {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_bytes(data)
    }

    pub fn from_bytes(data: impl Into<bytes::Bytes>) -> Result<Self> {
        let data: bytes::Bytes = data.into();
        if !data.starts_with(b"%PDF-") {
            let found = String::from_utf8_lossy(&data[..data.len().min(8)]).into_owned();
            return Err(Error::InvalidHeader(found));
        }
        let startxref = find_startxref(&data)?;

        let mut xref = HashMap::new();
        let mut trailer: HashMap<String, Object> = HashMap::new();
        let mut seen = HashSet::new();
        let mut offset = Some(startxref);
        while let Some(section_offset) = offset {
            if !seen.insert(section_offset) || seen.len() > MAX_DEPTH {
                return Err(Error::InvalidPdf("cyclic or too long /Prev chain".to_string()));
            }
            let (entries, section_trailer) = parse_xref_section(&data, section_offset)?;
            log::debug!("xref section at {} with {} entries", section_offset, entries.len());
            for (id, entry) in entries {
                xref.entry(id).or_insert(entry);
            }
            offset = section_trailer
                .get("Prev")
                .and_then(Object::as_integer)
                .map(|prev| prev as usize);
            for (key, value) in section_trailer {
                trailer.entry(key).or_insert(value);
            }
        }
        trailer.remove("Prev");

        let id = digest(HashAlgorithm::Sha256, &data).map(hex::encode).unwrap_or_default();
        Ok(Self {
            data,
            xref,
            trailer,
            startxref,
            id,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl SignatureDocument for MemoryDocument {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                Error::InvalidPdf(format!("read of {} bytes at {} is out of bounds", len, offset))
            })?;
        Ok(self.data[offset..end].to_vec())
    }

    fn object(&self, reference: ObjectRef) -> Result<Object> {
        let entry = self
            .xref
            .get(&reference.id)
            .filter(|e| e.gen == reference.gen)
            .ok_or(Error::ObjectNotFound(reference.id, reference.gen))?;
        let input = self
            .data
            .get(entry.offset..)
            .ok_or(Error::ObjectNotFound(reference.id, reference.gen))?;
        let (found, object) = parse_indirect_object(input)?;
        if found != reference {
            return Err(Error::ParseError {
                offset: entry.offset,
                reason: format!("expected object {}, found {}", reference, found),
            });
        }
        Ok(object)
    }

    fn trailer(&self) -> &HashMap<String, Object> {
        &self.trailer
    }

    fn startxref(&self) -> usize {
        self.startxref
    }
}

fn find_startxref(data: &[u8]) -> Result<usize> {
    let tail_start = data.len().saturating_sub(2048);
    let tail = &data[tail_start..];
    let keyword = b"startxref";
    let pos = tail
        .windows(keyword.len())
        .rposition(|w| w == keyword)
        .ok_or(Error::InvalidXref)?;
    let digits: String = tail[pos + keyword.len()..]
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take_while(|b| b.is_ascii_digit())
        .map(|&b| b as char)
        .collect();
    digits.parse().map_err(|_| Error::InvalidXref)
}

/// Parse `xref ... trailer << ... >>` at `offset`.
fn parse_xref_section(
    data: &[u8],
    offset: usize,
) -> Result<(Vec<(u32, XrefEntry)>, HashMap<String, Object>)> {
    let section = data.get(offset..).ok_or(Error::InvalidXref)?;
    let trimmed_start = section.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(0);
    let section = &section[trimmed_start..];
    if !section.starts_with(b"xref") {
        return Err(Error::Unsupported("cross-reference streams".to_string()));
    }
    let keyword = b"trailer";
    let trailer_pos = section
        .windows(keyword.len())
        .position(|w| w == keyword)
        .ok_or(Error::InvalidXref)?;
    let table = std::str::from_utf8(&section[4..trailer_pos]).map_err(|_| Error::InvalidXref)?;

    let mut entries = Vec::new();
    let mut next_id: u32 = 0;
    for line in table.split(['\r', '\n']).map(str::trim).filter(|l| !l.is_empty()) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            [start, _count] => next_id = start.parse().map_err(|_| Error::InvalidXref)?,
            [offset, gen, kind] => {
                if *kind == "n" {
                    let entry = XrefEntry {
                        offset: offset.parse().map_err(|_| Error::InvalidXref)?,
                        gen: gen.parse().map_err(|_| Error::InvalidXref)?,
                    };
                    entries.push((next_id, entry));
                }
                next_id += 1;
            },
            _ => return Err(Error::InvalidXref),
        }
    }

    let (_, trailer) =
        parse_object(&section[trailer_pos + keyword.len()..]).map_err(|_| Error::InvalidXref)?;
    match trailer {
        Object::Dictionary(dict) => Ok((entries, dict)),
        _ => Err(Error::InvalidXref),
    }
}

/// Page object references in document order.
pub(crate) fn page_refs<D: SignatureDocument + ?Sized>(doc: &D) -> Result<Vec<ObjectRef>> {
    let root = doc
        .trailer()
        .get("Root")
        .ok_or_else(|| Error::InvalidPdf("no /Root".to_string()))?;
    let catalog = doc.resolve(root)?;
    let pages = catalog
        .as_dict()
        .and_then(|c| c.get("Pages"))
        .and_then(Object::as_reference)
        .ok_or_else(|| Error::InvalidPdf("catalog without /Pages".to_string()))?;
    let mut out = Vec::new();
    walk_pages(doc, pages, &mut out, 0)?;
    Ok(out)
}

fn walk_pages<D: SignatureDocument + ?Sized>(
    doc: &D,
    node_ref: ObjectRef,
    out: &mut Vec<ObjectRef>,
    depth: usize,
) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::InvalidPdf("page tree too deep".to_string()));
    }
    let node = doc.object(node_ref)?;
    let dict = node.expect_dict()?;
    match dict.get("Kids").map(|k| doc.resolve(k)).transpose()? {
        Some(Object::Array(kids)) => {
            for kid in kids.iter().filter_map(Object::as_reference) {
                walk_pages(doc, kid, out, depth + 1)?;
            }
        },
        _ => out.push(node_ref),
    }
    Ok(())
}

fn collect_signature_fields<D: SignatureDocument + ?Sized>(doc: &D) -> Result<Vec<SignatureField>> {
    let Some(root) = doc.trailer().get("Root") else {
        return Err(Error::InvalidPdf("no /Root in trailer".to_string()));
    };
    let catalog = doc.resolve(root)?;
    let Some(acroform) = catalog.as_dict().and_then(|c| c.get("AcroForm")) else {
        return Ok(Vec::new());
    };
    let acroform = doc.resolve(acroform)?;
    let Some(fields) = acroform.as_dict().and_then(|a| a.get("Fields")) else {
        return Ok(Vec::new());
    };
    let pages = page_refs(doc).unwrap_or_default();

    let mut out = Vec::new();
    if let Object::Array(fields) = doc.resolve(fields)? {
        for field_ref in fields.iter().filter_map(Object::as_reference) {
            visit_field(doc, field_ref, "", None, &pages, &mut out, 0)?;
        }
    }
    Ok(out)
}

fn visit_field<D: SignatureDocument + ?Sized>(
    doc: &D,
    node_ref: ObjectRef,
    parent_name: &str,
    inherited_type: Option<&str>,
    pages: &[ObjectRef],
    out: &mut Vec<SignatureField>,
    depth: usize,
) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::InvalidPdf("field tree too deep".to_string()));
    }
    let node = doc.object(node_ref)?;
    let dict = node.expect_dict()?;
    let partial_name = dict.get("T").and_then(Object::as_text).unwrap_or_default();
    let name = match (parent_name.is_empty(), partial_name.is_empty()) {
        (true, _) => partial_name.clone(),
        (false, true) => parent_name.to_string(),
        (false, false) => format!("{}.{}", parent_name, partial_name),
    };
    let field_type = dict.get("FT").and_then(Object::as_name).or(inherited_type);

    let kids: Vec<ObjectRef> = match dict.get("Kids").map(|k| doc.resolve(k)).transpose()? {
        Some(Object::Array(kids)) => kids.iter().filter_map(Object::as_reference).collect(),
        _ => Vec::new(),
    };
    let mut widget_kids = Vec::new();
    for kid in &kids {
        let kid_obj = doc.object(*kid)?;
        let is_field = kid_obj.as_dict().is_some_and(|k| k.contains_key("T"));
        if is_field {
            visit_field(doc, *kid, &name, field_type, pages, out, depth + 1)?;
        } else {
            widget_kids.push(*kid);
        }
    }
    if field_type != Some("Sig") {
        return Ok(());
    }
    let has_child_fields = kids.len() > widget_kids.len();
    if has_child_fields && widget_kids.is_empty() {
        return Ok(());
    }

    let widget_ref = widget_kids.first().copied().unwrap_or(node_ref);
    let widget = if widget_ref == node_ref {
        node.clone()
    } else {
        doc.object(widget_ref)?
    };
    let widget = widget.expect_dict()?;

    let rect = widget
        .get("Rect")
        .map(|r| doc.resolve(r))
        .transpose()?
        .and_then(|r| rect_from_array(&r))
        .unwrap_or_default();
    let page_ref = widget
        .get("P")
        .and_then(Object::as_reference)
        .or_else(|| find_page_with_annot(doc, pages, widget_ref));
    let page = page_ref
        .and_then(|p| pages.iter().position(|r| *r == p))
        .unwrap_or(0);

    let (value_ref, value) = match dict.get("V") {
        Some(v) => {
            let resolved = doc.resolve(v)?;
            (v.as_reference(), resolved.as_dict().cloned())
        },
        None => (None, None),
    };

    log::debug!("Signature field '{}' ({}) on page {}", name, node_ref, page);
    out.push(SignatureField {
        name,
        partial_name,
        field_ref: node_ref,
        widget_ref,
        page,
        page_ref,
        rect,
        value_ref,
        value,
    });
    Ok(())
}

fn find_page_with_annot<D: SignatureDocument + ?Sized>(
    doc: &D,
    pages: &[ObjectRef],
    widget: ObjectRef,
) -> Option<ObjectRef> {
    pages.iter().copied().find(|page| {
        let Ok(page_obj) = doc.object(*page) else {
            return false;
        };
        let annots = page_obj
            .as_dict()
            .and_then(|d| d.get("Annots"))
            .and_then(|a| doc.resolve(a).ok());
        matches!(annots, Some(Object::Array(items)) if items.contains(&Object::Reference(widget)))
    })
}

pub(crate) fn rect_from_array(obj: &Object) -> Option<Rect> {
    let values: Vec<f32> = obj
        .as_array()?
        .iter()
        .map(|v| v.as_number().map(|n| n as f32))
        .collect::<Option<_>>()?;
    match values.as_slice() {
        [x0, y0, x1, y1] => Some(Rect::from_points(*x0, *y0, *x1, *y1)),
        _ => None,
    }
}

/// Builders for small PDFs used by unit tests.
#[cfg(test)]
pub(crate) mod testing {
    /// Assemble a PDF from object bodies numbered from 1, with a classic
    /// xref table and `/Root 1 0 R`.
    pub(crate) fn build_pdf(objects: &[&str]) -> Vec<u8> {
        let mut pdf = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref = pdf.len();
        let header = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
        pdf.extend_from_slice(header.as_bytes());
        for offset in offsets {
            pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        pdf.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref
            )
            .as_bytes(),
        );
        pdf
    }

    /// One page with an unsigned signature field named `Signature1`.
    pub(crate) fn unsigned_field_pdf() -> Vec<u8> {
        build_pdf(&[
            "<< /Type /Catalog /Pages 2 0 R /AcroForm << /Fields [4 0 R] >> >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Annots [4 0 R] >>",
            "<< /FT /Sig /T (Signature1) /Type /Annot /Subtype /Widget \
             /Rect [50 50 250 100] /P 3 0 R /F 4 >>",
        ])
    }
}
