//! PDF signing implementation.
//!
//! Signing appends an incremental update holding the signature dictionary,
//! the widget appearance and the updated field, with fixed-width
//! placeholders for `/ByteRange` and `/Contents`. Once the file is laid out
//! the real byte range is patched in, the covered bytes are hashed through
//! the backend's signing handle and the detached signature is spliced into
//! the `/Contents` gap.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;

use super::backend::{pad_pgp_signature, Backends};
use super::byterange::{self, ByteRange};
use super::result::{SigningData, SigningError, SigningResult};
use super::task::{Task, WorkerPool};
use super::types::SignatureType;
use crate::document::{page_refs, SignatureDocument, SignatureField};
use crate::error::Result;
use crate::geometry::Rect;
use crate::object::{encode_text_string, format_pdf_date, Object, ObjectRef};
use crate::writer::{AppearanceStyle, IncrementalUpdate, SignatureAppearance};

type SignResult<T> = std::result::Result<T, SigningError>;

/// `/SigFlags`: SignaturesExist | AppendOnly.
const SIG_FLAGS: i64 = 3;

/// Annotation flag Print.
const ANNOT_FLAG_PRINT: i64 = 4;

/// The field a request signs: an existing unsigned one or a new one.
#[derive(Clone, Copy)]
enum Target<'a> {
    Existing(&'a SignatureField),
    New,
}

/// Signs signature fields with the active backend.
#[derive(Debug)]
pub struct PdfSigner {
    backends: Arc<Backends>,
    pool: WorkerPool,
    last_error: RwLock<Option<String>>,
}

impl PdfSigner {
    /// A signer with its own worker pool sized from the configuration.
    pub fn new(backends: Arc<Backends>) -> Result<Self> {
        let pool = WorkerPool::new(backends.config().worker_threads)?;
        Ok(Self::with_pool(backends, pool))
    }

    pub fn with_pool(backends: Arc<Backends>, pool: WorkerPool) -> Self {
        Self {
            backends,
            pool,
            last_error: RwLock::new(None),
        }
    }

    pub fn backends(&self) -> &Arc<Backends> {
        &self.backends
    }

    /// Details of the last failed request, cleared by a successful one.
    pub fn last_signing_error_details(&self) -> Option<String> {
        self.last_error.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Sign an unsigned field and write the result to `data.destination()`.
    ///
    /// The passwords in `data` are wiped once the request finishes, whatever
    /// the outcome.
    pub fn sign(
        &self,
        doc: &dyn SignatureDocument,
        field: &SignatureField,
        data: &mut SigningData,
    ) -> SigningResult {
        let outcome = self.sign_target(doc, Target::Existing(field), data);
        data.wipe_passwords();
        self.record(outcome)
    }

    /// Create a signature field on `data.page()` at `data.rect()` and sign it.
    pub fn sign_new_field(
        &self,
        doc: &dyn SignatureDocument,
        data: &mut SigningData,
    ) -> SigningResult {
        let outcome = self.sign_target(doc, Target::New, data);
        data.wipe_passwords();
        self.record(outcome)
    }

    /// Sign on the worker pool.
    pub fn sign_async(
        self: &Arc<Self>,
        doc: Arc<dyn SignatureDocument>,
        field: SignatureField,
        data: SigningData,
    ) -> Task<SigningResult> {
        let signer = Arc::clone(self);
        self.pool.spawn(move || {
            let mut data = data;
            signer.sign(doc.as_ref(), &field, &mut data)
        })
    }

    fn record(&self, outcome: SignResult<()>) -> SigningResult {
        let mut last_error = self.last_error.write().unwrap_or_else(PoisonError::into_inner);
        match outcome {
            Ok(()) => {
                *last_error = None;
                SigningResult::Success
            },
            Err(e) => {
                log::warn!("Signing failed: {}", e);
                *last_error = Some(e.to_string());
                e.result()
            },
        }
    }

    fn sign_target(
        &self,
        doc: &dyn SignatureDocument,
        target: Target<'_>,
        data: &SigningData,
    ) -> SignResult<()> {
        if let Target::Existing(field) = target {
            if is_signed(field) {
                return Err(SigningError::FieldAlreadySigned);
            }
        }

        let backend = self
            .backends
            .active_backend()
            .ok_or_else(|| SigningError::Generic("no signature backend is available".to_string()))?;
        let signature_type = data.signature_type().unwrap_or_else(|| backend.signature_type());
        check_signature_type(signature_type, backend.signature_type())?;
        if signature_type == SignatureType::G10cPgpSignatureDetached
            && !self.backends.pgp_signatures_allowed()
        {
            return Err(SigningError::Generic("OpenPGP signatures are disabled".to_string()));
        }

        let mut handle =
            backend.create_signing_handle(data.certificate_id(), data.hash_algorithm())?;
        log::info!(
            "Signing with {} certificate '{}' ({})",
            backend.kind(),
            data.certificate_id(),
            data.hash_algorithm()
        );

        if !doc.authenticate(data.document_owner_password(), data.document_user_password()) {
            return Err(SigningError::Generic(
                "could not open the document for writing".to_string(),
            ));
        }

        let max_signature_size = self.backends.config().max_signature_size;
        let signer_name = handle
            .certificate()
            .subject_info()
            .common_name
            .clone()
            .unwrap_or_else(|| data.certificate_id().to_string());
        let signature_dict =
            signature_dictionary(signature_type, &signer_name, data, max_signature_size);

        let mut update = IncrementalUpdate::new(next_object_number(doc)?);
        let signature_ref = update.allocate();
        update.put(signature_ref, signature_dict);
        match target {
            Target::Existing(field) => {
                prepare_existing_field(doc, &mut update, field, signature_ref, data)?
            },
            Target::New => prepare_new_field(doc, &mut update, signature_ref, data)?,
        }

        let original = doc.read_bytes(0, doc.len())?;
        let written = update.write(&original, doc.trailer(), doc.startxref());
        let mut bytes = written.data;
        let signature_offset = written
            .offsets
            .get(&signature_ref)
            .copied()
            .ok_or_else(|| {
                SigningError::Internal("signature dictionary was not written".to_string())
            })?;

        let placeholder_size = 2 * max_signature_size + 2;
        let byte_range_offset = byterange::find_byte_range_offset(&bytes, signature_offset)
            .ok_or_else(|| SigningError::Internal("ByteRange placeholder not found".to_string()))?;
        let contents_offset = byterange::find_contents_offset(&bytes, signature_offset)
            .ok_or_else(|| SigningError::Internal("Contents placeholder not found".to_string()))?;
        let range = ByteRange::around_placeholder(bytes.len(), contents_offset, placeholder_size);
        byterange::patch_byte_range(&mut bytes, byte_range_offset, &range)?;
        log::debug!("Signature covers {}", range);

        for (offset, len) in range.spans() {
            handle.update(&bytes[offset..offset + len]);
        }
        let mut signature = handle.sign_detached(data.password())?;
        if signature_type == SignatureType::G10cPgpSignatureDetached {
            signature = pad_pgp_signature(&signature, max_signature_size).ok_or_else(|| {
                SigningError::Internal(format!(
                    "signature of {} bytes does not fit {} bytes",
                    signature.len(),
                    max_signature_size
                ))
            })?;
        }
        byterange::insert_signature(&mut bytes, contents_offset, placeholder_size, &signature)?;

        std::fs::write(data.destination(), &bytes).map_err(|e| {
            SigningError::WriteFailed(format!("{}: {}", data.destination().display(), e))
        })?;
        log::info!("Wrote signed document to {}", data.destination().display());
        Ok(())
    }
}

fn is_signed(field: &SignatureField) -> bool {
    let has_signature = field
        .value()
        .and_then(|v| v.get("Contents"))
        .and_then(Object::as_string)
        .is_some_and(|c| !c.is_empty());
    field.signature_type() != SignatureType::UnsignedSignatureField || has_signature
}

/// A backend produces CMS or OpenPGP signatures, never both.
fn check_signature_type(requested: SignatureType, produced: SignatureType) -> SignResult<()> {
    let supported = match requested {
        SignatureType::AdbePkcs7Detached | SignatureType::EtsiCadesDetached => produced.is_cms(),
        SignatureType::G10cPgpSignatureDetached => {
            produced == SignatureType::G10cPgpSignatureDetached
        },
        _ => false,
    };
    if supported {
        Ok(())
    } else {
        Err(SigningError::Generic(format!("cannot create {:?} signatures", requested)))
    }
}

/// First free object number after the trailer's `/Size`.
fn next_object_number(doc: &dyn SignatureDocument) -> SignResult<u32> {
    match doc.trailer().get("Size").and_then(Object::as_integer) {
        Some(size) => u32::try_from(size.max(1))
            .map_err(|_| SigningError::Internal(format!("trailer /Size {} is out of range", size))),
        None => Ok(1),
    }
}

fn signature_dictionary(
    signature_type: SignatureType,
    signer_name: &str,
    data: &SigningData,
    max_size: usize,
) -> Object {
    let mut dict = HashMap::new();
    dict.insert("Type".to_string(), Object::Name("Sig".to_string()));
    dict.insert("Filter".to_string(), Object::Name("Adobe.PPKLite".to_string()));
    if let Some(sub_filter) = signature_type.as_pdf_name() {
        dict.insert("SubFilter".to_string(), Object::Name(sub_filter.to_string()));
    }
    // Serializes to the fixed-width placeholder text
    dict.insert(
        "ByteRange".to_string(),
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(9_999_999_999),
            Object::Integer(9_999_999_999),
            Object::Integer(9_999_999_999),
        ]),
    );
    dict.insert("Contents".to_string(), Object::String(vec![0; max_size]));
    dict.insert("M".to_string(), Object::String(format_pdf_date(Utc::now()).into_bytes()));
    dict.insert("Name".to_string(), Object::String(encode_text_string(signer_name)));
    if let Some(reason) = data.reason() {
        dict.insert("Reason".to_string(), Object::String(encode_text_string(reason)));
    }
    if let Some(location) = data.location() {
        dict.insert("Location".to_string(), Object::String(encode_text_string(location)));
    }
    Object::Dictionary(dict)
}

/// Add the appearance objects and return the form XObject reference.
fn add_appearance(
    doc: &dyn SignatureDocument,
    update: &mut IncrementalUpdate,
    rect: Rect,
    data: &SigningData,
) -> SignResult<ObjectRef> {
    let style = AppearanceStyle {
        text: data.signature_text(),
        left_text: data.signature_left_text(),
        font_size: data.font_size(),
        left_font_size: data.left_font_size(),
        font_color: data.font_color(),
        border_color: data.border_color(),
        border_width: data.border_width(),
        background_color: data.background_color(),
        image_path: data.image_path(),
    };
    let appearance = SignatureAppearance::build(rect, &style)
        .map_err(|e| SigningError::Generic(e.to_string()))?;

    let image_ref = match appearance.image() {
        Some(image) => {
            let smask_ref = match image.smask_object() {
                Some(smask) => {
                    let r = update.allocate();
                    update.put(r, doc.encrypt_object(r, smask));
                    Some(r)
                },
                None => None,
            };
            let r = update.allocate();
            update.put(r, doc.encrypt_object(r, image.to_object(smask_ref)));
            Some(r)
        },
        None => None,
    };
    let form_ref = update.allocate();
    update.put(form_ref, doc.encrypt_object(form_ref, appearance.to_form_xobject(image_ref)));
    Ok(form_ref)
}

/// Widget entries shared by new and existing fields.
fn set_widget_entries(
    widget: &mut HashMap<String, Object>,
    appearance_ref: ObjectRef,
    rect: Rect,
    page_ref: Option<ObjectRef>,
) {
    let mut ap = HashMap::new();
    ap.insert("N".to_string(), Object::Reference(appearance_ref));
    widget.insert("AP".to_string(), Object::Dictionary(ap));
    widget.insert(
        "Rect".to_string(),
        Object::Array(vec![
            Object::Real(rect.x as f64),
            Object::Real(rect.y as f64),
            Object::Real(rect.right() as f64),
            Object::Real(rect.top() as f64),
        ]),
    );
    if let Some(page_ref) = page_ref {
        widget.insert("P".to_string(), Object::Reference(page_ref));
    }
    widget.insert("F".to_string(), Object::Integer(ANNOT_FLAG_PRINT));
}

fn prepare_existing_field(
    doc: &dyn SignatureDocument,
    update: &mut IncrementalUpdate,
    field: &SignatureField,
    signature_ref: ObjectRef,
    data: &SigningData,
) -> SignResult<()> {
    let rect = if data.rect().is_empty() { field.rect() } else { data.rect() };
    let appearance_ref = add_appearance(doc, update, rect, data)?;

    let mut field_obj = doc.object(field.field_ref())?;
    let field_dict = field_obj
        .as_dict_mut()
        .ok_or_else(|| {
            SigningError::Internal(format!("field {} is not a dictionary", field.field_ref()))
        })?;
    field_dict.insert("V".to_string(), Object::Reference(signature_ref));

    if field.widget_ref() == field.field_ref() {
        set_widget_entries(field_dict, appearance_ref, rect, field.page_ref());
    } else {
        let mut widget_obj = doc.object(field.widget_ref())?;
        let widget = widget_obj
            .as_dict_mut()
            .ok_or_else(|| {
                SigningError::Internal(format!("widget {} is not a dictionary", field.widget_ref()))
            })?;
        set_widget_entries(widget, appearance_ref, rect, field.page_ref());
        update.put(field.widget_ref(), widget_obj);
    }
    update.put(field.field_ref(), field_obj);

    update_acroform(doc, update, None)
}

fn prepare_new_field(
    doc: &dyn SignatureDocument,
    update: &mut IncrementalUpdate,
    signature_ref: ObjectRef,
    data: &SigningData,
) -> SignResult<()> {
    let pages = page_refs(doc)?;
    let page_ref = *pages
        .get(data.page())
        .ok_or_else(|| SigningError::Generic(format!("page {} does not exist", data.page())))?;
    if data.rect().is_empty() {
        return Err(SigningError::Generic("signature rectangle is empty".to_string()));
    }

    let existing = doc.fields().unwrap_or_default();
    let name = if data.field_partial_name().is_empty() {
        unique_field_name(&existing)
    } else if existing.iter().any(|f| f.name() == data.field_partial_name()) {
        return Err(SigningError::Generic(format!(
            "a field named '{}' already exists",
            data.field_partial_name()
        )));
    } else {
        data.field_partial_name().to_string()
    };

    let appearance_ref = add_appearance(doc, update, data.rect(), data)?;
    let field_ref = update.allocate();
    let mut field = HashMap::new();
    field.insert("Type".to_string(), Object::Name("Annot".to_string()));
    field.insert("Subtype".to_string(), Object::Name("Widget".to_string()));
    field.insert("FT".to_string(), Object::Name("Sig".to_string()));
    field.insert("T".to_string(), Object::String(encode_text_string(&name)));
    field.insert("V".to_string(), Object::Reference(signature_ref));
    set_widget_entries(&mut field, appearance_ref, data.rect(), Some(page_ref));
    update.put(field_ref, Object::Dictionary(field));

    // Page /Annots may be inline or an indirect array
    let mut page = doc.object(page_ref)?;
    let page_dict = page
        .as_dict_mut()
        .ok_or_else(|| SigningError::Internal(format!("page {} is not a dictionary", page_ref)))?;
    match page_dict.get("Annots").cloned() {
        Some(Object::Reference(annots_ref)) => {
            let mut annots = doc.object(annots_ref)?;
            if let Object::Array(items) = &mut annots {
                items.push(Object::Reference(field_ref));
            }
            update.put(annots_ref, annots);
        },
        Some(Object::Array(mut items)) => {
            items.push(Object::Reference(field_ref));
            page_dict.insert("Annots".to_string(), Object::Array(items));
            update.put(page_ref, page);
        },
        _ => {
            let annots = Object::Array(vec![Object::Reference(field_ref)]);
            page_dict.insert("Annots".to_string(), annots);
            update.put(page_ref, page);
        },
    }

    log::debug!("Created signature field '{}' as {} on page {}", name, field_ref, data.page());
    update_acroform(doc, update, Some(field_ref))
}

fn unique_field_name(existing: &[SignatureField]) -> String {
    (1..)
        .map(|n| format!("Signature{}", n))
        .find(|candidate| existing.iter().all(|f| f.name() != candidate))
        .unwrap_or_else(|| "Signature".to_string())
}

/// Set `/SigFlags 3`, adding `new_field` to `/Fields` when given.
fn update_acroform(
    doc: &dyn SignatureDocument,
    update: &mut IncrementalUpdate,
    new_field: Option<ObjectRef>,
) -> SignResult<()> {
    let root_ref = doc
        .trailer()
        .get("Root")
        .and_then(Object::as_reference)
        .ok_or_else(|| SigningError::Internal("trailer has no /Root reference".to_string()))?;
    let mut catalog = doc.object(root_ref)?;
    let catalog_dict = catalog
        .as_dict_mut()
        .ok_or_else(|| SigningError::Internal("catalog is not a dictionary".to_string()))?;

    let mut apply = |acroform: &mut HashMap<String, Object>| -> SignResult<()> {
        acroform.insert("SigFlags".to_string(), Object::Integer(SIG_FLAGS));
        if let Some(field_ref) = new_field {
            match acroform.get("Fields").cloned() {
                Some(Object::Reference(fields_ref)) => {
                    let mut fields = doc.object(fields_ref)?;
                    if let Object::Array(items) = &mut fields {
                        items.push(Object::Reference(field_ref));
                    }
                    update.put(fields_ref, fields);
                },
                Some(Object::Array(mut items)) => {
                    items.push(Object::Reference(field_ref));
                    acroform.insert("Fields".to_string(), Object::Array(items));
                },
                _ => {
                    let fields = Object::Array(vec![Object::Reference(field_ref)]);
                    acroform.insert("Fields".to_string(), fields);
                },
            }
        }
        Ok(())
    };

    match catalog_dict.get("AcroForm").cloned() {
        Some(Object::Reference(acroform_ref)) => {
            let mut acroform = doc.object(acroform_ref)?;
            let acroform_dict = acroform
                .as_dict_mut()
                .ok_or_else(|| SigningError::Internal("AcroForm is not a dictionary".to_string()))?;
            apply(acroform_dict)?;
            update.put(acroform_ref, acroform);
        },
        Some(Object::Dictionary(mut acroform)) => {
            apply(&mut acroform)?;
            catalog_dict.insert("AcroForm".to_string(), Object::Dictionary(acroform));
            update.put(root_ref, catalog);
        },
        _ => {
            let mut acroform = HashMap::new();
            apply(&mut acroform)?;
            catalog_dict.insert("AcroForm".to_string(), Object::Dictionary(acroform));
            update.put(root_ref, catalog);
        },
    }
    Ok(())
}
