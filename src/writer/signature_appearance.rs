//! Appearance streams for signature widgets.
//!
//! A signed widget shows a background, an optional image, a border and up
//! to two captions: the left text (usually the signer name, large) and the
//! right text (details such as date and reason). Without a left text the
//! right text takes the whole width.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Error, Result};
use crate::geometry::Rect;
use crate::object::{Object, ObjectRef};
use crate::signatures::types::AnnotationColor;

/// Resource name of the caption font.
const FONT_RESOURCE: &str = "Helv";

/// Resource name of the background image.
const IMAGE_RESOURCE: &str = "Img0";

/// Padding between the border and the captions.
const TEXT_PADDING: f32 = 2.0;

/// Smallest size automatic font sizing goes down to.
const MIN_AUTO_FONT_SIZE: f32 = 4.0;

/// Visual parameters of a signature widget.
#[derive(Debug, Clone)]
pub struct AppearanceStyle<'a> {
    pub text: &'a str,
    pub left_text: &'a str,
    /// Size of the right text, 0 for automatic
    pub font_size: f32,
    /// Size of the left text, 0 for automatic
    pub left_font_size: f32,
    pub font_color: AnnotationColor,
    pub border_color: AnnotationColor,
    pub border_width: f32,
    pub background_color: AnnotationColor,
    pub image_path: Option<&'a Path>,
}

/// A background image, already converted to an 8-bit RGB XObject.
#[derive(Debug, Clone)]
pub struct ImageXObject {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
    alpha: Option<Vec<u8>>,
}

impl ImageXObject {
    /// Load a PNG or JPEG file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let img = image::open(path)
            .map_err(|e| Error::Image(format!("{}: {}", path.display(), e)))?;
        let alpha = img.color().has_alpha().then(|| {
            img.to_rgba8()
                .pixels()
                .map(|p| p.0[3])
                .collect::<Vec<u8>>()
        });
        let rgb = img.to_rgb8();
        Ok(Self {
            width: rgb.width(),
            height: rgb.height(),
            rgb: compress(rgb.as_raw())?,
            alpha: alpha.map(|a| compress(&a)).transpose()?,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn has_alpha(&self) -> bool {
        self.alpha.is_some()
    }

    /// The image XObject; `smask` must reference [`smask_object`] when the
    /// image has an alpha channel.
    ///
    /// [`smask_object`]: ImageXObject::smask_object
    pub fn to_object(&self, smask: Option<ObjectRef>) -> Object {
        let mut dict = self.image_dict("DeviceRGB", self.rgb.len());
        if let Some(smask) = smask {
            dict.insert("SMask".to_string(), Object::Reference(smask));
        }
        Object::Stream {
            dict,
            data: bytes::Bytes::from(self.rgb.clone()),
        }
    }

    /// The soft mask holding the alpha channel, if any.
    pub fn smask_object(&self) -> Option<Object> {
        let alpha = self.alpha.as_ref()?;
        Some(Object::Stream {
            dict: self.image_dict("DeviceGray", alpha.len()),
            data: bytes::Bytes::from(alpha.clone()),
        })
    }

    fn image_dict(&self, color_space: &str, length: usize) -> HashMap<String, Object> {
        let mut dict = HashMap::new();
        dict.insert("Type".to_string(), Object::Name("XObject".to_string()));
        dict.insert("Subtype".to_string(), Object::Name("Image".to_string()));
        dict.insert("Width".to_string(), Object::Integer(self.width as i64));
        dict.insert("Height".to_string(), Object::Integer(self.height as i64));
        dict.insert("ColorSpace".to_string(), Object::Name(color_space.to_string()));
        dict.insert("BitsPerComponent".to_string(), Object::Integer(8));
        dict.insert("Filter".to_string(), Object::Name("FlateDecode".to_string()));
        dict.insert("Length".to_string(), Object::Integer(length as i64));
        dict
    }
}

/// A widget appearance: the form XObject content plus its image, if any.
#[derive(Debug, Clone)]
pub struct SignatureAppearance {
    width: f32,
    height: f32,
    content: Vec<u8>,
    image: Option<ImageXObject>,
}

impl SignatureAppearance {
    /// Lay out an appearance for a widget of the size of `rect`.
    pub fn build(rect: Rect, style: &AppearanceStyle<'_>) -> Result<Self> {
        let image = style.image_path.map(ImageXObject::from_file).transpose()?;
        let width = rect.width.max(0.0);
        let height = rect.height.max(0.0);

        let mut content = String::from("q\n");

        if let Some(ops) = color_to_fill_ops(&style.background_color) {
            content.push_str(&ops);
            content.push_str(&format!("0 0 {} {} re f\n", num(width), num(height)));
        }

        if image.is_some() {
            content.push_str(&format!(
                "q {} 0 0 {} 0 0 cm /{} Do Q\n",
                num(width),
                num(height),
                IMAGE_RESOURCE
            ));
        }

        let border = if style.border_width > 0.0 { style.border_width } else { 0.0 };
        if border > 0.0 {
            if let Some(ops) = color_to_stroke_ops(&style.border_color) {
                content.push_str(&ops);
                content.push_str(&format!(
                    "{} w {} {} {} {} re S\n",
                    num(border),
                    num(border / 2.0),
                    num(border / 2.0),
                    num((width - border).max(0.0)),
                    num((height - border).max(0.0))
                ));
            }
        }

        let inner = Rect::new(0.0, 0.0, width, height).inset(border + TEXT_PADDING);
        if style.left_text.is_empty() {
            content.push_str(&text_block(style.text, style.font_size, inner, &style.font_color));
        } else {
            let half = inner.width / 2.0;
            let column = (half - TEXT_PADDING).max(0.0);
            let left = Rect::new(inner.x, inner.y, column, inner.height);
            let right = Rect::new(inner.x + half + TEXT_PADDING, inner.y, column, inner.height);
            let color = &style.font_color;
            content.push_str(&text_block(style.left_text, style.left_font_size, left, color));
            content.push_str(&text_block(style.text, style.font_size, right, color));
        }

        content.push_str("Q\n");

        Ok(Self {
            width,
            height,
            content: content.into_bytes(),
            image,
        })
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn image(&self) -> Option<&ImageXObject> {
        self.image.as_ref()
    }

    /// The form XObject; `image` references the image XObject when there is one.
    pub fn to_form_xobject(&self, image: Option<ObjectRef>) -> Object {
        let mut font = HashMap::new();
        font.insert("Type".to_string(), Object::Name("Font".to_string()));
        font.insert("Subtype".to_string(), Object::Name("Type1".to_string()));
        font.insert("BaseFont".to_string(), Object::Name("Helvetica".to_string()));
        font.insert("Encoding".to_string(), Object::Name("WinAnsiEncoding".to_string()));

        let mut fonts = HashMap::new();
        fonts.insert(FONT_RESOURCE.to_string(), Object::Dictionary(font));

        let mut resources = HashMap::new();
        resources.insert("Font".to_string(), Object::Dictionary(fonts));
        if let Some(image) = image {
            let mut xobjects = HashMap::new();
            xobjects.insert(IMAGE_RESOURCE.to_string(), Object::Reference(image));
            resources.insert("XObject".to_string(), Object::Dictionary(xobjects));
        }

        let mut dict = HashMap::new();
        dict.insert("Type".to_string(), Object::Name("XObject".to_string()));
        dict.insert("Subtype".to_string(), Object::Name("Form".to_string()));
        dict.insert(
            "BBox".to_string(),
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(self.width as f64),
                Object::Real(self.height as f64),
            ]),
        );
        dict.insert("Resources".to_string(), Object::Dictionary(resources));
        dict.insert("Length".to_string(), Object::Integer(self.content.len() as i64));

        Object::Stream {
            dict,
            data: bytes::Bytes::from(self.content.clone()),
        }
    }
}

/// Convert color to fill operators.
fn color_to_fill_ops(color: &AnnotationColor) -> Option<String> {
    match color {
        AnnotationColor::None => None,
        AnnotationColor::Gray(g) => Some(format!("{} g\n", num(*g))),
        AnnotationColor::Rgb(r, g, b) => Some(format!("{} {} {} rg\n", num(*r), num(*g), num(*b))),
        AnnotationColor::Cmyk(c, m, y, k) => {
            Some(format!("{} {} {} {} k\n", num(*c), num(*m), num(*y), num(*k)))
        },
    }
}

/// Convert color to stroke operators.
fn color_to_stroke_ops(color: &AnnotationColor) -> Option<String> {
    match color {
        AnnotationColor::None => None,
        AnnotationColor::Gray(g) => Some(format!("{} G\n", num(*g))),
        AnnotationColor::Rgb(r, g, b) => Some(format!("{} {} {} RG\n", num(*r), num(*g), num(*b))),
        AnnotationColor::Cmyk(c, m, y, k) => {
            Some(format!("{} {} {} {} K\n", num(*c), num(*m), num(*y), num(*k)))
        },
    }
}

/// Draw `text` top-aligned inside `area`, wrapping on spaces.
fn text_block(text: &str, font_size: f32, area: Rect, color: &AnnotationColor) -> String {
    if text.trim().is_empty() || area.is_empty() {
        return String::new();
    }

    let size = if font_size > 0.0 {
        font_size
    } else {
        auto_font_size(text, area)
    };
    let lines = wrap_text(text, size, area.width);
    let leading = size * 1.15;

    let mut s = String::from("BT\n");
    s.push_str(&format!("/{} {} Tf\n", FONT_RESOURCE, num(size)));
    if let Some(ops) = color_to_fill_ops(color) {
        s.push_str(&ops);
    }
    s.push_str(&format!("{} TL\n", num(leading)));
    s.push_str(&format!("{} {} Td\n", num(area.x), num(area.top() - size)));
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            s.push_str("T*\n");
        }
        s.push('(');
        s.push_str(&escape_win_ansi(line));
        s.push_str(") Tj\n");
    }
    s.push_str("ET\n");
    s
}

/// Largest size at which the wrapped text fits `area`.
fn auto_font_size(text: &str, area: Rect) -> f32 {
    let mut size = area.height.min(20.0);
    while size > MIN_AUTO_FONT_SIZE {
        let lines = wrap_text(text, size, area.width);
        let fits_height = lines.len() as f32 * size * 1.15 <= area.height;
        let fits_width = lines.iter().all(|l| text_width(l, size) <= area.width);
        if fits_height && fits_width {
            break;
        }
        size -= 0.5;
    }
    size.max(MIN_AUTO_FONT_SIZE)
}

fn wrap_text(text: &str, size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split(' ') {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", current, word)
            };
            if !current.is_empty() && text_width(&candidate, size) > max_width {
                lines.push(std::mem::replace(&mut current, word.to_string()));
            } else {
                current = candidate;
            }
        }
        lines.push(current);
    }
    lines
}

/// Approximate Helvetica advance width of `text` at `size`.
fn text_width(text: &str, size: f32) -> f32 {
    text.chars().map(helvetica_width).sum::<f32>() * size / 1000.0
}

fn helvetica_width(c: char) -> f32 {
    match c {
        ' ' | '.' | ',' | ':' | ';' | '!' | 'i' | 'j' | 'l' | 'I' | '\'' | '|' => 278.0,
        'f' | 't' | 'r' | '(' | ')' | '[' | ']' | '/' | '-' => 333.0,
        'm' | 'M' | 'W' => 833.0,
        'w' | 'C' | 'D' | 'G' | 'H' | 'N' | 'O' | 'Q' | 'R' | 'U' => 722.0,
        'A' | 'B' | 'E' | 'K' | 'P' | 'S' | 'V' | 'X' | 'Y' | '@' => 667.0,
        _ => 556.0,
    }
}

/// Encode for a WinAnsi literal string; characters outside Latin-1 become `?`.
fn escape_win_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            },
            c if (c as u32) < 0x20 => {},
            c if (c as u32) < 0x7F => out.push(c),
            c if (0xA0..=0xFF).contains(&(c as u32)) => {
                out.push_str(&format!("\\{:03o}", c as u32))
            },
            _ => out.push('?'),
        }
    }
    out
}

/// Numbers with at most two decimals and no trailing zeros.
fn num(value: f32) -> String {
    let formatted = format!("{:.2}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
