//! Fills an MMT form template for one participant and one month.
//!
//! Field writes are planned up front as a flat list and applied one by one;
//! a write that fails becomes a [`Warning`] and generation carries on. Only
//! an unreadable template or a serialization failure aborts the call.

use base64::Engine;
use image::{DynamicImage, ImageFormat, Rgba, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, info, warn};

use crate::attendance::AttendanceRecord;
use crate::dates::{compact_date, compact_signature_date, normalize_date, today_compact, TargetMonth};
use crate::error::{FormError, GenerateError, Warning};
use crate::form::{self, AcroForm, FieldKind, Rect};
use crate::layout::{
    self, ScalarField, DEFAULT_LOCATION, INTERRUPTION_NO, INTERRUPTION_YES, PRESENCE_TYPE_OPTION,
};
use crate::model::Participant;

const AFFIRMATIVE_WORDS: [&str; 3] = ["yes", "oui", "on"];
const SIGNATURE_XOBJECT: &str = "MmtSignature";
const COMMENT_SEPARATOR: &str = " / ";

/// Where the signature goes when the template has no signature widget.
const FALLBACK_SIGNATURE_RECT: Rect = Rect { x: 50.0, y: 50.0, width: 200.0, height: 60.0 };

// ============================================================================
// Inputs and outputs
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SignatureOptions {
    /// `DD.MM.YYYY`; today when absent.
    pub date: Option<String>,
    pub is_correction: bool,
    /// `data:image/png;base64,...` or `data:image/jpeg;base64,...`
    pub image: Option<String>,
}

/// Everything one export needs. The location and flatten switch default to
/// the stock location and a flattened output.
#[derive(Debug, Clone)]
pub struct GenerationContext<'a> {
    pub participant: &'a Participant,
    pub attendance: &'a [AttendanceRecord],
    pub template: &'a [u8],
    pub month: TargetMonth,
    pub signature: SignatureOptions,
    pub location: &'a str,
    pub flatten: bool,
}

impl<'a> GenerationContext<'a> {
    pub fn new(
        participant: &'a Participant,
        attendance: &'a [AttendanceRecord],
        template: &'a [u8],
        month: TargetMonth,
    ) -> Self {
        Self {
            participant,
            attendance,
            template,
            month,
            signature: SignatureOptions::default(),
            location: DEFAULT_LOCATION,
            flatten: true,
        }
    }

    pub fn with_signature(mut self, signature: SignatureOptions) -> Self {
        self.signature = signature;
        self
    }

    pub fn with_location(mut self, location: &'a str) -> Self {
        self.location = location;
        self
    }

    pub fn with_flatten(mut self, flatten: bool) -> Self {
        self.flatten = flatten;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Generated {
    pub bytes: Vec<u8>,
    pub warnings: Vec<Warning>,
}

// ============================================================================
// Planned writes
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum FieldWrite {
    Text(String),
    Select(&'static str),
    /// Turn on a checkbox, or pick the affirmative option of a radio group.
    Affirm,
}

fn plan_writes(ctx: &GenerationContext<'_>) -> Vec<(&'static str, FieldWrite)> {
    let mut writes: Vec<(&'static str, FieldWrite)> = Vec::new();
    let push = |key: ScalarField, write: FieldWrite, writes: &mut Vec<_>| match layout::resolve(key) {
        Some(id) => writes.push((id, write)),
        None => debug!(key = %key, "no field mapped, skipping"),
    };

    push(ScalarField::MonthYear, FieldWrite::Text(ctx.month.month_year()), &mut writes);

    let signature_date = ctx
        .signature
        .date
        .as_deref()
        .map(compact_signature_date)
        .filter(|d| !d.is_empty())
        .unwrap_or_else(today_compact);
    push(ScalarField::SignatureDate, FieldWrite::Text(signature_date), &mut writes);

    if ctx.signature.is_correction {
        push(ScalarField::Correction, FieldWrite::Affirm, &mut writes);
    }

    push(ScalarField::SignaturePlace, FieldWrite::Text(ctx.location.to_string()), &mut writes);
    push(ScalarField::PresenceType, FieldWrite::Select(PRESENCE_TYPE_OPTION), &mut writes);

    let participant = ctx.participant;
    if participant.interruption_mmt {
        push(ScalarField::Interruption, FieldWrite::Select(INTERRUPTION_YES), &mut writes);
        if let Some(date) = participant.interruption_date.as_deref().filter(|d| !d.trim().is_empty()) {
            let compact = compact_date(&normalize_date(date)).unwrap_or_else(|| compact_signature_date(date));
            push(ScalarField::InterruptionDate, FieldWrite::Text(compact), &mut writes);
        }
    } else {
        push(ScalarField::Interruption, FieldWrite::Select(INTERRUPTION_NO), &mut writes);
    }

    let mut comments = Vec::new();
    for day in 1..=layout::DAYS_ON_FORM {
        let Some((am_field, pm_field)) = layout::attendance_fields_for_day(day, ctx.month.days()) else {
            continue;
        };
        let date = ctx.month.day_key(day);
        let record = ctx.attendance.iter().find(|r| r.date == date);
        let (am, pm) = match record {
            Some(r) => (display_code(&r.morning_code), display_code(&r.afternoon_code)),
            None => (String::new(), String::new()),
        };
        writes.push((am_field, FieldWrite::Text(am)));
        writes.push((pm_field, FieldWrite::Text(pm)));

        if let Some(comment) = record.map(|r| r.comment.as_str()).filter(|c| !c.trim().is_empty()) {
            comments.push(format!("{:02}.{:02} \"{}\"", day, ctx.month.month, comment));
        }
    }

    if !comments.is_empty() {
        push(ScalarField::Comments, FieldWrite::Text(comments.join(COMMENT_SEPARATOR)), &mut writes);
    }

    writes
}

/// Grid display form of a stored code. `P` is shown as `X`.
fn display_code(code: &str) -> String {
    match code.trim() {
        "P" => "X".to_string(),
        other => other.to_string(),
    }
}

/// First option whose name reads as "yes", "oui" or "on", or whose
/// selection number marks it as the second (positive) choice.
fn affirmative_option(options: &[String]) -> Option<&str> {
    options
        .iter()
        .find(|o| AFFIRMATIVE_WORDS.contains(&o.to_lowercase().as_str()))
        .or_else(|| options.iter().find(|o| o.eq_ignore_ascii_case(INTERRUPTION_YES)))
        .map(String::as_str)
}

fn apply(form: &AcroForm, doc: &mut Document, field: &str, write: &FieldWrite) -> Result<(), FormError> {
    match write {
        FieldWrite::Text(value) => form.set_text(doc, field, value),
        FieldWrite::Select(option) => form.select(doc, field, option),
        FieldWrite::Affirm => {
            let kind = form.field(field).ok_or(FormError::FieldNotFound)?.kind;
            match kind {
                FieldKind::CheckBox => form.check(doc, field),
                FieldKind::Radio => {
                    let options = form.options(doc, field)?;
                    let option = affirmative_option(&options)
                        .ok_or_else(|| FormError::UnknownOption("yes".to_string()))?
                        .to_string();
                    form.select(doc, field, &option)
                }
                other => Err(FormError::WrongKind { expected: "checkbox", actual: other.describe() }),
            }
        }
    }
}

// ============================================================================
// Generation
// ============================================================================

/// Fill `ctx.template` and return the serialized document.
pub fn generate(ctx: &GenerationContext<'_>) -> Result<Generated, GenerateError> {
    let mut doc = Document::load_mem(ctx.template).map_err(|e| GenerateError::Template(e.to_string()))?;
    let form = AcroForm::open(&doc).map_err(|e| GenerateError::Template(e.to_string()))?;
    let mut warnings = Vec::new();

    let writes = plan_writes(ctx);
    debug!(count = writes.len(), "planned field writes");
    for (field, write) in &writes {
        if let Err(e) = apply(&form, &mut doc, field, write) {
            let warning = Warning::FieldWrite { field: field.to_string(), reason: e.to_string() };
            warn!("{}", warning);
            warnings.push(warning);
        }
    }

    let stamp = match ctx.signature.image.as_deref() {
        Some(data_url) => match prepare_signature(&mut doc, &form, data_url) {
            Ok(stamp) => Some(stamp),
            Err(reason) => {
                let warning = Warning::ImageEmbed(reason);
                warn!("{}", warning);
                warnings.push(warning);
                None
            }
        },
        None => None,
    };

    if ctx.flatten {
        let stamped = form
            .flatten(&mut doc)
            .map_err(|e| GenerateError::Serialize(format!("flattening failed: {e}")))?;
        debug!(stamped, "form flattened");
    }

    // Drawn after flattening so the image sits above the stamped widgets.
    if let Some(stamp) = stamp {
        if let Err(e) = stamp.draw(&mut doc) {
            let warning = Warning::ImageEmbed(e.to_string());
            warn!("{}", warning);
            warnings.push(warning);
        }
    }

    doc.compress();
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| GenerateError::Serialize(e.to_string()))?;

    info!(
        participant = %ctx.participant.full_name(),
        month = %ctx.month,
        warnings = warnings.len(),
        "generated attendance form"
    );
    Ok(Generated { bytes, warnings })
}

// ============================================================================
// Signature image
// ============================================================================

struct SignatureStamp {
    page: ObjectId,
    xobject: ObjectId,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

impl SignatureStamp {
    fn draw(&self, doc: &mut Document) -> Result<(), FormError> {
        form::add_page_xobject(doc, self.page, SIGNATURE_XOBJECT, self.xobject)?;
        let ops = vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(self.width),
                    0.into(),
                    0.into(),
                    Object::Real(self.height),
                    Object::Real(self.x),
                    Object::Real(self.y),
                ],
            ),
            Operation::new("Do", vec![Object::Name(SIGNATURE_XOBJECT.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ];
        let content = Content { operations: ops }
            .encode()
            .map_err(|e| FormError::Content(e.to_string()))?;
        form::append_page_content(doc, self.page, content)
    }
}

/// Decode the data URL, embed the image and work out where it is drawn.
fn prepare_signature(doc: &mut Document, form: &AcroForm, data_url: &str) -> Result<SignatureStamp, String> {
    let image = decode_data_url(data_url)?;

    // Composite against white; the image XObject has no soft mask.
    let rgba_image = image.to_rgba8();
    let (width_px, height_px) = rgba_image.dimensions();
    if width_px == 0 || height_px == 0 {
        return Err("image has no pixels".to_string());
    }
    let mut rgb_image = RgbImage::new(width_px, height_px);
    for (x, y, pixel) in rgba_image.enumerate_pixels() {
        let Rgba([r, g, b, a]) = *pixel;
        let alpha = a as f32 / 255.0;
        let bg = 255.0;
        let out_r = (r as f32 * alpha + bg * (1.0 - alpha)) as u8;
        let out_g = (g as f32 * alpha + bg * (1.0 - alpha)) as u8;
        let out_b = (b as f32 * alpha + bg * (1.0 - alpha)) as u8;
        rgb_image.put_pixel(x, y, image::Rgb([out_r, out_g, out_b]));
    }

    let xobject = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width_px as i64,
            "Height" => height_px as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        rgb_image.into_raw(),
    ));

    let (page, rect) = signature_placement(doc, form)?;

    // One pixel per point, shrunk to fit, never enlarged.
    let scale = (rect.width / width_px as f32)
        .min(rect.height / height_px as f32)
        .min(1.0);
    let width = width_px as f32 * scale;
    let height = height_px as f32 * scale;

    Ok(SignatureStamp {
        page,
        xobject,
        x: rect.x + (rect.width - width) / 2.0,
        y: rect.y + (rect.height - height) / 2.0,
        width,
        height,
    })
}

fn signature_placement(doc: &Document, form: &AcroForm) -> Result<(ObjectId, Rect), String> {
    if let Some(field) = layout::resolve(ScalarField::Signature) {
        match form.widget_placement(doc, field) {
            Ok(placement) => return Ok(placement),
            Err(e) => debug!(field, error = %e, "signature widget not placed, using first page"),
        }
    }
    let page = doc
        .get_pages()
        .values()
        .next()
        .copied()
        .ok_or_else(|| "document has no pages".to_string())?;
    Ok((page, FALLBACK_SIGNATURE_RECT))
}

fn decode_data_url(data_url: &str) -> Result<DynamicImage, String> {
    let rest = data_url
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| "not a data URL".to_string())?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| "data URL has no payload".to_string())?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| "data URL is not base64 encoded".to_string())?;
    let format = match mime.to_ascii_lowercase().as_str() {
        "image/png" => ImageFormat::Png,
        "image/jpeg" | "image/jpg" => ImageFormat::Jpeg,
        other => return Err(format!("unsupported image type {other:?}")),
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| format!("invalid base64: {e}"))?;
    image::load_from_memory_with_format(&bytes, format).map_err(|e| format!("cannot decode image: {e}"))
}
