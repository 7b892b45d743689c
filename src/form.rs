//! AcroForm access on top of `lopdf`.
//!
//! Fields are addressed by their fully-qualified name, the partial `/T`
//! names of a field and its ancestors joined with `.`. A form designed as
//! `1` > `2` is therefore field `1.2`, the same string a flat field named
//! `1.2` resolves to.

use std::collections::BTreeMap;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::debug;

use crate::error::FormError;

/// Font resource name used in every appearance stream we write.
pub const FONT_RESOURCE: &str = "Helv";
pub const DEFAULT_FONT_SIZE: f32 = 10.0;

const FF_RADIO: i64 = 1 << 15;
const FF_PUSH_BUTTON: i64 = 1 << 16;
const ANNOT_HIDDEN: i64 = 1 << 1;
const MAX_DEPTH: usize = 32;

// ============================================================================
// Field model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    CheckBox,
    Radio,
    PushButton,
    Choice,
    Signature,
    Unknown,
}

impl FieldKind {
    pub fn describe(self) -> &'static str {
        match self {
            FieldKind::Text => "text field",
            FieldKind::CheckBox => "checkbox",
            FieldKind::Radio => "radio group",
            FieldKind::PushButton => "push button",
            FieldKind::Choice => "choice field",
            FieldKind::Signature => "signature field",
            FieldKind::Unknown => "field of unknown type",
        }
    }
}

/// Decoded value of a terminal field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Checked(bool),
    Selected(String),
    Empty,
}

impl FieldValue {
    /// String view used when a value is mapped onto a text property.
    pub fn as_text(&self) -> String {
        match self {
            FieldValue::Text(s) | FieldValue::Selected(s) => s.clone(),
            FieldValue::Checked(true) => "true".to_string(),
            FieldValue::Checked(false) | FieldValue::Empty => String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) | FieldValue::Selected(s) => s.trim().is_empty(),
            FieldValue::Checked(checked) => !checked,
            FieldValue::Empty => true,
        }
    }
}

/// A terminal field and the widget annotations that display it.
#[derive(Debug, Clone)]
pub struct FormField {
    pub id: ObjectId,
    pub name: String,
    pub kind: FieldKind,
    pub widgets: Vec<ObjectId>,
}

/// Lower-left / upper-right rectangle in page space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    fn from_array(values: &[Object]) -> Option<Rect> {
        if values.len() != 4 {
            return None;
        }
        let nums: Vec<f32> = values.iter().filter_map(number).collect();
        if nums.len() != 4 {
            return None;
        }
        let (x1, x2) = (nums[0].min(nums[2]), nums[0].max(nums[2]));
        let (y1, y2) = (nums[1].min(nums[3]), nums[1].max(nums[3]));
        Some(Rect { x: x1, y: y1, width: x2 - x1, height: y2 - y1 })
    }
}

// ============================================================================
// AcroForm handle
// ============================================================================

/// Terminal fields of one document's interactive form, indexed by name.
pub struct AcroForm {
    fields: Vec<FormField>,
    by_name: BTreeMap<String, usize>,
}

impl AcroForm {
    /// Walk the `/AcroForm /Fields` tree. Fails when the document has no form.
    pub fn open(doc: &Document) -> Result<Self, FormError> {
        let acroform = acroform_dict(doc)?;
        let roots = match acroform.get(b"Fields") {
            Ok(obj) => deref(doc, obj)?.as_array()?.clone(),
            Err(_) => Vec::new(),
        };

        let mut fields = Vec::new();
        for root in &roots {
            if let Object::Reference(id) = root {
                collect_fields(doc, *id, "", Inherited::default(), 0, &mut fields);
            }
        }

        let by_name = fields
            .iter()
            .enumerate()
            .map(|(idx, f)| (f.name.clone(), idx))
            .collect();

        debug!(count = fields.len(), "opened interactive form");
        Ok(Self { fields, by_name })
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FormField> {
        self.by_name.get(name).map(|idx| &self.fields[*idx])
    }

    fn require(&self, name: &str) -> Result<&FormField, FormError> {
        self.field(name).ok_or(FormError::FieldNotFound)
    }

    /// Decode the value of `field` according to its kind.
    pub fn value(&self, doc: &Document, field: &FormField) -> Result<FieldValue, FormError> {
        match field.kind {
            FieldKind::Text => Ok(match inherited_value(doc, field.id)? {
                Some(obj) => FieldValue::Text(object_text(doc, obj)?),
                None => FieldValue::Text(String::new()),
            }),
            FieldKind::Choice => Ok(match inherited_value(doc, field.id)? {
                Some(Object::Array(items)) => match items.first() {
                    Some(first) => FieldValue::Selected(object_text(doc, first)?),
                    None => FieldValue::Selected(String::new()),
                },
                Some(obj) => FieldValue::Selected(object_text(doc, obj)?),
                None => FieldValue::Selected(String::new()),
            }),
            FieldKind::CheckBox => {
                let state = match inherited_value(doc, field.id)? {
                    Some(obj) => object_text(doc, obj)?,
                    None => widget_state(doc, field).unwrap_or_default(),
                };
                Ok(FieldValue::Checked(!state.is_empty() && state != "Off"))
            }
            FieldKind::Radio => {
                let state = match inherited_value(doc, field.id)? {
                    Some(obj) => object_text(doc, obj)?,
                    None => String::new(),
                };
                if state == "Off" {
                    Ok(FieldValue::Selected(String::new()))
                } else {
                    Ok(FieldValue::Selected(state))
                }
            }
            FieldKind::PushButton | FieldKind::Signature | FieldKind::Unknown => Ok(FieldValue::Empty),
        }
    }

    /// Options of a radio group (or on-states of a checkbox), from the
    /// widgets' normal appearance dictionaries.
    pub fn options(&self, doc: &Document, name: &str) -> Result<Vec<String>, FormError> {
        let field = self.require(name)?;
        let mut options = Vec::new();
        for widget in &field.widgets {
            for state in appearance_states(doc, *widget) {
                if state != "Off" && !options.contains(&state) {
                    options.push(state);
                }
            }
        }
        Ok(options)
    }

    /// Set a text field's value and regenerate its appearance in Helvetica.
    pub fn set_text(&self, doc: &mut Document, name: &str, value: &str) -> Result<(), FormError> {
        let field = self.require(name)?;
        if field.kind != FieldKind::Text {
            return Err(FormError::WrongKind { expected: "text field", actual: field.kind.describe() });
        }

        let font_id = ensure_default_font(doc)?;
        {
            let dict = doc.get_object_mut(field.id)?.as_dict_mut()?;
            dict.set("V", encode_text_string(value));
            dict.set("DA", Object::string_literal(default_appearance(DEFAULT_FONT_SIZE)));
        }

        for widget in &field.widgets {
            write_text_appearance(doc, field.id, *widget, value, font_id)?;
        }
        Ok(())
    }

    /// Turn a checkbox on.
    pub fn check(&self, doc: &mut Document, name: &str) -> Result<(), FormError> {
        let field = self.require(name)?;
        if field.kind != FieldKind::CheckBox {
            return Err(FormError::WrongKind { expected: "checkbox", actual: field.kind.describe() });
        }
        let on_state = self
            .options(doc, name)?
            .into_iter()
            .next()
            .unwrap_or_else(|| "Yes".to_string());
        set_button_state(doc, field, &on_state)
    }

    /// Select `option` in a radio group.
    pub fn select(&self, doc: &mut Document, name: &str, option: &str) -> Result<(), FormError> {
        let field = self.require(name)?;
        if field.kind != FieldKind::Radio {
            return Err(FormError::WrongKind { expected: "radio group", actual: field.kind.describe() });
        }
        let options = self.options(doc, name)?;
        if !options.is_empty() && !options.iter().any(|o| o == option) {
            return Err(FormError::UnknownOption(option.to_string()));
        }
        set_button_state(doc, field, option)
    }

    /// Page and rectangle of the first widget of `name`.
    pub fn widget_placement(&self, doc: &Document, name: &str) -> Result<(ObjectId, Rect), FormError> {
        let field = self.require(name)?;
        let widget = *field.widgets.first().ok_or(FormError::FieldNotFound)?;
        let dict = doc.get_object(widget)?.as_dict()?;
        let rect = widget_rect(dict).ok_or(FormError::FieldNotFound)?;
        let page = widget_page(doc, widget).ok_or(FormError::FieldNotFound)?;
        Ok((page, rect))
    }

    /// Stamp every visible widget's appearance onto its page, then drop the
    /// widgets and the form itself. Returns the number of widgets stamped.
    pub fn flatten(self, doc: &mut Document) -> Result<usize, FormError> {
        self.fill_missing_appearances(doc)?;

        let mut stamped = 0;
        let mut per_page: BTreeMap<ObjectId, Vec<u8>> = BTreeMap::new();

        for field in &self.fields {
            for widget in &field.widgets {
                let Some(page) = widget_page(doc, *widget) else { continue };
                let Some((xobject, rect, bbox)) = widget_appearance(doc, *widget)? else {
                    remove_annotation(doc, page, *widget)?;
                    continue;
                };

                let name = format!("FlatWidget{}_{}", widget.0, widget.1);
                add_page_xobject(doc, page, &name, xobject)?;

                let sx = if bbox.width > 0.0 { rect.width / bbox.width } else { 1.0 };
                let sy = if bbox.height > 0.0 { rect.height / bbox.height } else { 1.0 };
                let ops = vec![
                    Operation::new("q", vec![]),
                    Operation::new(
                        "cm",
                        vec![
                            Object::Real(sx),
                            0.into(),
                            0.into(),
                            Object::Real(sy),
                            Object::Real(rect.x - bbox.x * sx),
                            Object::Real(rect.y - bbox.y * sy),
                        ],
                    ),
                    Operation::new("Do", vec![Object::Name(name.into_bytes())]),
                    Operation::new("Q", vec![]),
                ];
                let bytes = Content { operations: ops }
                    .encode()
                    .map_err(|e| FormError::Content(e.to_string()))?;
                per_page.entry(page).or_default().extend_from_slice(&bytes);

                remove_annotation(doc, page, *widget)?;
                stamped += 1;
            }
        }

        for (page, content) in per_page {
            append_page_content(doc, page, content)?;
        }

        let root = root_id(doc)?;
        doc.get_object_mut(root)?.as_dict_mut()?.remove(b"AcroForm");
        debug!(stamped, "flattened interactive form");
        Ok(stamped)
    }

    /// Text and choice widgets filled by a viewer that only set
    /// `NeedAppearances` carry a value but no `/AP /N`; draw one for them.
    fn fill_missing_appearances(&self, doc: &mut Document) -> Result<(), FormError> {
        let mut font_id = None;
        for field in &self.fields {
            if !matches!(field.kind, FieldKind::Text | FieldKind::Choice) {
                continue;
            }
            let value = match self.value(doc, field) {
                Ok(value) if !value.is_empty() => value.as_text(),
                Ok(_) => continue,
                Err(e) => {
                    debug!(field = %field.name, error = %e, "unreadable value, no appearance drawn");
                    continue;
                }
            };
            for widget in &field.widgets {
                if has_normal_appearance(doc, *widget) {
                    continue;
                }
                let font = match font_id {
                    Some(id) => id,
                    None => *font_id.insert(ensure_default_font(doc)?),
                };
                write_text_appearance(doc, field.id, *widget, &value, font)?;
                debug!(field = %field.name, "drew missing appearance");
            }
        }
        Ok(())
    }
}

// ============================================================================
// Field tree walking
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct Inherited {
    ft: Option<[u8; 3]>,
    flags: i64,
}

fn collect_fields(
    doc: &Document,
    id: ObjectId,
    parent_name: &str,
    inherited: Inherited,
    depth: usize,
    out: &mut Vec<FormField>,
) {
    if depth > MAX_DEPTH {
        return;
    }
    let Ok(dict) = doc.get_object(id).and_then(Object::as_dict) else { return };

    let partial = dict.get(b"T").ok().and_then(|t| object_text(doc, t).ok());
    let name = match (&partial, parent_name.is_empty()) {
        (Some(t), true) => t.clone(),
        (Some(t), false) => format!("{parent_name}.{t}"),
        (None, _) => parent_name.to_string(),
    };

    let mut inherited = inherited;
    if let Ok(Object::Name(ft)) = dict.get(b"FT") {
        let mut buf = [0u8; 3];
        for (slot, byte) in buf.iter_mut().zip(ft.iter()) {
            *slot = *byte;
        }
        inherited.ft = Some(buf);
    }
    if let Ok(Object::Integer(flags)) = dict.get(b"Ff") {
        inherited.flags = *flags;
    }

    let kids: Vec<ObjectId> = dict
        .get(b"Kids")
        .ok()
        .and_then(|k| deref(doc, k).ok())
        .and_then(|k| k.as_array().ok())
        .map(|arr| arr.iter().filter_map(|o| o.as_reference().ok()).collect())
        .unwrap_or_default();

    let (child_fields, widgets): (Vec<ObjectId>, Vec<ObjectId>) = kids.into_iter().partition(|kid| {
        doc.get_object(*kid)
            .and_then(Object::as_dict)
            .map(|d| d.has(b"T"))
            .unwrap_or(false)
    });

    for child in child_fields {
        collect_fields(doc, child, &name, inherited, depth + 1, out);
    }

    let is_terminal = !widgets.is_empty() || !dict.has(b"Kids");
    if !is_terminal || name.is_empty() {
        return;
    }

    let widgets = if widgets.is_empty() { vec![id] } else { widgets };
    out.push(FormField { id, name, kind: kind_of(inherited), widgets });
}

fn kind_of(inherited: Inherited) -> FieldKind {
    match inherited.ft.as_ref().map(|b| &b[..]) {
        Some([b'T', b'x', 0]) => FieldKind::Text,
        Some([b'C', b'h', 0]) => FieldKind::Choice,
        Some([b'S', b'i', b'g']) => FieldKind::Signature,
        Some([b'B', b't', b'n']) => {
            if inherited.flags & FF_PUSH_BUTTON != 0 {
                FieldKind::PushButton
            } else if inherited.flags & FF_RADIO != 0 {
                FieldKind::Radio
            } else {
                FieldKind::CheckBox
            }
        }
        _ => FieldKind::Unknown,
    }
}

/// `/V` of a field, looked up through its `/Parent` chain.
fn inherited_value(doc: &Document, id: ObjectId) -> Result<Option<&Object>, FormError> {
    let mut current = id;
    for _ in 0..MAX_DEPTH {
        let dict = doc.get_object(current)?.as_dict()?;
        if let Ok(value) = dict.get(b"V") {
            return Ok(Some(deref(doc, value)?));
        }
        match dict.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent) => current = parent,
            Err(_) => break,
        }
    }
    Ok(None)
}

fn widget_state(doc: &Document, field: &FormField) -> Option<String> {
    field.widgets.iter().find_map(|w| {
        let dict = doc.get_object(*w).ok()?.as_dict().ok()?;
        match dict.get(b"AS").ok()? {
            Object::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
            _ => None,
        }
    })
}

fn appearance_states(doc: &Document, widget: ObjectId) -> Vec<String> {
    let normal = doc
        .get_object(widget)
        .ok()
        .and_then(|w| w.as_dict().ok())
        .and_then(|d| d.get(b"AP").ok())
        .and_then(|ap| deref(doc, ap).ok())
        .and_then(|ap| ap.as_dict().ok())
        .and_then(|ap| ap.get(b"N").ok())
        .and_then(|n| deref(doc, n).ok());

    match normal {
        Some(Object::Dictionary(states)) => states
            .iter()
            .map(|(k, _)| String::from_utf8_lossy(k).into_owned())
            .collect(),
        _ => Vec::new(),
    }
}

fn set_button_state(doc: &mut Document, field: &FormField, state: &str) -> Result<(), FormError> {
    doc.get_object_mut(field.id)?
        .as_dict_mut()?
        .set("V", Object::Name(state.as_bytes().to_vec()));

    for widget in &field.widgets {
        let states = appearance_states(doc, *widget);
        let shown = if states.is_empty() || states.iter().any(|s| s == state) { state } else { "Off" };
        doc.get_object_mut(*widget)?
            .as_dict_mut()?
            .set("AS", Object::Name(shown.as_bytes().to_vec()));
    }
    Ok(())
}

// ============================================================================
// Object helpers
// ============================================================================

fn deref<'a>(doc: &'a Document, obj: &'a Object) -> Result<&'a Object, FormError> {
    match obj {
        Object::Reference(id) => Ok(doc.get_object(*id)?),
        other => Ok(other),
    }
}

fn is_reference_to(obj: &Object, id: ObjectId) -> bool {
    matches!(obj, Object::Reference(r) if *r == id)
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn root_id(doc: &Document) -> Result<ObjectId, FormError> {
    Ok(doc.trailer.get(b"Root")?.as_reference()?)
}

fn acroform_dict(doc: &Document) -> Result<&Dictionary, FormError> {
    let catalog = doc.get_object(root_id(doc)?)?.as_dict()?;
    let acroform = catalog.get(b"AcroForm").map_err(|_| FormError::NoForm)?;
    deref(doc, acroform)?.as_dict().map_err(|_| FormError::NoForm)
}

fn acroform_dict_mut(doc: &mut Document) -> Result<&mut Dictionary, FormError> {
    let root = root_id(doc)?;
    let reference = match doc.get_object(root)?.as_dict()?.get(b"AcroForm") {
        Ok(Object::Reference(id)) => Some(*id),
        Ok(_) => None,
        Err(_) => return Err(FormError::NoForm),
    };
    match reference {
        Some(id) => Ok(doc.get_object_mut(id)?.as_dict_mut()?),
        None => Ok(doc
            .get_object_mut(root)?
            .as_dict_mut()?
            .get_mut(b"AcroForm")?
            .as_dict_mut()?),
    }
}

/// Decode a PDF text string (UTF-16BE with BOM, UTF-8 with BOM, or
/// PDFDocEncoding read as Latin-1). Names decode to their bytes.
pub fn object_text(doc: &Document, obj: &Object) -> Result<String, FormError> {
    match deref(doc, obj)? {
        Object::String(bytes, _) => Ok(decode_text_bytes(bytes)),
        Object::Name(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
        Object::Integer(i) => Ok(i.to_string()),
        Object::Real(r) => Ok(r.to_string()),
        Object::Boolean(b) => Ok(b.to_string()),
        Object::Null => Ok(String::new()),
        _ => Err(FormError::UnexpectedObject),
    }
}

pub fn decode_text_bytes(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(utf8) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(utf8).into_owned();
    }
    bytes.iter().map(|b| *b as char).collect()
}

/// Encode a text string: Latin-1 when every character fits, else UTF-16BE.
pub fn encode_text_string(value: &str) -> Object {
    if value.chars().all(|c| (c as u32) < 0x80 || (0xA0..=0xFF).contains(&(c as u32))) {
        Object::String(value.chars().map(|c| c as u8).collect(), StringFormat::Literal)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in value.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}

/// Bytes for a Helvetica WinAnsi show-text operand; unmappable chars become `?`.
pub(crate) fn win_ansi(value: &str) -> Vec<u8> {
    value
        .chars()
        .map(|c| match c as u32 {
            code @ 0x20..=0x7E | code @ 0xA0..=0xFF => code as u8,
            _ => b'?',
        })
        .collect()
}

pub fn default_appearance(size: f32) -> String {
    format!("/{FONT_RESOURCE} {size} Tf 0 g")
}

/// Helvetica font object registered in the form's `/DR`, created on demand.
pub fn ensure_default_font(doc: &mut Document) -> Result<ObjectId, FormError> {
    let existing = {
        let acroform = acroform_dict(doc)?;
        acroform
            .get(b"DR")
            .ok()
            .and_then(|dr| deref(doc, dr).ok())
            .and_then(|dr| dr.as_dict().ok())
            .and_then(|dr| dr.get(b"Font").ok())
            .and_then(|fonts| deref(doc, fonts).ok())
            .and_then(|fonts| fonts.as_dict().ok())
            .and_then(|fonts| fonts.get(FONT_RESOURCE.as_bytes()).ok())
            .and_then(|font| font.as_reference().ok())
    };
    if let Some(id) = existing {
        return Ok(id);
    }

    let font_id = doc.add_object(helvetica());
    let mut resources = {
        let acroform = acroform_dict(doc)?;
        acroform
            .get(b"DR")
            .ok()
            .and_then(|dr| deref(doc, dr).ok())
            .and_then(|dr| dr.as_dict().ok())
            .cloned()
            .unwrap_or_default()
    };
    let mut fonts = resources
        .get(b"Font")
        .ok()
        .and_then(|fonts| deref(doc, fonts).ok())
        .and_then(|fonts| fonts.as_dict().ok())
        .cloned()
        .unwrap_or_default();
    fonts.set(FONT_RESOURCE, Object::Reference(font_id));
    resources.set("Font", fonts);

    let acroform = acroform_dict_mut(doc)?;
    acroform.set("DR", resources);
    acroform.set("DA", Object::string_literal(default_appearance(DEFAULT_FONT_SIZE)));
    acroform.set("NeedAppearances", false);
    Ok(font_id)
}

pub fn helvetica() -> Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    }
}

/// Single-line appearance stream for a text widget.
fn text_appearance(value: &str, rect: Rect, quadding: i64, font_id: ObjectId) -> Result<Stream, FormError> {
    let size = DEFAULT_FONT_SIZE.min((rect.height - 2.0).max(4.0));
    // Helvetica's average advance is a little over half the em.
    let estimated_width = value.chars().count() as f32 * size * 0.556;
    let x = match quadding {
        1 => ((rect.width - estimated_width) / 2.0).max(1.0),
        2 => (rect.width - estimated_width - 2.0).max(1.0),
        _ => 2.0,
    };
    let y = ((rect.height - size) / 2.0 + size * 0.22).max(1.0);

    let mut operations = vec![
        Operation::new("BMC", vec![Object::Name(b"Tx".to_vec())]),
        Operation::new("q", vec![]),
    ];
    if !value.is_empty() {
        operations.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(FONT_RESOURCE.as_bytes().to_vec()), Object::Real(size)]),
            Operation::new("g", vec![0.into()]),
            Operation::new("Td", vec![Object::Real(x), Object::Real(y)]),
            Operation::new("Tj", vec![Object::String(win_ansi(value), StringFormat::Literal)]),
            Operation::new("ET", vec![]),
        ]);
    }
    operations.extend([Operation::new("Q", vec![]), Operation::new("EMC", vec![])]);

    let content = Content { operations }
        .encode()
        .map_err(|e| FormError::Content(e.to_string()))?;

    let mut fonts = Dictionary::new();
    fonts.set(FONT_RESOURCE, Object::Reference(font_id));
    Ok(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => vec![0.into(), 0.into(), Object::Real(rect.width), Object::Real(rect.height)],
            "Resources" => dictionary! { "Font" => fonts },
        },
        content,
    ))
}

/// Replace a text widget's normal appearance with `value` drawn in Helvetica.
fn write_text_appearance(
    doc: &mut Document,
    field: ObjectId,
    widget: ObjectId,
    value: &str,
    font_id: ObjectId,
) -> Result<(), FormError> {
    let (rect, quadding) = {
        let dict = doc.get_object(widget)?.as_dict()?;
        let rect = widget_rect(dict).unwrap_or(Rect { x: 0.0, y: 0.0, width: 100.0, height: 14.0 });
        let quadding = dict
            .get(b"Q")
            .ok()
            .and_then(number)
            .or_else(|| doc.get_object(field).ok()?.as_dict().ok()?.get(b"Q").ok().and_then(number))
            .unwrap_or(0.0) as i64;
        (rect, quadding)
    };
    let stream = text_appearance(value, rect, quadding, font_id)?;
    let stream_id = doc.add_object(stream);
    let dict = doc.get_object_mut(widget)?.as_dict_mut()?;
    dict.set("AP", dictionary! { "N" => Object::Reference(stream_id) });
    Ok(())
}

fn has_normal_appearance(doc: &Document, widget: ObjectId) -> bool {
    doc.get_object(widget)
        .ok()
        .and_then(|w| w.as_dict().ok())
        .and_then(|d| d.get(b"AP").ok())
        .and_then(|ap| deref(doc, ap).ok())
        .and_then(|ap| ap.as_dict().ok())
        .map(|ap| ap.has(b"N"))
        .unwrap_or(false)
}

fn widget_rect(dict: &Dictionary) -> Option<Rect> {
    match dict.get(b"Rect").ok()? {
        Object::Array(values) => Rect::from_array(values),
        _ => None,
    }
}

/// Page holding `widget`: its `/P` entry, else a search of page `/Annots`.
fn widget_page(doc: &Document, widget: ObjectId) -> Option<ObjectId> {
    if let Ok(page) = doc
        .get_object(widget)
        .and_then(Object::as_dict)
        .and_then(|d| d.get(b"P"))
        .and_then(Object::as_reference)
    {
        return Some(page);
    }
    doc.get_pages().into_values().find(|page| {
        page_annotations(doc, *page)
            .map(|annots| annots.iter().any(|a| is_reference_to(a, widget)))
            .unwrap_or(false)
    })
}

fn page_annotations(doc: &Document, page: ObjectId) -> Option<Vec<Object>> {
    let dict = doc.get_object(page).ok()?.as_dict().ok()?;
    let annots = deref(doc, dict.get(b"Annots").ok()?).ok()?;
    annots.as_array().ok().cloned()
}

/// Normal appearance of a widget as an XObject id, with the widget
/// rectangle and the appearance's bounding box.
fn widget_appearance(doc: &mut Document, widget: ObjectId) -> Result<Option<(ObjectId, Rect, Rect)>, FormError> {
    let (normal, rect, hidden, state) = {
        let dict = doc.get_object(widget)?.as_dict()?;
        let Some(rect) = widget_rect(dict) else { return Ok(None) };
        let hidden = matches!(dict.get(b"F"), Ok(Object::Integer(f)) if f & ANNOT_HIDDEN != 0);
        let state = match dict.get(b"AS") {
            Ok(Object::Name(n)) => Some(n.clone()),
            _ => None,
        };
        let normal = dict
            .get(b"AP")
            .ok()
            .and_then(|ap| deref(doc, ap).ok())
            .and_then(|ap| ap.as_dict().ok())
            .and_then(|ap| ap.get(b"N").ok())
            .cloned();
        (normal, rect, hidden, state)
    };
    if hidden || rect.width <= 0.0 || rect.height <= 0.0 {
        return Ok(None);
    }

    let normal = match normal {
        Some(obj) => obj,
        None => return Ok(None),
    };

    // Button appearances are keyed by state; pick the one shown.
    let stream_obj = match deref(doc, &normal)? {
        Object::Dictionary(states) => match state {
            Some(state) => match states.get(&state) {
                Ok(obj) => obj.clone(),
                Err(_) => return Ok(None),
            },
            None => return Ok(None),
        },
        Object::Stream(_) => normal.clone(),
        _ => return Ok(None),
    };

    let xobject_id = match stream_obj {
        Object::Reference(id) => id,
        Object::Stream(stream) => doc.add_object(stream),
        _ => return Ok(None),
    };

    let bbox = match doc.get_object(xobject_id)? {
        Object::Stream(stream) => match stream.dict.get(b"BBox") {
            Ok(Object::Array(values)) => Rect::from_array(values),
            _ => None,
        },
        _ => return Ok(None),
    }
    .unwrap_or(Rect { x: 0.0, y: 0.0, width: rect.width, height: rect.height });

    Ok(Some((xobject_id, rect, bbox)))
}

fn remove_annotation(doc: &mut Document, page: ObjectId, widget: ObjectId) -> Result<(), FormError> {
    let annots_ref = match doc.get_object(page)?.as_dict()?.get(b"Annots") {
        Ok(Object::Reference(id)) => Some(*id),
        Ok(_) => None,
        Err(_) => return Ok(()),
    };
    let annots = match annots_ref {
        Some(id) => doc.get_object_mut(id)?.as_array_mut()?,
        None => doc.get_object_mut(page)?.as_dict_mut()?.get_mut(b"Annots")?.as_array_mut()?,
    };
    annots.retain(|a| !is_reference_to(a, widget));
    Ok(())
}

// ============================================================================
// Page content helpers
// ============================================================================

/// Resources dictionary of `page` as an indirect object, materializing an
/// inline or inherited one so it can be extended without side effects.
fn page_resources_id(doc: &mut Document, page: ObjectId) -> Result<ObjectId, FormError> {
    let existing = doc.get_object(page)?.as_dict()?.get(b"Resources").ok().cloned();
    let resources = match existing {
        Some(Object::Reference(id)) => return Ok(id),
        Some(Object::Dictionary(dict)) => dict,
        _ => inherited_resources(doc, page).unwrap_or_default(),
    };
    let id = doc.add_object(resources);
    doc.get_object_mut(page)?
        .as_dict_mut()?
        .set("Resources", Object::Reference(id));
    Ok(id)
}

fn inherited_resources(doc: &Document, page: ObjectId) -> Option<Dictionary> {
    let mut current = doc.get_object(page).ok()?.as_dict().ok()?.get(b"Parent").ok()?.as_reference().ok()?;
    for _ in 0..MAX_DEPTH {
        let dict = doc.get_object(current).ok()?.as_dict().ok()?;
        if let Ok(res) = dict.get(b"Resources") {
            return deref(doc, res).ok()?.as_dict().ok().cloned();
        }
        current = dict.get(b"Parent").ok()?.as_reference().ok()?;
    }
    None
}

/// Register `xobject` under `/XObject /<name>` in the page resources.
pub fn add_page_xobject(doc: &mut Document, page: ObjectId, name: &str, xobject: ObjectId) -> Result<(), FormError> {
    let resources = page_resources_id(doc, page)?;
    let xobjects_ref = match doc.get_object(resources)?.as_dict()?.get(b"XObject") {
        Ok(Object::Reference(id)) => Some(*id),
        _ => None,
    };
    let xobjects = match xobjects_ref {
        Some(id) => doc.get_object_mut(id)?.as_dict_mut()?,
        None => {
            let dict = doc.get_object_mut(resources)?.as_dict_mut()?;
            if !matches!(dict.get(b"XObject"), Ok(Object::Dictionary(_))) {
                dict.set("XObject", Dictionary::new());
            }
            dict.get_mut(b"XObject")?.as_dict_mut()?
        }
    };
    xobjects.set(name, Object::Reference(xobject));
    Ok(())
}

/// Append drawing operators after the page's existing content, isolating the
/// existing graphics state with a `q`/`Q` pair.
pub fn append_page_content(doc: &mut Document, page: ObjectId, content: Vec<u8>) -> Result<(), FormError> {
    let mut wrapped = b"Q\n".to_vec();
    wrapped.extend(content);
    let prefix_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let suffix_id = doc.add_object(Stream::new(Dictionary::new(), wrapped));

    let existing = doc.get_object(page)?.as_dict()?.get(b"Contents").ok().cloned();
    let mut parts = vec![Object::Reference(prefix_id)];
    match existing {
        Some(Object::Reference(id)) => match doc.get_object(id)? {
            Object::Array(items) => parts.extend(items.iter().cloned()),
            _ => parts.push(Object::Reference(id)),
        },
        Some(Object::Array(items)) => parts.extend(items),
        _ => {}
    }
    parts.push(Object::Reference(suffix_id));

    doc.get_object_mut(page)?
        .as_dict_mut()?
        .set("Contents", Object::Array(parts));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_strings_round_trip_through_both_encodings() {
        for value in ["Dupont", "Décès à Genève", "Łukasz", ""] {
            let encoded = encode_text_string(value);
            let Object::String(bytes, _) = &encoded else { panic!("not a string") };
            assert_eq!(decode_text_bytes(bytes), value);
        }
    }

    #[test]
    fn non_latin_text_uses_utf16() {
        let Object::String(bytes, _) = encode_text_string("Łukasz") else { panic!() };
        assert_eq!(&bytes[..2], &[0xFE, 0xFF]);
    }

    #[test]
    fn win_ansi_replaces_unmappable_characters() {
        assert_eq!(win_ansi("é€"), vec![0xE9, b'?']);
    }

    #[test]
    fn field_values_report_emptiness() {
        assert!(FieldValue::Text("  ".into()).is_empty());
        assert!(FieldValue::Checked(false).is_empty());
        assert!(!FieldValue::Selected("Auswahl2".into()).is_empty());
        assert_eq!(FieldValue::Checked(true).as_text(), "true");
    }

    #[test]
    fn flatten_draws_values_that_had_no_appearance() {
        let bytes = crate::template::blank_form_with(&[("1.2", "Zyxwvut")]).unwrap();
        let mut doc = Document::load_mem(&bytes).unwrap();
        let form = AcroForm::open(&doc).unwrap();
        let widget = form.field("1.2").unwrap().widgets[0];
        doc.get_object_mut(widget).unwrap().as_dict_mut().unwrap().remove(b"AP");
        let page = widget_page(&doc, widget).unwrap();

        form.flatten(&mut doc).unwrap();

        let resources = doc.get_object(page).unwrap().as_dict().unwrap().get(b"Resources").unwrap().as_reference().unwrap();
        let xobjects = doc.get_object(resources).unwrap().as_dict().unwrap().get(b"XObject").unwrap().as_dict().unwrap();
        let name = format!("FlatWidget{}_{}", widget.0, widget.1);
        let stamp = xobjects.get(name.as_bytes()).unwrap().as_reference().unwrap();
        let content = &doc.get_object(stamp).unwrap().as_stream().unwrap().content;
        assert!(content.windows(7).any(|w| w == b"Zyxwvut"));
    }

    #[test]
    fn rect_normalizes_corner_order() {
        let rect = Rect::from_array(&[100.into(), 50.into(), 20.into(), 10.into()]).unwrap();
        assert_eq!(rect, Rect { x: 20.0, y: 10.0, width: 80.0, height: 40.0 });
    }
}
