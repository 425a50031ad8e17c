//! Board object model — types, field validation, geometry.
//!
//! DESIGN
//! ======
//! Documents in the store are flat field maps (`Fields`). This module owns
//! the typed view over them: the `ObjectType` discriminant, per-type
//! validation of create payloads and update patches, and world-space
//! bounding boxes for the frame auto-fit pass.
//!
//! Validation rejects fields that are incompatible with the declared type
//! (a `radius` on a rectangle is a client bug, not a merge candidate) and
//! rejects client-supplied `updatedAt` outright — commit stamps come from
//! the server clock only.

use std::collections::HashMap;

use crate::config;

/// Flat document payload, keyed by wire field names.
pub type Fields = HashMap<String, serde_json::Value>;

// Wire field names of the persisted layout.
pub const F_TYPE: &str = "type";
pub const F_X: &str = "x";
pub const F_Y: &str = "y";
pub const F_WIDTH: &str = "width";
pub const F_HEIGHT: &str = "height";
pub const F_ROTATION: &str = "rotation";
pub const F_COLOR: &str = "color";
pub const F_Z_INDEX: &str = "zIndex";
pub const F_TEXT: &str = "text";
pub const F_FONT_SIZE: &str = "fontSize";
pub const F_RADIUS: &str = "radius";
pub const F_POINTS: &str = "points";
pub const F_CONNECTED_FROM: &str = "connectedFrom";
pub const F_CONNECTED_TO: &str = "connectedTo";
pub const F_STYLE: &str = "style";
pub const F_LINE_STYLE: &str = "lineStyle";
pub const F_ARROW_HEAD: &str = "arrowHead";
pub const F_LAST_EDITED_BY: &str = "lastEditedBy";
pub const F_UPDATED_AT: &str = "updatedAt";

// =============================================================================
// TYPES
// =============================================================================

/// Discriminant of a board object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Sticky,
    Rectangle,
    Circle,
    Line,
    Text,
    Frame,
    Connector,
}

impl ObjectType {
    pub const ALL: [ObjectType; 7] = [
        Self::Sticky,
        Self::Rectangle,
        Self::Circle,
        Self::Line,
        Self::Text,
        Self::Frame,
        Self::Connector,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sticky => "sticky",
            Self::Rectangle => "rectangle",
            Self::Circle => "circle",
            Self::Line => "line",
            Self::Text => "text",
            Self::Frame => "frame",
            Self::Connector => "connector",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unknown object type: {0}")]
    UnknownType(String),
    #[error("field `{field}` is not valid for type `{ty}`")]
    IncompatibleField { field: &'static str, ty: &'static str },
    #[error("field `{0}` must be a finite number")]
    NotFinite(&'static str),
    #[error("field `{field}` must be > 0")]
    NotPositive { field: &'static str },
    #[error("field `{0}` has the wrong JSON type")]
    WrongKind(&'static str),
    #[error("color must be a #rrggbb hex string")]
    BadColor,
    #[error("text exceeds maximum length of {max} characters")]
    TextTooLong { max: usize },
    #[error("points must be an array of exactly 4 finite numbers")]
    BadPoints,
    #[error("style must be an object with lineStyle solid|dashed and boolean arrowHead")]
    BadStyle,
    #[error("clients must not supply `{0}`")]
    ServerStamped(&'static str),
}

impl crate::frame::ErrorCode for ModelError {
    fn error_code(&self) -> &'static str {
        "E_VALIDATION"
    }
}

// =============================================================================
// FIELD ACCESS
// =============================================================================

/// Read a numeric field as f64.
#[must_use]
pub fn num(fields: &Fields, key: &str) -> Option<f64> {
    fields.get(key).and_then(serde_json::Value::as_f64)
}

/// Read a string field.
#[must_use]
pub fn text<'a>(fields: &'a Fields, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(|v| v.as_str())
}

/// The declared type of a document, if present and known.
#[must_use]
pub fn object_type_of(fields: &Fields) -> Option<ObjectType> {
    text(fields, F_TYPE).and_then(ObjectType::parse)
}

/// Connector endpoints, when the document is a connector with both set.
#[must_use]
pub fn connector_endpoints(fields: &Fields) -> Option<(&str, &str)> {
    if object_type_of(fields) != Some(ObjectType::Connector) {
        return None;
    }
    Some((text(fields, F_CONNECTED_FROM)?, text(fields, F_CONNECTED_TO)?))
}

/// Whether a document is a connector that must be hidden on read because an
/// endpoint no longer exists. Non-connectors are never dangling.
pub fn connector_is_dangling(fields: &Fields, mut exists: impl FnMut(&str) -> bool) -> bool {
    if object_type_of(fields) != Some(ObjectType::Connector) {
        return false;
    }
    match connector_endpoints(fields) {
        Some((from, to)) => !exists(from) || !exists(to),
        None => true,
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Validate a full create payload. Returns the parsed type on success.
///
/// # Errors
///
/// Rejects unknown types, missing per-type required fields, fields
/// incompatible with the declared type, and constraint violations.
pub fn validate_create(fields: &Fields) -> Result<ObjectType, ModelError> {
    let ty_str = text(fields, F_TYPE).ok_or(ModelError::MissingField(F_TYPE))?;
    let ty = ObjectType::parse(ty_str).ok_or_else(|| ModelError::UnknownType(ty_str.to_owned()))?;

    check_compatibility(ty, fields)?;
    check_constraints(fields)?;

    for key in required_fields(ty) {
        if !fields.contains_key(*key) {
            return Err(ModelError::MissingField(key));
        }
    }
    Ok(ty)
}

/// Validate a partial update patch.
///
/// The patch may omit `type`; when it carries one, incompatible fields are
/// checked against it. Constraint checks apply to whatever is present.
///
/// # Errors
///
/// Rejects constraint violations and type-incompatible fields.
pub fn validate_patch(fields: &Fields) -> Result<(), ModelError> {
    if let Some(ty_str) = text(fields, F_TYPE) {
        let ty = ObjectType::parse(ty_str).ok_or_else(|| ModelError::UnknownType(ty_str.to_owned()))?;
        check_compatibility(ty, fields)?;
    }
    check_constraints(fields)
}

fn required_fields(ty: ObjectType) -> &'static [&'static str] {
    match ty {
        ObjectType::Sticky | ObjectType::Rectangle | ObjectType::Frame => &[F_X, F_Y, F_WIDTH, F_HEIGHT],
        ObjectType::Circle => &[F_X, F_Y, F_RADIUS],
        ObjectType::Line => &[F_X, F_Y, F_POINTS],
        ObjectType::Text => &[F_X, F_Y, F_FONT_SIZE],
        ObjectType::Connector => &[F_CONNECTED_FROM, F_CONNECTED_TO],
    }
}

fn check_compatibility(ty: ObjectType, fields: &Fields) -> Result<(), ModelError> {
    let exclusive: [(&'static str, ObjectType); 6] = [
        (F_RADIUS, ObjectType::Circle),
        (F_POINTS, ObjectType::Line),
        (F_FONT_SIZE, ObjectType::Text),
        (F_CONNECTED_FROM, ObjectType::Connector),
        (F_CONNECTED_TO, ObjectType::Connector),
        (F_STYLE, ObjectType::Connector),
    ];
    for (field, owner) in exclusive {
        if fields.contains_key(field) && ty != owner {
            return Err(ModelError::IncompatibleField { field, ty: ty.as_str() });
        }
    }
    Ok(())
}

fn check_constraints(fields: &Fields) -> Result<(), ModelError> {
    for key in [F_UPDATED_AT, F_LAST_EDITED_BY] {
        if fields.contains_key(key) {
            return Err(ModelError::ServerStamped(key));
        }
    }

    for key in [F_X, F_Y, F_ROTATION] {
        if let Some(v) = fields.get(key) {
            let n = v.as_f64().ok_or(ModelError::WrongKind(key))?;
            if !n.is_finite() {
                return Err(ModelError::NotFinite(key));
            }
        }
    }

    for key in [F_WIDTH, F_HEIGHT, F_RADIUS, F_FONT_SIZE] {
        if let Some(v) = fields.get(key) {
            let n = v.as_f64().ok_or(ModelError::WrongKind(key))?;
            if !n.is_finite() {
                return Err(ModelError::NotFinite(key));
            }
            // Connectors are the one shape with zero extent.
            let is_connector = object_type_of(fields) == Some(ObjectType::Connector);
            if n <= 0.0 && !is_connector {
                return Err(ModelError::NotPositive { field: key });
            }
        }
    }

    if let Some(v) = fields.get(F_Z_INDEX) {
        if !v.is_i64() && !v.is_u64() {
            return Err(ModelError::WrongKind(F_Z_INDEX));
        }
    }

    if let Some(v) = fields.get(F_COLOR) {
        let s = v.as_str().ok_or(ModelError::WrongKind(F_COLOR))?;
        if !is_hex_color(s) {
            return Err(ModelError::BadColor);
        }
    }

    if let Some(v) = fields.get(F_TEXT) {
        let s = v.as_str().ok_or(ModelError::WrongKind(F_TEXT))?;
        let max = config::max_text_len();
        if s.chars().count() > max {
            return Err(ModelError::TextTooLong { max });
        }
    }

    if let Some(v) = fields.get(F_POINTS) {
        let ok = v.as_array().is_some_and(|arr| {
            arr.len() == 4 && arr.iter().all(|p| p.as_f64().is_some_and(f64::is_finite))
        });
        if !ok {
            return Err(ModelError::BadPoints);
        }
    }

    for key in [F_CONNECTED_FROM, F_CONNECTED_TO] {
        if let Some(v) = fields.get(key) {
            if !v.is_string() {
                return Err(ModelError::WrongKind(key));
            }
        }
    }

    if let Some(v) = fields.get(F_STYLE) {
        validate_style(v)?;
    }

    Ok(())
}

fn validate_style(v: &serde_json::Value) -> Result<(), ModelError> {
    let obj = v.as_object().ok_or(ModelError::BadStyle)?;
    for (key, val) in obj {
        match key.as_str() {
            F_LINE_STYLE => {
                if !matches!(val.as_str(), Some("solid" | "dashed")) {
                    return Err(ModelError::BadStyle);
                }
            }
            F_ARROW_HEAD => {
                if !val.is_boolean() {
                    return Err(ModelError::BadStyle);
                }
            }
            _ => return Err(ModelError::BadStyle),
        }
    }
    Ok(())
}

fn is_hex_color(s: &str) -> bool {
    s.len() == 7 && s.starts_with('#') && s[1..].bytes().all(|b| b.is_ascii_hexdigit())
}

// =============================================================================
// GEOMETRY
// =============================================================================

/// Axis-aligned world-space rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BBox {
    #[must_use]
    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }

    #[must_use]
    pub fn area(&self) -> f64 {
        self.w * self.h
    }

    /// Strict interior containment of a point (boundary excluded).
    #[must_use]
    pub fn contains_point_strict(&self, px: f64, py: f64) -> bool {
        px > self.x && px < self.right() && py > self.y && py < self.bottom()
    }

    /// Gap between this box and `other` along x; zero when they overlap.
    #[must_use]
    pub fn gap_x(&self, other: &BBox) -> f64 {
        (other.x - self.right()).max(self.x - other.right()).max(0.0)
    }

    /// Gap between this box and `other` along y; zero when they overlap.
    #[must_use]
    pub fn gap_y(&self, other: &BBox) -> f64 {
        (other.y - self.bottom()).max(self.y - other.bottom()).max(0.0)
    }
}

/// World bounding box of a document. `None` for connectors (zero extent,
/// never a frame child) and for documents without coordinates.
#[must_use]
pub fn world_bbox(fields: &Fields) -> Option<BBox> {
    let ty = object_type_of(fields)?;
    if ty == ObjectType::Connector {
        return None;
    }
    let x = num(fields, F_X)?;
    let y = num(fields, F_Y)?;
    if ty == ObjectType::Circle {
        // (x, y) is the center for circles.
        let r = num(fields, F_RADIUS)?;
        return Some(BBox { x: x - r, y: y - r, w: 2.0 * r, h: 2.0 * r });
    }
    let w = num(fields, F_WIDTH).unwrap_or(0.0);
    let h = num(fields, F_HEIGHT).unwrap_or(0.0);
    Some(BBox { x, y, w, h })
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
