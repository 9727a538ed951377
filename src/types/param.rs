//! Typed task parameters.
//!
//! A [`Param`] is a single named, typed value exchanged between the
//! caller and a package task. Input parameters typically carry task
//! options (input file names, processing flags); output parameters may
//! carry arbitrary payloads returned by the task, such as a FITS file
//! or the lines of its stdout stream. The declared [`ParamKind`] is a
//! closed set; a value is only accepted when its runtime kind matches.
//!
//! Blob values carry raw bytes and serialize as base64 strings on the
//! JSON wire; their optional mime `encoding` disambiguates the content.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The declared kind of a parameter.
///
/// Unrecognized kinds are rejected at deserialization; there is no
/// free-form type string.
///
/// # Examples
///
/// ```
/// use votask::ParamKind;
///
/// assert_eq!(serde_json::to_value(ParamKind::Real).unwrap(), "real");
/// assert_eq!(ParamKind::Blob.to_string(), "blob");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// UTF-8 text.
    String,
    /// Signed 64-bit integer.
    Int,
    /// Double-precision float.
    Real,
    /// Boolean flag.
    Bool,
    /// Opaque bytes; the parameter's `encoding` names the mime type.
    Blob,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Int => write!(f, "int"),
            Self::Real => write!(f, "real"),
            Self::Bool => write!(f, "bool"),
            Self::Blob => write!(f, "blob"),
        }
    }
}

/// A single scalar parameter value.
///
/// On the wire each scalar is externally tagged with its kind, e.g.
/// `{"string": "quasar"}` or `{"blob": "aGVsbG8="}` (base64).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scalar {
    /// A text value.
    String(String),
    /// An integer value.
    Int(i64),
    /// A floating-point value.
    Real(f64),
    /// A boolean value.
    Bool(bool),
    /// Raw bytes, base64 on the wire.
    Blob(#[serde(with = "blob_bytes")] Vec<u8>),
}

impl Scalar {
    /// The kind this scalar is assignable to.
    pub fn kind(&self) -> ParamKind {
        match self {
            Self::String(_) => ParamKind::String,
            Self::Int(_) => ParamKind::Int,
            Self::Real(_) => ParamKind::Real,
            Self::Bool(_) => ParamKind::Bool,
            Self::Blob(_) => ParamKind::Blob,
        }
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec<u8>> for Scalar {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

/// A parameter value: one scalar, or an ordered sequence of scalars of
/// the same declared kind.
///
/// # Examples
///
/// ```
/// use votask::{ParamKind, ParamValue, Scalar};
///
/// let v = ParamValue::from("quasar");
/// assert_eq!(v.kind(), Some(ParamKind::String));
///
/// let list = ParamValue::from(vec![Scalar::from(1i64), Scalar::from(2i64)]);
/// assert_eq!(list.kind(), Some(ParamKind::Int));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A single scalar value.
    Scalar(Scalar),
    /// An ordered list of scalars of one kind.
    List(Vec<Scalar>),
}

impl ParamValue {
    /// The kind of this value, or `None` for an empty list (assignable
    /// to any declared kind).
    pub fn kind(&self) -> Option<ParamKind> {
        match self {
            Self::Scalar(s) => Some(s.kind()),
            Self::List(items) => items.first().map(Scalar::kind),
        }
    }

    /// Checks that every scalar in this value is assignable to `kind`.
    pub(crate) fn check_kind(&self, name: &str, kind: ParamKind) -> Result<()> {
        let mismatch = match self {
            Self::Scalar(s) if s.kind() != kind => Some(s.kind()),
            Self::List(items) => items.iter().map(Scalar::kind).find(|k| *k != kind),
            Self::Scalar(_) => None,
        };
        match mismatch {
            Some(found) => Err(Error::TypeMismatch {
                name: name.to_string(),
                expected: kind,
                found,
            }),
            None => Ok(()),
        }
    }
}

impl From<Scalar> for ParamValue {
    fn from(v: Scalar) -> Self {
        Self::Scalar(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Scalar(v.into())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Scalar(v.into())
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Scalar(v.into())
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Scalar(v.into())
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Scalar(v.into())
    }
}

impl From<Vec<u8>> for ParamValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Scalar(v.into())
    }
}

impl From<Vec<Scalar>> for ParamValue {
    fn from(items: Vec<Scalar>) -> Self {
        Self::List(items)
    }
}

/// A named, typed parameter.
///
/// The value, when present, is guaranteed assignable to the declared
/// kind: [`Param::set_value`] rejects anything else with
/// [`Error::TypeMismatch`].
///
/// # Examples
///
/// ```
/// use votask::{Param, ParamKind};
///
/// let mut p = Param::new("verbose", ParamKind::Bool, "Verbose output?");
/// p.set_value(true).unwrap();
/// assert!(p.set_value("yes").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    name: String,
    kind: ParamKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encoding: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<ParamValue>,
}

impl Param {
    /// Creates a parameter with no value.
    pub fn new(name: impl Into<String>, kind: ParamKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            encoding: None,
            description: description.into(),
            value: None,
        }
    }

    /// The parameter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared kind.
    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    /// The mime encoding of the value, if any. Meaningful mainly for
    /// blob parameters.
    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    /// Sets the mime encoding of the value.
    pub fn set_encoding(&mut self, encoding: impl Into<String>) {
        self.encoding = Some(encoding.into());
    }

    /// The parameter description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The current value, if set.
    pub fn value(&self) -> Option<&ParamValue> {
        self.value.as_ref()
    }

    /// Sets the value, checking it against the declared kind.
    ///
    /// # Errors
    ///
    /// [`Error::TypeMismatch`] if any scalar in the value is not
    /// assignable to the declared kind.
    pub fn set_value(&mut self, value: impl Into<ParamValue>) -> Result<()> {
        let value = value.into();
        value.check_kind(&self.name, self.kind)?;
        self.value = Some(value);
        Ok(())
    }

    /// Clears the value.
    pub fn clear_value(&mut self) {
        self.value = None;
    }

    /// Checks the invariant that the stored value (if any) is
    /// assignable to the declared kind. Always true for values that
    /// went through [`set_value`](Self::set_value); deserialized
    /// parameters are validated with this before dispatch.
    pub fn validate(&self) -> Result<()> {
        match &self.value {
            Some(v) => v.check_kind(&self.name, self.kind),
            None => Ok(()),
        }
    }

    /// The parameter attributes as a field-name keyed map.
    pub fn attrs(&self) -> BTreeMap<&'static str, String> {
        let mut attrs = BTreeMap::new();
        attrs.insert("name", self.name.clone());
        attrs.insert("kind", self.kind.to_string());
        attrs.insert("description", self.description.clone());
        if let Some(encoding) = &self.encoding {
            attrs.insert("encoding", encoding.clone());
        }
        attrs
    }
}

mod blob_bytes {
    //! Base64 (standard alphabet) serde for blob payloads.

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
