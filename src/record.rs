//! Typed, versioned values stored per variable.
//!
//! A [`Record`] couples a [`Value`] payload with the logical clock and quality
//! used to arbitrate concurrent updates from different agents. Array, text and
//! binary payloads live behind an `Arc`, so copying a record is cheap and the
//! buffer is only duplicated when one of the copies is written
//! (copy-on-write through `Arc::make_mut`).

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Rem, Sub};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a record inside a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Never written.
    #[default]
    Uncreated,
    /// Holds a value that has not changed since the last drain of modifications.
    Unmodified,
    /// Changed since the last drain of modifications.
    Modified,
}

/// Type tag of a record payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Double,
    /// Array of integers.
    IntegerArray,
    /// Array of doubles.
    DoubleArray,
    /// UTF-8 text.
    String,
    /// Opaque bytes.
    Binary,
}

impl RecordKind {
    /// Returns true for the two numeric array kinds.
    #[must_use]
    pub const fn is_array(self) -> bool {
        matches!(self, Self::IntegerArray | Self::DoubleArray)
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Double => "double",
            Self::IntegerArray => "integer_array",
            Self::DoubleArray => "double_array",
            Self::String => "string",
            Self::Binary => "binary",
        }
    }
}

/// Payload of a record.
///
/// Scalars are stored inline; everything else is shared until written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// See [`RecordKind::Integer`].
    Integer(i64),
    /// See [`RecordKind::Double`].
    Double(f64),
    /// See [`RecordKind::IntegerArray`].
    IntegerArray(Arc<Vec<i64>>),
    /// See [`RecordKind::DoubleArray`].
    DoubleArray(Arc<Vec<f64>>),
    /// See [`RecordKind::String`].
    String(Arc<String>),
    /// See [`RecordKind::Binary`].
    Binary(Arc<Vec<u8>>),
}

impl Value {
    /// Returns the type tag of this payload.
    #[must_use]
    pub const fn kind(&self) -> RecordKind {
        match self {
            Self::Integer(_) => RecordKind::Integer,
            Self::Double(_) => RecordKind::Double,
            Self::IntegerArray(_) => RecordKind::IntegerArray,
            Self::DoubleArray(_) => RecordKind::DoubleArray,
            Self::String(_) => RecordKind::String,
            Self::Binary(_) => RecordKind::Binary,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Integer(0)
    }
}

/// Scalar view of a record used for arithmetic and comparison.
#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Double(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Double(v) => v,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Self::Int(v) => Value::Integer(v),
            Self::Double(v) => Value::Double(v),
        }
    }
}

fn parse_number(text: &str) -> Number {
    let text = text.trim();
    if let Ok(v) = text.parse::<i64>() {
        return Number::Int(v);
    }
    match text.parse::<f64>() {
        Ok(v) => Number::Double(v),
        Err(_) => Number::Int(0),
    }
}

fn split_elements(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
}

/// A typed, versioned value.
///
/// The default record is the integer `0` with status [`RecordStatus::Uncreated`],
/// which is what reading a missing variable yields.
///
/// # Examples
///
/// ```
/// use karl::Record;
///
/// let r = Record::from(vec![1i64, 2, 3]);
/// assert!(r.is_true());
/// assert_eq!(r.to_integer(), 1);
/// assert_eq!(r.to_string(), "1, 2, 3");
/// assert!(Record::from(vec![1i64, 0]).is_false());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Record {
    value: Value,
    clock: u64,
    quality: u32,
    status: RecordStatus,
}

impl Record {
    /// Creates an unstamped record holding `value`.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            value,
            clock: 0,
            quality: 0,
            status: RecordStatus::Unmodified,
        }
    }

    /// Creates an integer record.
    #[must_use]
    pub fn integer(v: i64) -> Self {
        Self::new(Value::Integer(v))
    }

    /// Creates a double record.
    #[must_use]
    pub fn double(v: f64) -> Self {
        Self::new(Value::Double(v))
    }

    /// Creates a text record.
    #[must_use]
    pub fn string(v: impl Into<String>) -> Self {
        Self::new(Value::String(Arc::new(v.into())))
    }

    /// Creates an opaque binary record.
    #[must_use]
    pub fn binary(v: impl Into<Vec<u8>>) -> Self {
        Self::new(Value::Binary(Arc::new(v.into())))
    }

    /// Creates the integer `1` or `0`.
    #[must_use]
    pub fn from_bool(v: bool) -> Self {
        Self::integer(i64::from(v))
    }

    /// Returns this record with the given logical clock.
    #[must_use]
    pub fn with_clock(mut self, clock: u64) -> Self {
        self.clock = clock;
        self
    }

    /// Returns this record with the given writer quality.
    #[must_use]
    pub fn with_quality(mut self, quality: u32) -> Self {
        self.quality = quality;
        self
    }

    /// The payload.
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    /// Type tag of the payload.
    #[must_use]
    pub const fn kind(&self) -> RecordKind {
        self.value.kind()
    }

    /// Name of the payload kind, as returned by `#type`.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.value.kind().name()
    }

    /// The context's Lamport clock.
    #[must_use]
    pub const fn clock(&self) -> u64 {
        self.clock
    }

    /// Quality of the writer that produced this value.
    #[must_use]
    pub const fn quality(&self) -> u32 {
        self.quality
    }

    /// Lifecycle status.
    #[must_use]
    pub const fn status(&self) -> RecordStatus {
        self.status
    }

    /// Returns true once the record has been written at least once.
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.status != RecordStatus::Uncreated
    }

    /// Returns true for integer or double arrays.
    #[must_use]
    pub const fn is_array(&self) -> bool {
        self.value.kind().is_array()
    }

    /// Returns true for strings.
    #[must_use]
    pub const fn is_string(&self) -> bool {
        matches!(self.value, Value::String(_))
    }

    /// Returns true for binary payloads.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self.value, Value::Binary(_))
    }

    /// Returns true for doubles and double arrays.
    #[must_use]
    pub const fn is_double(&self) -> bool {
        matches!(self.value, Value::Double(_) | Value::DoubleArray(_))
    }

    pub(crate) fn set_clock(&mut self, clock: u64) {
        self.clock = clock;
    }

    pub(crate) fn set_quality(&mut self, quality: u32) {
        self.quality = quality;
    }

    pub(crate) fn set_status(&mut self, status: RecordStatus) {
        self.status = status;
    }

    fn number(&self) -> Number {
        match &self.value {
            Value::Integer(v) => Number::Int(*v),
            Value::Double(v) => Number::Double(*v),
            Value::IntegerArray(a) => Number::Int(a.first().copied().unwrap_or(0)),
            Value::DoubleArray(a) => Number::Double(a.first().copied().unwrap_or(0.0)),
            Value::String(s) => parse_number(s),
            Value::Binary(_) => Number::Int(0),
        }
    }

    /// Integer coercion. Arrays yield their first element, text is parsed,
    /// anything unparseable is `0`.
    #[must_use]
    pub fn to_integer(&self) -> i64 {
        match self.number() {
            Number::Int(v) => v,
            #[allow(clippy::cast_possible_truncation)]
            Number::Double(v) => v as i64,
        }
    }

    /// Double coercion with the same rules as [`Record::to_integer`].
    #[must_use]
    pub fn to_double(&self) -> f64 {
        self.number().as_f64()
    }

    /// Converts to an integer vector. Scalars become a one-element vector,
    /// text is split on commas and whitespace, UNCREATED is empty.
    #[must_use]
    pub fn to_integers(&self) -> Vec<i64> {
        if !self.is_created() {
            return Vec::new();
        }
        match &self.value {
            Value::Integer(v) => vec![*v],
            #[allow(clippy::cast_possible_truncation)]
            Value::Double(v) => vec![*v as i64],
            Value::IntegerArray(a) => a.as_ref().clone(),
            #[allow(clippy::cast_possible_truncation)]
            Value::DoubleArray(a) => a.iter().map(|v| *v as i64).collect(),
            Value::String(s) => split_elements(s)
                .map(|part| Record::string(part).to_integer())
                .collect(),
            Value::Binary(b) => b.iter().map(|v| i64::from(*v)).collect(),
        }
    }

    /// Converts to a double vector with the rules of [`Record::to_integers`].
    #[must_use]
    pub fn to_doubles(&self) -> Vec<f64> {
        if !self.is_created() {
            return Vec::new();
        }
        match &self.value {
            Value::Integer(v) => vec![*v as f64],
            Value::Double(v) => vec![*v],
            Value::IntegerArray(a) => a.iter().map(|v| *v as f64).collect(),
            Value::DoubleArray(a) => a.as_ref().clone(),
            Value::String(s) => split_elements(s).map(|part| parse_number(part).as_f64()).collect(),
            Value::Binary(b) => b.iter().map(|v| f64::from(*v)).collect(),
        }
    }

    /// Text coercion; array elements are joined with `delimiter`. An
    /// UNCREATED record is the empty string.
    #[must_use]
    pub fn to_string_with(&self, delimiter: &str) -> String {
        if !self.is_created() {
            return String::new();
        }
        match &self.value {
            Value::Integer(v) => v.to_string(),
            Value::Double(v) => v.to_string(),
            Value::IntegerArray(a) => join(a.iter(), delimiter),
            Value::DoubleArray(a) => join(a.iter(), delimiter),
            Value::String(s) => s.as_ref().clone(),
            Value::Binary(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    /// Truthiness. Arrays are true only when non-empty and every element is
    /// non-zero; text and binary are true when non-empty.
    #[must_use]
    pub fn is_true(&self) -> bool {
        match &self.value {
            Value::Integer(v) => *v != 0,
            Value::Double(v) => *v != 0.0,
            Value::IntegerArray(a) => !a.is_empty() && a.iter().all(|v| *v != 0),
            Value::DoubleArray(a) => !a.is_empty() && a.iter().all(|v| *v != 0.0),
            Value::String(s) => !s.is_empty(),
            Value::Binary(b) => !b.is_empty(),
        }
    }

    /// Negation of [`Record::is_true`].
    #[must_use]
    pub fn is_false(&self) -> bool {
        !self.is_true()
    }

    /// Number of elements: array length, byte length of text or binary,
    /// `1` for a scalar and `0` for an UNCREATED record.
    #[must_use]
    pub fn size(&self) -> usize {
        if !self.is_created() {
            return 0;
        }
        match &self.value {
            Value::Integer(_) | Value::Double(_) => 1,
            Value::IntegerArray(a) => a.len(),
            Value::DoubleArray(a) => a.len(),
            Value::String(s) => s.len(),
            Value::Binary(b) => b.len(),
        }
    }

    /// Reads one array element. Non-arrays and out-of-bounds indices yield an
    /// UNCREATED record.
    #[must_use]
    pub fn retrieve_index(&self, index: usize) -> Record {
        match &self.value {
            Value::IntegerArray(a) => a.get(index).map_or_else(Record::default, |v| Record::integer(*v)),
            Value::DoubleArray(a) => a.get(index).map_or_else(Record::default, |v| Record::double(*v)),
            _ => Record::default(),
        }
    }

    /// Writes one array element, growing the buffer with zeros as needed.
    ///
    /// A non-array record is replaced by an array of the element's type. An
    /// integer array receiving a double is promoted to a double array.
    /// Returns false, leaving the record untouched, when the buffer cannot
    /// grow to `index + 1` elements.
    #[must_use]
    pub fn set_index(&mut self, index: usize, element: &Record) -> bool {
        let Some(len) = index.checked_add(1) else {
            return false;
        };
        let element_is_double = matches!(element.number(), Number::Double(_));
        let replacement = match &mut self.value {
            Value::DoubleArray(a) => {
                if !reserve_for(a, len) {
                    return false;
                }
                let a = Arc::make_mut(a);
                if a.len() < len {
                    a.resize(len, 0.0);
                }
                a[index] = element.to_double();
                None
            }
            Value::IntegerArray(a) if !element_is_double => {
                if !reserve_for(a, len) {
                    return false;
                }
                let a = Arc::make_mut(a);
                if a.len() < len {
                    a.resize(len, 0);
                }
                a[index] = element.to_integer();
                None
            }
            Value::IntegerArray(a) => {
                let mut promoted = Vec::new();
                if promoted.try_reserve_exact(len.max(a.len())).is_err() {
                    return false;
                }
                promoted.extend(a.iter().map(|v| *v as f64));
                if promoted.len() < len {
                    promoted.resize(len, 0.0);
                }
                promoted[index] = element.to_double();
                Some(Value::DoubleArray(Arc::new(promoted)))
            }
            _ if element_is_double => {
                let Some(mut fresh) = zeroed(len, 0.0) else {
                    return false;
                };
                fresh[index] = element.to_double();
                Some(Value::DoubleArray(Arc::new(fresh)))
            }
            _ => {
                let Some(mut fresh) = zeroed(len, 0) else {
                    return false;
                };
                fresh[index] = element.to_integer();
                Some(Value::IntegerArray(Arc::new(fresh)))
            }
        };
        if let Some(value) = replacement {
            self.value = value;
        }
        true
    }

    /// Inclusive slice `[first, last]` of text, arrays or binary. Scalars are
    /// returned unchanged.
    #[must_use]
    pub fn fragment(&self, first: usize, last: usize) -> Record {
        let take = if last < first { 0 } else { last - first + 1 };
        match &self.value {
            Value::String(s) => Record::string(s.chars().skip(first).take(take).collect::<String>()),
            Value::IntegerArray(a) => Record::from(a.iter().skip(first).take(take).copied().collect::<Vec<_>>()),
            Value::DoubleArray(a) => Record::from(a.iter().skip(first).take(take).copied().collect::<Vec<_>>()),
            Value::Binary(b) => Record::binary(b.iter().skip(first).take(take).copied().collect::<Vec<_>>()),
            Value::Integer(_) | Value::Double(_) => self.clone(),
        }
    }

    /// Copies the record with unshared buffers.
    #[must_use]
    pub fn deep_copy(&self) -> Record {
        let value = match &self.value {
            Value::IntegerArray(a) => Value::IntegerArray(Arc::new(a.as_ref().clone())),
            Value::DoubleArray(a) => Value::DoubleArray(Arc::new(a.as_ref().clone())),
            Value::String(s) => Value::String(Arc::new(s.as_ref().clone())),
            Value::Binary(b) => Value::Binary(Arc::new(b.as_ref().clone())),
            scalar => scalar.clone(),
        };
        Record {
            value,
            ..*self
        }
    }

    /// Appends the text form of `other` to the text form of `self`.
    #[must_use]
    pub fn concat(&self, other: &Record) -> Record {
        let mut text = self.to_string();
        text.push_str(&other.to_string());
        Record::string(text)
    }

    /// Orders two records: text against text lexicographically, arrays
    /// against arrays element by element, everything else numerically with
    /// integer to double promotion.
    #[must_use]
    pub fn compare(&self, other: &Record) -> Option<Ordering> {
        match (&self.value, &other.value) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::IntegerArray(a), Value::IntegerArray(b)) => Some(a.cmp(b)),
            (Value::IntegerArray(_) | Value::DoubleArray(_), Value::IntegerArray(_) | Value::DoubleArray(_)) => {
                self.to_doubles().partial_cmp(&other.to_doubles())
            }
            _ => match (self.number(), other.number()) {
                (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
                (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
            },
        }
    }

    /// Value equality under [`Record::compare`] semantics.
    #[must_use]
    pub fn equals(&self, other: &Record) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// Last-writer-wins arbitration: higher quality wins, equal quality falls
    /// back to the newer (or equal) clock.
    #[must_use]
    pub fn supersedes(&self, other: &Record) -> bool {
        match self.quality.cmp(&other.quality) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.clock >= other.clock,
        }
    }

    /// Renders the payload as KaRL source text that compiles back to an equal
    /// value. Binary payloads have no literal form and render as an empty string.
    #[must_use]
    pub fn to_karl_source(&self) -> String {
        match &self.value {
            Value::Integer(v) if *v == i64::MIN => format!("({} - 1)", i64::MIN + 1),
            Value::Integer(v) => v.to_string(),
            Value::Double(v) => double_source(*v),
            Value::IntegerArray(a) => format!("[{}]", join(a.iter(), ", ")),
            Value::DoubleArray(a) if a.is_empty() => "#to_doubles([])".to_string(),
            Value::DoubleArray(a) if a.iter().all(|v| v.is_finite()) => {
                let parts: Vec<String> = a.iter().map(|v| format!("{v:?}")).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::DoubleArray(a) => format!("#to_doubles(\"{}\")", join(a.iter(), ", ")),
            Value::String(s) => quote(s),
            Value::Binary(_) => "\"\"".to_string(),
        }
    }
}

fn join<T: fmt::Display>(items: impl Iterator<Item = T>, delimiter: &str) -> String {
    let parts: Vec<String> = items.map(|v| v.to_string()).collect();
    parts.join(delimiter)
}

fn double_source(v: f64) -> String {
    if v.is_finite() {
        format!("{v:?}")
    } else {
        format!("#to_double(\"{v}\")")
    }
}

/// Quotes text as a KaRL string literal.
pub(crate) fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with(", "))
    }
}

fn arithmetic(
    lhs: &Record,
    rhs: &Record,
    int_op: fn(i64, i64) -> Option<i64>,
    double_op: fn(f64, f64) -> f64,
) -> Record {
    let number = match (lhs.number(), rhs.number()) {
        (Number::Int(a), Number::Int(b)) => Number::Int(int_op(a, b).unwrap_or(0)),
        (a, b) => Number::Double(double_op(a.as_f64(), b.as_f64())),
    };
    Record::new(number.into_value())
}

impl Add for &Record {
    type Output = Record;

    fn add(self, rhs: &Record) -> Record {
        arithmetic(self, rhs, |a, b| Some(a.wrapping_add(b)), |a, b| a + b)
    }
}

impl Sub for &Record {
    type Output = Record;

    fn sub(self, rhs: &Record) -> Record {
        arithmetic(self, rhs, |a, b| Some(a.wrapping_sub(b)), |a, b| a - b)
    }
}

impl Mul for &Record {
    type Output = Record;

    fn mul(self, rhs: &Record) -> Record {
        arithmetic(self, rhs, |a, b| Some(a.wrapping_mul(b)), |a, b| a * b)
    }
}

// Integer division and remainder by zero yield 0.
impl Div for &Record {
    type Output = Record;

    fn div(self, rhs: &Record) -> Record {
        arithmetic(self, rhs, i64::checked_div, |a, b| a / b)
    }
}

impl Rem for &Record {
    type Output = Record;

    fn rem(self, rhs: &Record) -> Record {
        arithmetic(self, rhs, i64::checked_rem, |a, b| a % b)
    }
}

impl Neg for &Record {
    type Output = Record;

    fn neg(self) -> Record {
        let number = match self.number() {
            Number::Int(v) => Number::Int(v.wrapping_neg()),
            Number::Double(v) => Number::Double(-v),
        };
        Record::new(number.into_value())
    }
}

impl From<Value> for Record {
    fn from(v: Value) -> Self {
        Self::new(v)
    }
}

impl From<bool> for Record {
    fn from(v: bool) -> Self {
        Self::from_bool(v)
    }
}

impl From<i32> for Record {
    fn from(v: i32) -> Self {
        Self::integer(i64::from(v))
    }
}

impl From<i64> for Record {
    fn from(v: i64) -> Self {
        Self::integer(v)
    }
}

impl From<u32> for Record {
    fn from(v: u32) -> Self {
        Self::integer(i64::from(v))
    }
}

impl From<f64> for Record {
    fn from(v: f64) -> Self {
        Self::double(v)
    }
}

impl From<&str> for Record {
    fn from(v: &str) -> Self {
        Self::string(v)
    }
}

impl From<String> for Record {
    fn from(v: String) -> Self {
        Self::string(v)
    }
}

impl From<Vec<i64>> for Record {
    fn from(v: Vec<i64>) -> Self {
        Self::new(Value::IntegerArray(Arc::new(v)))
    }
}

impl From<&[i64]> for Record {
    fn from(v: &[i64]) -> Self {
        Self::from(v.to_vec())
    }
}

impl From<Vec<f64>> for Record {
    fn from(v: Vec<f64>) -> Self {
        Self::new(Value::DoubleArray(Arc::new(v)))
    }
}

impl From<&[f64]> for Record {
    fn from(v: &[f64]) -> Self {
        Self::from(v.to_vec())
    }
}

impl From<Vec<u8>> for Record {
    fn from(v: Vec<u8>) -> Self {
        Self::binary(v)
    }
}

/// Reserves room for `len` elements in a shared buffer before it is cloned or resized.
fn reserve_for<T: Clone>(buffer: &mut Arc<Vec<T>>, len: usize) -> bool {
    let have = buffer.len();
    if have >= len {
        return true;
    }
    Arc::make_mut(buffer).try_reserve_exact(len - have).is_ok()
}

fn zeroed<T: Clone>(len: usize, zero: T) -> Option<Vec<T>> {
    let mut fresh = Vec::new();
    fresh.try_reserve_exact(len).ok()?;
    fresh.resize(len, zero);
    Some(fresh)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_uncreated_zero() {
        let r = Record::default();
        assert_eq!(r.status(), RecordStatus::Uncreated);
        assert!(!r.is_created());
        assert_eq!(r.to_integer(), 0);
        assert_eq!(r.to_double(), 0.0);
        assert_eq!(r.to_string(), "");
        assert_eq!(r.size(), 0);
        assert!(r.is_false());
    }

    #[test]
    fn test_scalar_coercions() {
        assert_eq!(Record::double(3.9).to_integer(), 3);
        assert_eq!(Record::integer(7).to_double(), 7.0);
        assert_eq!(Record::string(" 42 ").to_integer(), 42);
        assert_eq!(Record::string("2.5").to_double(), 2.5);
        assert_eq!(Record::string("2.5").to_integer(), 2);
        assert_eq!(Record::string("abc").to_integer(), 0);
        assert_eq!(Record::binary(vec![1u8, 2]).to_integer(), 0);
        assert_eq!(Record::from(vec![9i64, 8]).to_integer(), 9);
        assert_eq!(Record::from(Vec::<f64>::new()).to_double(), 0.0);
    }

    #[test]
    fn test_to_string_forms() {
        assert_eq!(Record::double(2.5).to_string(), "2.5");
        assert_eq!(Record::from(vec![1.5, 2.0]).to_string_with(";"), "1.5;2");
        assert_eq!(Record::string("hi").to_string(), "hi");
    }

    #[test]
    fn test_array_truthiness() {
        assert!(Record::from(vec![1i64, 2, 3]).is_true());
        assert!(Record::from(vec![1i64, 0, 3]).is_false());
        assert!(Record::from(Vec::<i64>::new()).is_false());
        assert!(Record::from(vec![0.5, 1.0]).is_true());
        assert!(Record::from(vec![0.5, 0.0]).is_false());
    }

    #[test]
    fn test_scalar_truthiness() {
        assert!(Record::integer(-1).is_true());
        assert!(Record::double(0.0).is_false());
        assert!(Record::string("").is_false());
        assert!(Record::string("x").is_true());
    }

    #[test]
    fn test_retrieve_index_out_of_bounds() {
        let r = Record::from(vec![1i64, 2]);
        assert_eq!(r.retrieve_index(1).to_integer(), 2);
        assert!(!r.retrieve_index(5).is_created());
        assert!(!Record::integer(5).retrieve_index(0).is_created());
    }

    #[test]
    fn test_set_index_grows_and_promotes() {
        let mut r = Record::default();
        assert!(r.set_index(2, &Record::integer(7)));
        assert_eq!(r.kind(), RecordKind::IntegerArray);
        assert_eq!(r.to_integers(), vec![0, 0, 7]);

        assert!(r.set_index(0, &Record::double(1.5)));
        assert_eq!(r.kind(), RecordKind::DoubleArray);
        assert_eq!(r.to_doubles(), vec![1.5, 0.0, 7.0]);

        assert!(r.set_index(4, &Record::integer(2)));
        assert_eq!(r.size(), 5);
    }

    #[test]
    fn test_set_index_refuses_impossible_growth() {
        let mut r = Record::from(vec![1i64, 2]);
        assert!(!r.set_index(usize::MAX, &Record::integer(1)));
        assert!(!r.set_index(1 << 62, &Record::integer(1)));
        assert!(!r.set_index(1 << 62, &Record::double(0.5)));
        assert_eq!(r.to_integers(), vec![1, 2]);

        let mut empty = Record::default();
        assert!(!empty.set_index(1 << 62, &Record::integer(1)));
        assert!(!empty.is_created());
    }

    #[test]
    fn test_copy_on_write() {
        let original = Record::from(vec![1i64, 2, 3]);
        let mut copy = original.clone();
        if let (Value::IntegerArray(a), Value::IntegerArray(b)) = (original.value(), copy.value()) {
            assert!(Arc::ptr_eq(a, b));
        }
        assert!(copy.set_index(0, &Record::integer(10)));
        assert_eq!(original.to_integers(), vec![1, 2, 3]);
        assert_eq!(copy.to_integers(), vec![10, 2, 3]);
    }

    #[test]
    fn test_deep_copy_unshares() {
        let original = Record::string("text").with_clock(4);
        let copy = original.deep_copy();
        if let (Value::String(a), Value::String(b)) = (original.value(), copy.value()) {
            assert!(!Arc::ptr_eq(a, b));
        }
        assert_eq!(copy.clock(), 4);
        assert!(copy.equals(&original));
    }

    #[test]
    fn test_arithmetic_promotion() {
        let sum = &Record::integer(2) + &Record::double(0.5);
        assert_eq!(sum.kind(), RecordKind::Double);
        assert_eq!(sum.to_double(), 2.5);

        let product = &Record::integer(3) * &Record::integer(4);
        assert_eq!(product.kind(), RecordKind::Integer);
        assert_eq!(product.to_integer(), 12);

        assert_eq!((&Record::integer(7) / &Record::integer(2)).to_integer(), 3);
        assert_eq!((&Record::integer(7) % &Record::integer(4)).to_integer(), 3);
        assert_eq!((&Record::integer(7) / &Record::integer(0)).to_integer(), 0);
        assert_eq!((-&Record::double(1.5)).to_double(), -1.5);
    }

    #[test]
    fn test_strings_do_not_concatenate_arithmetically() {
        let sum = &Record::string("2") + &Record::string("3");
        assert_eq!(sum.to_integer(), 5);
        assert_eq!(Record::string("ab").concat(&Record::integer(1)).to_string(), "ab1");
    }

    #[test]
    fn test_compare() {
        assert_eq!(Record::integer(1).compare(&Record::double(1.0)), Some(Ordering::Equal));
        assert_eq!(Record::string("a").compare(&Record::string("b")), Some(Ordering::Less));
        assert_eq!(
            Record::from(vec![1i64, 2]).compare(&Record::from(vec![1.0, 3.0])),
            Some(Ordering::Less)
        );
        assert!(Record::double(f64::NAN).compare(&Record::integer(0)).is_none());
    }

    #[test]
    fn test_supersedes() {
        let low = Record::integer(1).with_quality(1).with_clock(10);
        let high = Record::integer(2).with_quality(2).with_clock(1);
        assert!(high.supersedes(&low));
        assert!(!low.supersedes(&high));

        let newer = Record::integer(3).with_quality(1).with_clock(11);
        assert!(newer.supersedes(&low));
        assert!(!low.supersedes(&newer));
    }

    #[test]
    fn test_fragment() {
        assert_eq!(Record::string("hello").fragment(1, 3).to_string(), "ell");
        assert_eq!(Record::from(vec![1i64, 2, 3, 4]).fragment(2, 9).to_integers(), vec![3, 4]);
        assert_eq!(Record::string("hello").fragment(3, 1).to_string(), "");
    }

    #[test]
    fn test_karl_source_forms() {
        assert_eq!(Record::integer(-5).to_karl_source(), "-5");
        assert_eq!(Record::double(2.0).to_karl_source(), "2.0");
        assert_eq!(Record::from(vec![1.0, 2.5]).to_karl_source(), "[1.0, 2.5]");
        assert_eq!(Record::string("a\"b").to_karl_source(), "\"a\\\"b\"");
    }

    #[test]
    fn test_string_to_arrays() {
        assert_eq!(Record::string("1, 2 3").to_integers(), vec![1, 2, 3]);
        assert_eq!(Record::string("1.5,inf").to_doubles()[0], 1.5);
        assert!(Record::string("1.5,inf").to_doubles()[1].is_infinite());
    }

    #[test]
    fn test_serialization() {
        let r = Record::from(vec![1i64, 2]).with_clock(3).with_quality(2);
        let json = serde_json::to_string(&r).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert!(back.equals(&r));
        assert_eq!(back.clock(), 3);
        assert_eq!(back.quality(), 2);
    }
}
