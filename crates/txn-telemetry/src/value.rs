use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Attribute value types carried on the wire.
///
/// The representation is decided once, when a value is assigned, through the
/// `From` conversions below. Nothing downstream inspects runtime types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl AttributeValue {
    /// Converts anything displayable into a string value.
    ///
    /// This is the fallback for kinds with no dedicated conversion.
    pub fn from_display<T: fmt::Display + ?Sized>(value: &T) -> Self {
        Self::String(value.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Double(d) => write!(f, "{d}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<&String> for AttributeValue {
    fn from(value: &String) -> Self {
        Self::String(value.clone())
    }
}

impl From<Arc<str>> for AttributeValue {
    fn from(value: Arc<str>) -> Self {
        Self::String(value.as_ref().to_owned())
    }
}

impl From<char> for AttributeValue {
    fn from(value: char) -> Self {
        Self::String(value.to_string())
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

macro_rules! impl_from_widening_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for AttributeValue {
                fn from(value: $t) -> Self {
                    Self::Int(i64::from(value))
                }
            }
        )*
    };
}

impl_from_widening_int!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! impl_from_saturating_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for AttributeValue {
                fn from(value: $t) -> Self {
                    Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
                }
            }
        )*
    };
}

// Only values above i64::MAX fail the conversion
impl_from_saturating_int!(u64, usize, u128);

impl From<isize> for AttributeValue {
    fn from(value: isize) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f32> for AttributeValue {
    fn from(value: f32) -> Self {
        Self::Double(f64::from(value))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<Duration> for AttributeValue {
    fn from(value: Duration) -> Self {
        Self::Double(value.as_secs_f64())
    }
}

/// ISO-8601 round-trip form: seconds, 7 fractional digits (100ns ticks),
/// explicit offset.
impl From<DateTime<FixedOffset>> for AttributeValue {
    fn from(value: DateTime<FixedOffset>) -> Self {
        // Leap seconds report up to 1_999_999_999 nanos
        let ticks = (value.timestamp_subsec_nanos() / 100).min(9_999_999);
        Self::String(format!(
            "{}.{ticks:07}{}",
            value.format("%Y-%m-%dT%H:%M:%S"),
            value.format("%:z")
        ))
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::from(DateTime::<FixedOffset>::from(value))
    }
}

/// Deferred attribute value: a zero-argument function plus a memo cell.
///
/// The function runs at most once, the first time the value is forced.
/// Clones share the memo cell.
#[derive(Clone)]
pub struct LazyValue(Arc<LazyInner>);

struct LazyInner {
    cell: OnceLock<Option<AttributeValue>>,
    init: Box<dyn Fn() -> Option<AttributeValue> + Send + Sync>,
}

impl LazyValue {
    /// Creates a deferred value. The function may yield no value.
    pub fn new<F>(init: F) -> Self
    where
        F: Fn() -> Option<AttributeValue> + Send + Sync + 'static,
    {
        Self(Arc::new(LazyInner {
            cell: OnceLock::new(),
            init: Box::new(init),
        }))
    }

    /// Creates a deferred value from a function that always yields one.
    pub fn from_fn<F, V>(init: F) -> Self
    where
        F: Fn() -> V + Send + Sync + 'static,
        V: Into<AttributeValue>,
    {
        Self::new(move || Some(init().into()))
    }

    /// Forces evaluation (once) and returns the result.
    pub fn force(&self) -> Option<&AttributeValue> {
        self.0.cell.get_or_init(|| (self.0.init)()).as_ref()
    }

    /// Returns the value if it has already been forced.
    pub fn get(&self) -> Option<&AttributeValue> {
        self.0.cell.get().and_then(Option::as_ref)
    }

    pub fn is_forced(&self) -> bool {
        self.0.cell.get().is_some()
    }
}

impl fmt::Debug for LazyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.cell.get() {
            Some(value) => f.debug_tuple("LazyValue").field(value).finish(),
            None => f.write_str("LazyValue(<pending>)"),
        }
    }
}
