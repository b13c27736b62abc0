use std::{fmt::Display, ops::Add};

use chrono::{DateTime, TimeZone, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::op;

const NEVER: &str = "never";

//--------------------------------------      Timestamp       ---------------------------------------------------------
/// An absolute point in time with millisecond resolution. `Timestamp::never()` is the far future; `Timestamp::zero()`
/// is used for "no deadline" fields such as a contract without refunds.
///
/// On the wire a timestamp is `{"t_ms": <millis>}` or `{"t_ms": "never"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn from_millis(ms: i64) -> Self {
        Self(ms.max(0))
    }

    pub fn millis(&self) -> i64 {
        self.0
    }

    /// The current time, rounded down to whole seconds.
    pub fn now() -> Self {
        Self(Utc::now().timestamp() * 1000)
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn never() -> Self {
        Self(i64::MAX)
    }

    pub fn is_never(&self) -> bool {
        self.0 == i64::MAX
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn round_to_seconds(self) -> Self {
        if self.is_never() {
            self
        } else {
            Self(self.0 - self.0 % 1000)
        }
    }

    pub fn has_passed(&self) -> bool {
        !self.is_never() && *self < Timestamp::now()
    }

    /// Microseconds since the epoch in big-endian order, the form used inside signed messages.
    pub fn to_be_micros(&self) -> [u8; 8] {
        let micros = if self.is_never() { u64::MAX } else { (self.0 as u64).saturating_mul(1000) };
        micros.to_be_bytes()
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }
}

impl Add<RelativeTime> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: RelativeTime) -> Self::Output {
        if self.is_never() || rhs.is_forever() {
            return Timestamp::never();
        }
        Timestamp(self.0.saturating_add(rhs.0))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_never() {
            return f.write_str(NEVER);
        }
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self::from_millis(value.timestamp_millis())
    }
}

fn serialize_t_ms<S: Serializer>(value: i64, never: bool, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serde_json::Map::new();
    let v = if never { Value::from(NEVER) } else { Value::from(value) };
    map.insert("t_ms".into(), v);
    map.serialize(serializer)
}

fn deserialize_t_ms<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let t_ms = value.get("t_ms").ok_or_else(|| de::Error::missing_field("t_ms"))?;
    match t_ms {
        Value::String(s) if s == NEVER => Ok(None),
        Value::Number(n) => n.as_i64().filter(|v| *v >= 0).map(Some).ok_or_else(|| de::Error::custom("invalid t_ms")),
        _ => Err(de::Error::custom("t_ms must be a non-negative integer or \"never\"")),
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_t_ms(self.0, self.is_never(), serializer)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(deserialize_t_ms(deserializer)?.map(Timestamp).unwrap_or_else(Timestamp::never))
    }
}

//--------------------------------------     RelativeTime     ---------------------------------------------------------
/// A duration with millisecond resolution. `RelativeTime::forever()` never elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, sqlx::Type)]
#[sqlx(transparent)]
pub struct RelativeTime(i64);

op!(binary RelativeTime, Add, add);
op!(binary RelativeTime, Sub, sub);
op!(inplace RelativeTime, AddAssign, add_assign);

impl RelativeTime {
    pub fn from_millis(ms: i64) -> Self {
        Self(ms.max(0))
    }

    pub fn from_secs(secs: i64) -> Self {
        Self::from_millis(secs.saturating_mul(1000))
    }

    pub fn forever() -> Self {
        Self(i64::MAX)
    }

    pub fn is_forever(&self) -> bool {
        self.0 == i64::MAX
    }

    pub fn millis(&self) -> i64 {
        self.0
    }

    pub fn to_std(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.0 as u64)
    }
}

impl Serialize for RelativeTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serde_json::Map::new();
        let v = if self.is_forever() { Value::from("forever") } else { Value::from(self.0) };
        map.insert("d_ms".into(), v);
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RelativeTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value.get("d_ms") {
            Some(Value::String(s)) if s == "forever" => Ok(RelativeTime::forever()),
            Some(Value::Number(n)) => {
                n.as_i64().filter(|v| *v >= 0).map(RelativeTime).ok_or_else(|| de::Error::custom("invalid d_ms"))
            },
            _ => Err(de::Error::missing_field("d_ms")),
        }
    }
}
