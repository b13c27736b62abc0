use std::{cmp::Ordering, fmt::Display, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::{
    database::{HasArguments, HasValueRef},
    encode::IsNull,
    error::BoxDynError,
    Decode,
    Encode,
    Sqlite,
    Type,
};
use thiserror::Error;

/// Number of fractional units in one unit of currency.
pub const FRACTION_BASE: u32 = 100_000_000;
/// Number of decimal digits the fraction may carry.
pub const FRACTION_DIGITS: usize = 8;
/// Largest permitted integer value of an amount (2^52, so that amounts survive a round-trip through a double).
pub const MAX_AMOUNT_VALUE: u64 = 1 << 52;
/// Length of the zero-padded currency field in the binary form of an amount.
pub const CURRENCY_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("Amount string is malformed: {0}")]
    Malformed(String),
    #[error("Currency mismatch: {0} vs {1}")]
    CurrencyMismatch(String, String),
    #[error("Amount overflow")]
    Overflow,
    #[error("Amount would become negative")]
    Negative,
}

//--------------------------------------        Amount        ---------------------------------------------------------
/// A monetary amount of the form `CUR:value.fraction`, e.g. `EUR:5.01`.
///
/// Amounts of different currencies cannot be combined; every arithmetic operation is checked and returns an
/// [`AmountError`] rather than silently wrapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Amount {
    currency: String,
    value: u64,
    fraction: u32,
}

impl Amount {
    pub fn new(currency: &str, value: u64, fraction: u32) -> Result<Self, AmountError> {
        check_currency(currency)?;
        let extra = u64::from(fraction / FRACTION_BASE);
        let value = value.checked_add(extra).ok_or(AmountError::Overflow)?;
        if value > MAX_AMOUNT_VALUE {
            return Err(AmountError::Overflow);
        }
        Ok(Self { currency: currency.to_string(), value, fraction: fraction % FRACTION_BASE })
    }

    pub fn zero(currency: &str) -> Self {
        Self { currency: currency.to_string(), value: 0, fraction: 0 }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn fraction(&self) -> u32 {
        self.fraction
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0 && self.fraction == 0
    }

    pub fn same_currency(&self, other: &Amount) -> bool {
        self.currency.eq_ignore_ascii_case(&other.currency)
    }

    fn ensure_same_currency(&self, other: &Amount) -> Result<(), AmountError> {
        if self.same_currency(other) {
            Ok(())
        } else {
            Err(AmountError::CurrencyMismatch(self.currency.clone(), other.currency.clone()))
        }
    }

    /// The amount expressed in fractional units.
    fn units(&self) -> u128 {
        u128::from(self.value) * u128::from(FRACTION_BASE) + u128::from(self.fraction)
    }

    fn from_units(currency: &str, units: u128) -> Result<Self, AmountError> {
        let value = u64::try_from(units / u128::from(FRACTION_BASE)).map_err(|_| AmountError::Overflow)?;
        #[allow(clippy::cast_possible_truncation)]
        let fraction = (units % u128::from(FRACTION_BASE)) as u32;
        Self::new(currency, value, fraction)
    }

    pub fn checked_add(&self, other: &Amount) -> Result<Amount, AmountError> {
        self.ensure_same_currency(other)?;
        Self::from_units(&self.currency, self.units() + other.units())
    }

    pub fn checked_sub(&self, other: &Amount) -> Result<Amount, AmountError> {
        self.ensure_same_currency(other)?;
        let units = self.units().checked_sub(other.units()).ok_or(AmountError::Negative)?;
        Self::from_units(&self.currency, units)
    }

    /// Subtracts `other`, bottoming out at zero.
    pub fn saturating_sub(&self, other: &Amount) -> Result<Amount, AmountError> {
        self.ensure_same_currency(other)?;
        Self::from_units(&self.currency, self.units().saturating_sub(other.units()))
    }

    pub fn checked_mul(&self, factor: u64) -> Result<Amount, AmountError> {
        let units = self.units().checked_mul(u128::from(factor)).ok_or(AmountError::Overflow)?;
        Self::from_units(&self.currency, units)
    }

    /// Divides the amount by `divisor`, rounding down to the nearest fractional unit. Dividing by zero returns
    /// the amount unchanged.
    pub fn divide(&self, divisor: u32) -> Amount {
        if divisor == 0 {
            return self.clone();
        }
        let units = self.units() / u128::from(divisor);
        Self::from_units(&self.currency, units).unwrap_or_else(|_| Self::zero(&self.currency))
    }

    pub fn try_cmp(&self, other: &Amount) -> Result<Ordering, AmountError> {
        self.ensure_same_currency(other)?;
        Ok(self.units().cmp(&other.units()))
    }

    pub fn max(self, other: Amount) -> Result<Amount, AmountError> {
        match self.try_cmp(&other)? {
            Ordering::Less => Ok(other),
            _ => Ok(self),
        }
    }

    /// Sums an iterator of amounts, all of which must be in `currency`.
    pub fn sum<'a, I>(currency: &str, amounts: I) -> Result<Amount, AmountError>
    where I: IntoIterator<Item = &'a Amount> {
        amounts.into_iter().try_fold(Amount::zero(currency), |acc, a| acc.checked_add(a))
    }

    /// The binary ("network byte order") form used inside signed messages:
    /// `value: u64be || fraction: u32be || currency: [u8; 12]` (zero padded).
    pub fn to_nbo(&self) -> [u8; 8 + 4 + CURRENCY_LEN] {
        let mut buf = [0u8; 8 + 4 + CURRENCY_LEN];
        buf[..8].copy_from_slice(&self.value.to_be_bytes());
        buf[8..12].copy_from_slice(&self.fraction.to_be_bytes());
        let cur = self.currency.as_bytes();
        let n = cur.len().min(CURRENCY_LEN - 1);
        buf[12..12 + n].copy_from_slice(&cur[..n]);
        buf
    }
}

fn check_currency(currency: &str) -> Result<(), AmountError> {
    if currency.is_empty() || currency.len() >= CURRENCY_LEN {
        return Err(AmountError::Malformed(format!("invalid currency length: '{currency}'")));
    }
    if !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AmountError::Malformed(format!("invalid currency: '{currency}'")));
    }
    Ok(())
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (currency, number) =
            s.trim().split_once(':').ok_or_else(|| AmountError::Malformed(format!("missing currency in '{s}'")))?;
        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (number, None),
        };
        if int_part.is_empty() || !int_part.chars().all(|c| c.is_ascii_digit()) {
            return Err(AmountError::Malformed(format!("invalid value in '{s}'")));
        }
        let value = int_part.parse::<u64>().map_err(|e| AmountError::Malformed(format!("{e} in '{s}'")))?;
        let fraction = match frac_part {
            None => 0,
            Some(f) => {
                if f.is_empty() || f.len() > FRACTION_DIGITS || !f.chars().all(|c| c.is_ascii_digit()) {
                    return Err(AmountError::Malformed(format!("invalid fraction in '{s}'")));
                }
                let digits = f.parse::<u32>().map_err(|e| AmountError::Malformed(format!("{e} in '{s}'")))?;
                #[allow(clippy::cast_possible_truncation)]
                let scale = 10u32.pow((FRACTION_DIGITS - f.len()) as u32);
                digits * scale
            },
        };
        Amount::new(currency, value, fraction)
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.fraction == 0 {
            return write!(f, "{}:{}", self.currency, self.value);
        }
        let frac = format!("{:08}", self.fraction);
        write!(f, "{}:{}.{}", self.currency, self.value, frac.trim_end_matches('0'))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// Amounts are stored as their canonical string form.
impl Type<Sqlite> for Amount {
    fn type_info() -> <Sqlite as sqlx::Database>::TypeInfo {
        <String as Type<Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, Sqlite> for Amount {
    fn encode_by_ref(&self, buf: &mut <Sqlite as HasArguments<'q>>::ArgumentBuffer) -> IsNull {
        <String as Encode<'q, Sqlite>>::encode(self.to_string(), buf)
    }
}

impl<'r> Decode<'r, Sqlite> for Amount {
    fn decode(value: <Sqlite as HasValueRef<'r>>::ValueRef) -> Result<Self, BoxDynError> {
        let s = <&str as Decode<'r, Sqlite>>::decode(value)?;
        Ok(s.parse::<Amount>()?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    #[test]
    fn parse_and_display() {
        assert_eq!(amt("EUR:5").to_string(), "EUR:5");
        assert_eq!(amt("EUR:5.01").to_string(), "EUR:5.01");
        assert_eq!(amt("EUR:0.00000001").fraction(), 1);
        assert_eq!(amt("KUDOS:10.5").fraction(), 50_000_000);
        assert!("EUR".parse::<Amount>().is_err());
        assert!("EUR:".parse::<Amount>().is_err());
        assert!("EUR:1.".parse::<Amount>().is_err());
        assert!("EUR:1.123456789".parse::<Amount>().is_err());
        assert!(":1".parse::<Amount>().is_err());
        assert!("EUR:-1".parse::<Amount>().is_err());
        assert!("VERYLONGCURRENCY:1".parse::<Amount>().is_err());
    }

    #[test]
    fn arithmetic() {
        let a = amt("EUR:1.5");
        let b = amt("EUR:0.75");
        assert_eq!(a.checked_add(&b).unwrap(), amt("EUR:2.25"));
        assert_eq!(a.checked_sub(&b).unwrap(), amt("EUR:0.75"));
        assert_eq!(b.checked_sub(&a), Err(AmountError::Negative));
        assert_eq!(b.saturating_sub(&a).unwrap(), Amount::zero("EUR"));
        assert_eq!(a.checked_mul(3).unwrap(), amt("EUR:4.5"));
        assert_eq!(amt("EUR:1").divide(3), amt("EUR:0.33333333"));
        assert!(matches!(a.checked_add(&amt("USD:1")), Err(AmountError::CurrencyMismatch(_, _))));
        assert_eq!(a.try_cmp(&b).unwrap(), Ordering::Greater);
    }

    #[test]
    fn sums() {
        let coins = vec![amt("EUR:1"), amt("EUR:2.5"), amt("EUR:0.5")];
        assert_eq!(Amount::sum("EUR", &coins).unwrap(), amt("EUR:4"));
        assert!(Amount::sum("USD", &coins).is_err());
    }

    #[test]
    fn binary_form() {
        let nbo = amt("EUR:1.5").to_nbo();
        assert_eq!(&nbo[..8], &1u64.to_be_bytes());
        assert_eq!(&nbo[8..12], &50_000_000u32.to_be_bytes());
        assert_eq!(&nbo[12..15], b"EUR");
        assert!(nbo[15..].iter().all(|b| *b == 0));
    }

    #[test]
    fn json_form() {
        let json = serde_json::to_string(&amt("EUR:3.2")).unwrap();
        assert_eq!(json, "\"EUR:3.2\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amt("EUR:3.2"));
    }
}
