use std::{
    borrow::Cow,
    fmt::{Debug, Display},
    hash::{Hash, Hasher},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize, de::Error};

/// A duration written as an amount and a unit suffix, e.g. `100ms` or `10s`.
///
/// Values compare by the length of time they stand for, so `1000ms == 1s`.
#[derive(Clone, Copy)]
pub struct PrettyDuration {
    unit: DurationUnit,
    amount: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum DurationUnit {
    Milliseconds,
    Seconds,
    Minutes,
}

impl PrettyDuration {
    pub const fn from_millis(amount: u64) -> Self {
        Self {
            unit: DurationUnit::Milliseconds,
            amount,
        }
    }

    pub const fn from_secs(amount: u64) -> Self {
        Self {
            unit: DurationUnit::Seconds,
            amount,
        }
    }

    pub fn as_duration(&self) -> Duration {
        match self.unit {
            DurationUnit::Milliseconds => Duration::from_millis(self.amount),
            DurationUnit::Seconds => Duration::from_secs(self.amount),
            DurationUnit::Minutes => Duration::from_secs(self.amount.saturating_mul(60)),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }
}

impl Default for PrettyDuration {
    fn default() -> Self {
        Self::from_secs(0)
    }
}

impl From<PrettyDuration> for Duration {
    fn from(value: PrettyDuration) -> Self {
        value.as_duration()
    }
}

impl PartialEq for PrettyDuration {
    fn eq(&self, other: &Self) -> bool {
        self.as_duration() == other.as_duration()
    }
}

impl Eq for PrettyDuration {}

impl Hash for PrettyDuration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_duration().hash(state);
    }
}

impl PartialOrd for PrettyDuration {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrettyDuration {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_duration().cmp(&other.as_duration())
    }
}

impl Display for DurationUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DurationUnit::Milliseconds => write!(f, "ms"),
            DurationUnit::Seconds => write!(f, "s"),
            DurationUnit::Minutes => write!(f, "m"),
        }
    }
}

impl FromStr for DurationUnit {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ms" | "MS" => Ok(Self::Milliseconds),
            "s" | "S" => Ok(Self::Seconds),
            "m" | "M" => Ok(Self::Minutes),
            _ => Err(()),
        }
    }
}

impl Display for PrettyDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.amount, self.unit)
    }
}

impl Debug for PrettyDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as Display>::fmt(self, f)
    }
}

impl FromStr for PrettyDuration {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let split = s.find(|c: char| !c.is_ascii_digit()).ok_or(())?;
        let (amount_str, unit_str) = s.split_at(split);
        Ok(Self {
            unit: unit_str.parse()?,
            amount: amount_str.parse().map_err(|_| ())?,
        })
    }
}

impl Serialize for PrettyDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PrettyDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let repr: Cow<'de, str> = Cow::deserialize(deserializer)?;
        repr.parse()
            .map_err(|()| D::Error::custom("Failed to parse value as a duration"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn pretty_duration_serialize() {
        assert_eq!(PrettyDuration::from_millis(250).to_string(), "250ms");
        assert_eq!(PrettyDuration::from_secs(10).to_string(), "10s");
        assert_eq!(
            PrettyDuration {
                unit: DurationUnit::Minutes,
                amount: 3
            }
            .to_string(),
            "3m"
        );
    }

    #[test]
    pub fn pretty_duration_deserialize() {
        fn assert_deserializes_to(repr1: &str, repr2: &str, unit: DurationUnit, amount: u64) {
            let duration = PrettyDuration { unit, amount };
            for repr in [repr1, repr2] {
                let parsed: PrettyDuration = repr.parse().unwrap();
                assert_eq!(duration, parsed);
                assert_eq!(parsed.to_string(), format!("{amount}{unit}"));
            }
        }

        assert_deserializes_to("100ms", "100MS", DurationUnit::Milliseconds, 100);
        assert_deserializes_to("12s", "12S", DurationUnit::Seconds, 12);
        assert_deserializes_to("34m", "34M", DurationUnit::Minutes, 34);
    }

    #[test]
    pub fn units_compare_by_length() {
        assert!(PrettyDuration::from_millis(1500) > PrettyDuration::from_secs(1));
        assert_eq!(
            "2m".parse::<PrettyDuration>().unwrap().as_duration(),
            Duration::from_secs(120)
        );
    }

    #[test]
    pub fn equality_agrees_with_ordering() {
        use std::collections::HashSet;

        let millis = PrettyDuration::from_millis(1000);
        let secs = PrettyDuration::from_secs(1);
        assert_eq!(millis.cmp(&secs), std::cmp::Ordering::Equal);
        assert_eq!(millis, secs);
        assert_ne!(millis, PrettyDuration::from_millis(1001));

        let set: HashSet<_> = [millis, secs, "1s".parse().unwrap()].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    pub fn huge_amounts_do_not_overflow() {
        let parsed: PrettyDuration = "18446744073709551615m".parse().unwrap();
        assert_eq!(parsed.as_duration(), Duration::from_secs(u64::MAX));
    }

    #[test]
    pub fn rejects_malformed_durations() {
        for repr in ["", "12", "s", "-12s", "12h", "1.5s"] {
            assert!(repr.parse::<PrettyDuration>().is_err(), "{repr:?} parsed");
        }
    }
}
