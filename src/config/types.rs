use std::fmt;
use std::sync::OnceLock;

use regex_lite::{Regex, RegexBuilder};
use serde::de::{Unexpected, Visitor};
use serde::{Deserialize, Deserializer};

/// A config duration: either a number of seconds or a string like `1d 2h 30m 15s`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Duration(std::time::Duration);

impl Duration {
    pub const fn from_secs(seconds: u64) -> Self {
        Self(std::time::Duration::from_secs(seconds))
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(std::time::Duration::from_millis(millis))
    }

    fn parse(s: &str) -> Option<Result<Self, String>> {
        static REGEXP: OnceLock<Regex> = OnceLock::new();

        let regexp = REGEXP.get_or_init(|| {
            RegexBuilder::new(
                r"
                ^
                (?:(?<days>    \d+)d)? \s*
                (?:(?<hours>   \d+)h)? \s*
                (?:(?<minutes> \d+)m)? \s*
                (?:(?<seconds> \d+)s)?
                $",
            )
            .ignore_whitespace(true)
            .build()
            .unwrap()
        });
        let captures = regexp.captures(s.trim())?;

        let mut total = 0u64;
        let mut matched = false;

        for (name, unit) in [("days", 86_400), ("hours", 3_600), ("minutes", 60), ("seconds", 1)] {
            let Some(m) = captures.name(name) else {
                continue;
            };
            matched = true;

            let part = match m.as_str().parse::<u64>() {
                Ok(v) => v.checked_mul(unit),
                Err(e) => return Some(Err(format!("could not parse {name} (`{}`): {e}", m.as_str()))),
            };

            match part.and_then(|part| total.checked_add(part)) {
                Some(sum) => total = sum,
                None => return Some(Err(format!("duration `{s}` is too large"))),
            }
        }

        matched.then(|| Ok(Self::from_secs(total)))
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a duration")
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_u64(v.try_into().map_err(E::custom)?)
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Duration::from_secs(v))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match Duration::parse(v) {
                    Some(result) => result.map_err(E::custom),
                    None => Err(E::invalid_value(Unexpected::Str(v), &self)),
                }
            }
        }

        deserializer.deserialize_str(DurationVisitor)
    }
}

impl From<std::time::Duration> for Duration {
    fn from(duration: std::time::Duration) -> Self {
        Self(duration)
    }
}

impl From<Duration> for std::time::Duration {
    fn from(duration: Duration) -> Self {
        duration.0
    }
}
