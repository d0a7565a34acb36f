use anyhow::{anyhow, Context, Result};
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// The format every stored timestamp uses (always UTC).
pub static CANONICAL_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

pub static DATE_FORMAT: &[BorrowedFormatItem<'_>] = format_description!("[year]-[month]-[day]");

/// Parses a provider-supplied timestamp and converts it to UTC.
///
/// Accepts RFC 3339 and ISO 8601 timestamps with an offset, the canonical format (taken as UTC),
/// and bare dates (taken as midnight UTC). Returns `None` for anything else.
pub fn normalize(raw: &str) -> Option<PrimitiveDateTime> {
    let raw = raw.trim();

    if raw.is_empty() {
        return None;
    }

    let with_offset = OffsetDateTime::parse(raw, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(raw, &Iso8601::DEFAULT));

    let dt = if let Ok(dt) = with_offset {
        // out of range once shifted past year 9999.
        let dt = dt.checked_to_offset(UtcOffset::UTC)?;

        PrimitiveDateTime::new(dt.date(), dt.time())
    } else if let Ok(dt) = PrimitiveDateTime::parse(raw, CANONICAL_FORMAT) {
        dt
    } else {
        Date::parse(raw, DATE_FORMAT).ok()?.midnight()
    };

    Some(dt.replace_nanosecond(0).unwrap_or(dt))
}

pub fn format(dt: PrimitiveDateTime) -> Result<String> {
    dt.format(CANONICAL_FORMAT)
        .with_context(|| anyhow!("could not format the timestamp {dt}"))
}

pub fn format_utc(dt: OffsetDateTime) -> Result<String> {
    let dt = dt
        .checked_to_offset(UtcOffset::UTC)
        .with_context(|| anyhow!("the timestamp {dt} is out of range in UTC"))?;

    format(PrimitiveDateTime::new(dt.date(), dt.time()))
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn converts_offsets_to_utc() {
        assert_eq!(
            normalize("2025-02-14T13:00:05-05:00"),
            Some(datetime!(2025-02-14 18:00:05)),
        );
        assert_eq!(
            normalize("2025-02-14T18:07:29Z"),
            Some(datetime!(2025-02-14 18:07:29)),
        );
    }

    #[test]
    fn drops_subseconds() {
        assert_eq!(
            normalize("2025-02-14T18:07:29.734Z"),
            Some(datetime!(2025-02-14 18:07:29)),
        );
    }

    #[test]
    fn accepts_canonical_and_bare_dates() {
        assert_eq!(
            normalize("2025-02-14 08:30:00"),
            Some(datetime!(2025-02-14 08:30:00)),
        );
        assert_eq!(normalize("2025-02-14"), Some(datetime!(2025-02-14 00:00:00)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("   "), None);
        assert_eq!(normalize("invalid-date"), None);
        assert_eq!(normalize("2025-13-40"), None);
    }

    #[test]
    fn rejects_instants_past_the_last_representable_year() {
        assert_eq!(normalize("9999-12-31T23:59:59-05:00"), None);
        assert_eq!(
            normalize("9999-12-31T18:59:59-05:00"),
            Some(datetime!(9999-12-31 23:59:59)),
        );
        assert!(format_utc(datetime!(9999-12-31 23:00:00 -05:00)).is_err());
    }

    #[test]
    fn formats_canonically() {
        let dt = normalize("2025-02-14T05:00:08-05:00").unwrap();

        assert_eq!(format(dt).unwrap(), "2025-02-14 10:00:08");
        assert_eq!(
            format_utc(datetime!(2025-02-14 23:30:00 -02:00)).unwrap(),
            "2025-02-15 01:30:00",
        );
    }
}
