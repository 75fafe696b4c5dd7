use chrono::{NaiveDate, NaiveDateTime, Timelike};
use uuid::Uuid;

use crate::client_message::CommandParseError;

pub type GroupId = u32;
pub type EntryId = Uuid;

/// Modification timestamp with second resolution, as stored by the database.
pub type Timestamp = NaiveDateTime;

/// Number of wire fields a timestamp occupies: year, month, day, hour, minute, second.
pub const TIMESTAMP_FIELDS: usize = 6;

pub fn parse_number<T: std::str::FromStr>(field: &[u8], name: &'static str) -> Result<T, CommandParseError> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or(CommandParseError::InvalidNumber(name))
}

pub fn parse_timestamp(fields: &[Vec<u8>]) -> Result<Timestamp, CommandParseError> {
    let [y, mo, d, h, mi, s] = fields else {
        return Err(CommandParseError::MissingArgument("last modification"));
    };

    let (year, month, day) = (parse_number(y, "year")?, parse_number(mo, "month")?, parse_number(d, "day")?);
    let (hour, minute, second) = (parse_number(h, "hour")?, parse_number(mi, "minute")?, parse_number(s, "second")?);

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .ok_or(CommandParseError::InvalidDate)
}

pub fn timestamp_fields(ts: &Timestamp) -> [Vec<u8>; TIMESTAMP_FIELDS] {
    use chrono::Datelike;

    [
        ts.year().to_string().into_bytes(),
        ts.month().to_string().into_bytes(),
        ts.day().to_string().into_bytes(),
        ts.hour().to_string().into_bytes(),
        ts.minute().to_string().into_bytes(),
        ts.second().to_string().into_bytes(),
    ]
}

/// Drops sub-second precision, the database only stores whole seconds.
pub fn truncate_to_seconds(ts: Timestamp) -> Timestamp {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// Entry ids travel as their 16 raw bytes; the textual form is accepted as well.
pub fn parse_entry_id(field: &[u8]) -> Result<EntryId, CommandParseError> {
    if let Ok(bytes) = <[u8; 16]>::try_from(field) {
        return Ok(Uuid::from_bytes(bytes));
    }

    std::str::from_utf8(field)
        .ok()
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .ok_or(CommandParseError::InvalidEntryId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_fields_parse_back() {
        let ts = NaiveDate::from_ymd_opt(2013, 2, 28).unwrap().and_hms_opt(23, 5, 9).unwrap();
        let fields = timestamp_fields(&ts);
        assert_eq!(fields[1], b"2");
        assert_eq!(parse_timestamp(&fields).unwrap(), ts);
    }

    #[test]
    fn invalid_timestamps() {
        let fields: Vec<Vec<u8>> = ["2013", "2", "30", "0", "0", "0"].iter().map(|s| s.as_bytes().to_vec()).collect();
        assert_eq!(parse_timestamp(&fields), Err(CommandParseError::InvalidDate));

        assert_eq!(
            parse_timestamp(&fields[..5]),
            Err(CommandParseError::MissingArgument("last modification"))
        );

        let fields: Vec<Vec<u8>> = ["x", "2", "3", "0", "0", "0"].iter().map(|s| s.as_bytes().to_vec()).collect();
        assert_eq!(parse_timestamp(&fields), Err(CommandParseError::InvalidNumber("year")));
    }

    #[test]
    fn entry_id_forms() {
        let id = Uuid::new_v4();
        assert_eq!(parse_entry_id(id.as_bytes()).unwrap(), id);
        assert_eq!(parse_entry_id(id.to_string().as_bytes()).unwrap(), id);
        assert_eq!(parse_entry_id(id.simple().to_string().as_bytes()).unwrap(), id);
        assert_eq!(parse_entry_id(b"nope"), Err(CommandParseError::InvalidEntryId));
    }
}
