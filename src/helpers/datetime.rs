use time::{OffsetDateTime, UtcOffset, macros::format_description};

pub trait Timezone {
    fn to_localtime(&self) -> OffsetDateTime;
    fn to_formatted_string(&self) -> String;
}

impl Timezone for OffsetDateTime {
    fn to_localtime(&self) -> OffsetDateTime {
        // time's own local offset lookup refuses to run in multi-threaded
        // processes, borrow the offset from chrono instead
        // https://github.com/time-rs/time/discussions/421
        let tz_offset_sec = chrono::Local::now().offset().local_minus_utc();
        match UtcOffset::from_whole_seconds(tz_offset_sec) {
            Ok(offset) => self.to_offset(offset),
            Err(_) => *self,
        }
    }

    fn to_formatted_string(&self) -> String {
        self.format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
        ))
        .unwrap_or_else(|_| self.unix_timestamp().to_string())
    }
}

pub fn from_unix(secs: u64) -> OffsetDateTime {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
