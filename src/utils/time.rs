use lazy_static::lazy_static;
use time::{macros::format_description, Duration, OffsetDateTime};

lazy_static! {
    static ref UNIX_TIME_UNIT_OFFSET: i128 = (Duration::MILLISECOND / Duration::NANOSECOND) as i128;
}

#[inline]
pub fn sleep_for_ms(ms: u64) {
    std::thread::sleep(std::time::Duration::from_millis(ms));
}

#[inline]
pub fn curr_time_millis() -> u64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / (*UNIX_TIME_UNIT_OFFSET)) as u64
}

#[inline]
pub fn curr_time_nanos() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos()
}

#[inline]
pub fn milli2nano<T: Into<i128>>(t: T) -> i128 {
    *UNIX_TIME_UNIT_OFFSET * t.into()
}

/// Formats a millisecond timestamp as `hh:mm:ss`, used when logging breaker transitions.
/// Out-of-range timestamps are rendered as the raw number.
pub fn format_time_millis(ts_millis: u64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(milli2nano(ts_millis))
        .ok()
        .and_then(|t| {
            t.format(format_description!("[hour]:[minute]:[second]"))
                .ok()
        })
        .unwrap_or_else(|| ts_millis.to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn millis_is_monotonic_enough() {
        let before = curr_time_millis();
        sleep_for_ms(5);
        let after = curr_time_millis();
        assert!(after >= before + 5);
    }

    #[test]
    fn format_millis() {
        // 1970-01-01 01:02:03 UTC
        assert_eq!(format_time_millis(3_723_000), "01:02:03");
    }
}
