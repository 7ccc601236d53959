use chrono::{DateTime, Duration, TimeZone, Utc};

pub const EMPTY_VALUE: &str = "";

/// Convert an ASN (4 byte) as dotted if it exceeds the 2-byte limit
/// E.g. 4259840100 -> "65000.100"
pub fn u32_to_dotted(asn: u32, sep: char) -> String {
    if asn <= std::u16::MAX as u32 {
        format!("{}", asn)
    } else {
        format!("{}{}{}", asn >> 16, sep, asn & 0xffff)
    }
}

pub fn maybe_string<T>(item: Option<&T>) -> String
where
    T: ToString,
{
    item.map(|i| i.to_string())
        .unwrap_or_else(|| String::from(EMPTY_VALUE))
}

fn fit_with_remainder(dividend: u64, divisor: u64) -> (u64, u64) {
    let fit = dividend / divisor;
    let remainder = dividend % divisor;
    (fit, remainder)
}

pub fn get_elapsed_time<Tz>(time: DateTime<Tz>) -> Duration
where
    Tz: TimeZone,
{
    Utc::now().signed_duration_since(time)
}

/// Given a duration, format like "00:00:00"
pub fn format_elapsed_time(elapsed: Duration) -> String {
    let elapsed = elapsed.num_seconds().abs() as u64;
    let (hours, remainder) = fit_with_remainder(elapsed, 3600);
    let (minutes, seconds) = fit_with_remainder(remainder, 60);
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Given a timestamp, get the elapsed time and return formatted string
pub fn format_time_as_elapsed<Tz>(time: DateTime<Tz>) -> String
where
    Tz: TimeZone,
{
    format_elapsed_time(get_elapsed_time(time))
}
