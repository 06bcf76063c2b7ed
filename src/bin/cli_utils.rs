use std::fmt::Write;
use std::net::IpAddr;

/// Format IP and prefix length as the matched network in CIDR notation
pub fn format_cidr(ip_str: &str, prefix_len: u8) -> String {
    let mut buf = String::with_capacity(64);

    match ip_str.parse::<IpAddr>() {
        Ok(IpAddr::V4(ipv4)) => {
            let prefix_len = prefix_len.min(32);
            let mask = if prefix_len == 0 {
                0u32
            } else {
                !0u32 << (32 - prefix_len)
            };
            let network = std::net::Ipv4Addr::from(u32::from(ipv4) & mask);
            let _ = write!(buf, "{}/{}", network, prefix_len);
        }
        Ok(IpAddr::V6(ipv6)) => {
            let prefix_len = prefix_len.min(128);
            let mask = if prefix_len == 0 {
                0u128
            } else {
                !0u128 << (128 - prefix_len)
            };
            let network = std::net::Ipv6Addr::from(u128::from(ipv6) & mask);
            let _ = write!(buf, "{}/{}", network, prefix_len);
        }
        Err(_) => {
            let _ = write!(buf, "{}/{}", ip_str, prefix_len);
        }
    }

    buf
}

/// Thousands separators: 1234567 -> "1,234,567"
pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Seconds since the epoch as "YYYY-MM-DD HH:MM:SS UTC"
pub fn format_unix_timestamp(timestamp: u64) -> String {
    let days = timestamp / 86_400;
    let secs_of_day = timestamp % 86_400;
    let (year, month, day) = days_to_ymd(days);

    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02} UTC",
        year,
        month,
        day,
        secs_of_day / 3600,
        (secs_of_day % 3600) / 60,
        secs_of_day % 60
    )
}

fn days_to_ymd(days: u64) -> (u64, u64, u64) {
    let mut year = 1970;
    let mut remaining = days;

    loop {
        let days_in_year = if is_leap_year(year) { 366 } else { 365 };
        if remaining < days_in_year {
            break;
        }
        remaining -= days_in_year;
        year += 1;
    }

    let month_lengths = [
        31,
        if is_leap_year(year) { 29 } else { 28 },
        31,
        30,
        31,
        30,
        31,
        31,
        30,
        31,
        30,
        31,
    ];

    let mut month = 1;
    for len in month_lengths {
        if remaining < len {
            break;
        }
        remaining -= len;
        month += 1;
    }

    (year, month, remaining + 1)
}

fn is_leap_year(year: u64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}
