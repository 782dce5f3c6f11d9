//! Built-in format tags
//!
//! Each tag is a self-contained well-formedness check over a string value.
//! Network formats lean on the standard library's address parsers, uuid and
//! date formats on their respective crates.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use uuid::Uuid;

/// Built-in format tag attached to a rule via `Rule::format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Email,
    Url,
    Ip,
    Ipv4,
    Ipv6,
    Uuid,
    Date,
    DateTime,
    Time,
}

impl Format {
    pub fn name(&self) -> &'static str {
        match self {
            Format::Email => "email",
            Format::Url => "url",
            Format::Ip => "ip",
            Format::Ipv4 => "ipv4",
            Format::Ipv6 => "ipv6",
            Format::Uuid => "uuid",
            Format::Date => "date",
            Format::DateTime => "datetime",
            Format::Time => "time",
        }
    }

    /// Check a value against this format. Non-string values fail.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        let s = match value.as_str() {
            Some(s) => s,
            None => return Err(format!("must be a string in {} format", self.name())),
        };

        let ok = match self {
            Format::Email => is_email(s),
            Format::Url => is_url(s),
            Format::Ip => IpAddr::from_str(s).is_ok(),
            Format::Ipv4 => Ipv4Addr::from_str(s).is_ok(),
            Format::Ipv6 => Ipv6Addr::from_str(s).is_ok(),
            Format::Uuid => Uuid::parse_str(s).is_ok(),
            Format::Date => NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
            Format::DateTime => is_datetime(s),
            Format::Time => NaiveTime::parse_from_str(s, "%H:%M:%S").is_ok(),
        };

        if ok {
            Ok(())
        } else {
            Err(format!("is not a valid {}", self.name()))
        }
    }
}

// ASCII local/domain parts, TLD required, no leading/trailing dots.
static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9]([a-zA-Z0-9._%+-]*[a-zA-Z0-9])?@[a-zA-Z0-9]([a-zA-Z0-9.-]*[a-zA-Z0-9])?\.[a-zA-Z]{2,}$",
    )
    .expect("email pattern is valid")
});

static URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://[^\s/$.?#][^\s]*$").expect("url pattern is valid")
});

fn is_email(s: &str) -> bool {
    !s.contains("..") && EMAIL.is_match(s)
}

fn is_url(s: &str) -> bool {
    URL.is_match(s)
}

fn is_datetime(s: &str) -> bool {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
        || DateTime::parse_from_rfc3339(s).is_ok()
}
