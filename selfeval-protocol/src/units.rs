//! Time is counted in microseconds, memory in bytes.

use serde::{Deserialize, Deserializer, Serializer};
use ubyte::ByteUnit;

pub const fn msec(t: u64) -> u64 {
    t * 1000
}

pub const fn sec(t: u64) -> u64 {
    t * 1_000_000
}

pub const fn kib(n: u64) -> u64 {
    n << 10
}

pub const fn mib(n: u64) -> u64 {
    n << 20
}

pub const fn gib(n: u64) -> u64 {
    n << 30
}

const TIME_SUFFIXES: [(u64, &[&str]); 4] = [
    (1, &["us", "usec", "microsecond"]),
    (1000, &["ms", "msec", "millisecond"]),
    (1_000_000, &["s", "sec", "second"]),
    (60_000_000, &["m", "min", "minute"]),
];

fn is_number(s: &str) -> bool {
    let mut parts = s.split('.');
    let int = parts.next().unwrap_or("");
    let frac = parts.next();
    if parts.next().is_some() {
        return false;
    }
    let digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    digits(int) && frac.map_or(true, digits)
}

/// Parses `"1500"`, `"200ms"`, `"1.5 s"`, `"2min"` and friends into microseconds.
pub fn parse_time(s: &str) -> Option<u64> {
    let s: String = s.chars().filter(|c| *c != ' ').collect();
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse().ok();
    }
    for &(scale, suffixes) in TIME_SUFFIXES.iter() {
        for suffix in suffixes {
            if let Some(num) = s.strip_suffix(suffix) {
                if is_number(num) {
                    let value: f64 = num.parse().ok()?;
                    return Some((value * scale as f64) as u64);
                }
            }
        }
    }
    None
}

fn format_float(x: f64) -> String {
    let s = format!("{:.2}", x);
    let y: f64 = s.parse().unwrap_or(x);
    if (x - y).abs() > 1e-6 {
        return s;
    }
    s.trim_end_matches('0').trim_end_matches('.').to_owned()
}

pub fn format_time(t: u64) -> String {
    let ms = t / 1000;
    if ms <= 1500 {
        format!("{} ms", ms)
    } else {
        format!("{} s", format_float(ms as f64 / 1000.0))
    }
}

pub fn format_memory(n: u64) -> String {
    const UNITS: [(char, u32); 4] = [('T', 40), ('G', 30), ('M', 20), ('K', 10)];
    for &(unit, shift) in UNITS.iter() {
        let size = 1u64 << shift;
        if n >= size {
            return format!("{} {}iB", format_float(n as f64 / size as f64), unit);
        }
    }
    format!("{} B", n)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimeRepr {
    Micros(u64),
    Text(String),
}

fn time_from_repr<E: serde::de::Error>(repr: TimeRepr) -> Result<u64, E> {
    match repr {
        TimeRepr::Micros(t) => Ok(t),
        TimeRepr::Text(s) => {
            parse_time(&s).ok_or_else(|| E::custom(format!("invalid time: {:?}", s)))
        }
    }
}

pub mod time {
    use super::*;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        time_from_repr(TimeRepr::deserialize(d)?)
    }

    pub fn serialize<S: Serializer>(t: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(*t)
    }
}

pub mod opt_time {
    use super::*;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        Option::<TimeRepr>::deserialize(d)?
            .map(time_from_repr)
            .transpose()
    }

    pub fn serialize<S: Serializer>(t: &Option<u64>, s: S) -> Result<S::Ok, S::Error> {
        match t {
            Some(t) => s.serialize_some(t),
            None => s.serialize_none(),
        }
    }
}

pub mod memory {
    use super::*;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        Ok(ByteUnit::deserialize(d)?.as_u64())
    }

    pub fn serialize<S: Serializer>(n: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(*n)
    }
}

pub mod opt_memory {
    use super::*;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        Ok(Option::<ByteUnit>::deserialize(d)?.map(ByteUnit::as_u64))
    }

    pub fn serialize<S: Serializer>(n: &Option<u64>, s: S) -> Result<S::Ok, S::Error> {
        match n {
            Some(n) => s.serialize_some(n),
            None => s.serialize_none(),
        }
    }
}

pub fn parse_memory(s: &str) -> Option<u64> {
    s.trim().parse::<ByteUnit>().ok().map(ByteUnit::as_u64)
}
