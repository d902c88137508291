use std::time::Duration;

use crate::payload::OutputFormat;
use crate::query::QuerySpec;

pub(crate) const DEFAULT_RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Delay before retry number `retry` (0-based): `factor * 2^retry`, capped at `max`.
pub(crate) fn backoff(factor: Duration, retry: u32, max: Duration) -> Duration {
    let next = factor.as_secs_f64() * 2f64.powi(retry.min(62) as i32);
    if next >= max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(next)
    }
}

/// Parses a `Retry-After` value given in seconds. HTTP-date values are ignored.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Default output file name: `enatrieved_<tax_id>_<strategy>[_exact].<format>`.
pub fn default_output_name(spec: &QuerySpec, format: OutputFormat) -> String {
    let strategy: String = spec
        .strategy()
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_whitespace() { '_' } else { c })
        .collect();
    format!(
        "enatrieved_{}_{}{}.{}",
        spec.taxonomy_id(),
        strategy,
        if spec.exact_match() { "_exact" } else { "" },
        format.extension()
    )
}

/// Formats an integer with thousands separators, e.g. `1234567` -> `1,234,567`.
pub(crate) fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
