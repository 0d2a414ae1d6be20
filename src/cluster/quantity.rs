//! Kubernetes quantity parsing
//!
//! One pure helper with a fixed suffix table. Everything in the crate that
//! needs to turn a `"500m"` or `"4Gi"` string into a number goes through
//! here; nothing else in the core does ad-hoc quantity math.

/// Binary and decimal memory suffixes, largest first so `Gi` wins over `G`
const MEMORY_SUFFIXES: &[(&str, i64)] = &[
    ("Pi", 1 << 50),
    ("Ti", 1 << 40),
    ("Gi", 1 << 30),
    ("Mi", 1 << 20),
    ("Ki", 1 << 10),
    ("P", 1_000_000_000_000_000),
    ("T", 1_000_000_000_000),
    ("G", 1_000_000_000),
    ("M", 1_000_000),
    ("K", 1_000),
];

/// Parse a CPU quantity into millicores.
///
/// `"500m"` is 500 millicores, `"2"` is 2000, fractional cores like `"1.5"`
/// are accepted.
pub fn parse_cpu_millis(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Some(millis) = value.strip_suffix('m') {
        return millis.parse::<i64>().ok().filter(|m| *m >= 0);
    }
    let cores: f64 = value.parse().ok()?;
    if !cores.is_finite() || cores < 0.0 {
        return None;
    }
    Some((cores * 1000.0) as i64)
}

/// Parse a memory quantity into bytes. Bare numbers are bytes.
pub fn parse_memory_bytes(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    for (suffix, multiplier) in MEMORY_SUFFIXES {
        if let Some(number) = value.strip_suffix(suffix) {
            let amount: f64 = number.trim().parse().ok()?;
            if !amount.is_finite() || amount < 0.0 {
                return None;
            }
            return Some((amount * *multiplier as f64) as i64);
        }
    }
    value.parse::<i64>().ok().filter(|b| *b >= 0)
}

/// Parse a storage throughput target into MB/s. Accepts a bare number or a
/// `MBps`/`MB` suffix.
pub fn parse_storage_mbps(value: &str) -> Option<f64> {
    let value = value.trim();
    let number = value
        .strip_suffix("MBps")
        .or_else(|| value.strip_suffix("MB"))
        .unwrap_or(value)
        .trim();
    number.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

/// Parse an IOPS target
pub fn parse_iops(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

/// Parse a plain non-negative count (GPUs, pods)
pub fn parse_count(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok().filter(|v| *v >= 0)
}
