use std::time::Duration;

pub(crate) fn format_tags_inline(tags: &[(String, String)], exclude: &[&str]) -> String {
    let mut filtered: Vec<(&str, &str)> = tags
        .iter()
        .filter(|(k, _)| !exclude.iter().any(|e| e == &k.as_str()))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    filtered.sort_unstable();

    if filtered.is_empty() {
        return String::new();
    }

    let inner = filtered
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");

    format!("{{{inner}}}")
}

pub(crate) fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.1}")
    } else {
        "0".to_string()
    }
}

pub(crate) fn format_percent(v: Option<f64>) -> String {
    match v {
        Some(v) if v.is_finite() => format!("{:.2}%", v * 100.0),
        _ => "n/a".to_string(),
    }
}

/// Milliseconds as `850us`, `12.34ms` or `1.50s`.
pub(crate) fn format_ms(ms: Option<f64>) -> String {
    let Some(ms) = ms.filter(|v| v.is_finite()) else {
        return "n/a".to_string();
    };
    if ms >= 1000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else if ms >= 1.0 {
        format!("{ms:.2}ms")
    } else {
        format!("{:.0}us", ms * 1000.0)
    }
}

pub(crate) fn format_duration(d: Duration) -> String {
    // Always render as a single rounded component in one of: us, ms, s.
    let total_ns = d.as_nanos();

    const NS_PER_US: u128 = 1_000;
    const NS_PER_MS: u128 = 1_000_000;
    const NS_PER_S: u128 = 1_000_000_000;

    fn round_div(value: u128, unit: u128) -> u128 {
        (value + (unit / 2)) / unit
    }

    if total_ns >= NS_PER_S {
        return format!("{}s", round_div(total_ns, NS_PER_S));
    }
    if total_ns >= NS_PER_MS {
        return format!("{}ms", round_div(total_ns, NS_PER_MS));
    }
    format!("{}us", round_div(total_ns, NS_PER_US))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_sorted_and_filtered() {
        let tags = vec![
            ("status".to_string(), "200".to_string()),
            ("group".to_string(), "login".to_string()),
            ("name".to_string(), "me".to_string()),
        ];
        assert_eq!(
            format_tags_inline(&tags, &["group"]),
            "{name=me status=200}"
        );
        assert_eq!(format_tags_inline(&tags, &["group", "name", "status"]), "");
    }

    #[test]
    fn ms_picks_a_readable_unit() {
        assert_eq!(format_ms(Some(0.25)), "250us");
        assert_eq!(format_ms(Some(12.5)), "12.50ms");
        assert_eq!(format_ms(Some(1500.0)), "1.50s");
        assert_eq!(format_ms(None), "n/a");
    }

    #[test]
    fn durations_round_to_one_unit() {
        assert_eq!(format_duration(Duration::from_millis(1499)), "1s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "2s");
        assert_eq!(format_duration(Duration::from_micros(2500)), "3ms");
        assert_eq!(format_duration(Duration::from_nanos(1500)), "2us");
    }

    #[test]
    fn percent_of_missing_rate() {
        assert_eq!(format_percent(Some(0.5)), "50.00%");
        assert_eq!(format_percent(None), "n/a");
    }
}
