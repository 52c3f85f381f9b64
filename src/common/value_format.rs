use size::{Base, SizeFormatter, Style};

pub fn format_bytes(bytes: f64) -> String {
    let fmt_bytes = SizeFormatter::new()
        .with_base(Base::Base2)
        .with_style(Style::Abbreviated);
    return fmt_bytes.format(bytes as i64);
}

/// Render a raw sample for humans according to the catalog unit.
///
/// Unknown units are appended verbatim, so catalogs can carry things like
/// "qps" without the engine knowing about them.
pub fn format_value(value: f64, unit: Option<&str>) -> String {
    match unit {
        Some("%") => format!("{:.1}%", value),
        Some("bytes") => format_bytes(value),
        Some("ms") => format!("{:.0}ms", value),
        Some("s") => format!("{:.1}s", value),
        None | Some("") => format_plain(value),
        Some(unit) => format!("{} {}", format_plain(value), unit),
    }
}

fn format_plain(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    return format!("{:.2}", value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_value_percent() {
        assert_eq!(format_value(35.5, Some("%")), "35.5%");
        assert_eq!(format_value(0.0, Some("%")), "0.0%");
    }

    #[test]
    fn test_format_value_plain() {
        assert_eq!(format_value(3.0, None), "3");
        assert_eq!(format_value(0.15, None), "0.15");
    }

    #[test]
    fn test_format_value_custom_unit() {
        assert_eq!(format_value(12.0, Some("conns")), "12 conns");
    }
}
