pub fn format_bytes(bytes: u64) -> String {
    const UNIT: f64 = 1024.0;
    let bytes = bytes as f64;

    if bytes < UNIT {
        return format!("{bytes:.0} B");
    }

    let kb = bytes / UNIT;
    if kb < UNIT {
        return format!("{kb:.1} KiB");
    }

    let mb = kb / UNIT;
    if mb < UNIT {
        return format!("{mb:.1} MiB");
    }

    let gb = mb / UNIT;
    format!("{gb:.1} GiB")
}

/// Format a cpufreq-style kHz value for display (e.g., "2.80 GHz")
pub fn format_khz(khz: u64) -> String {
    if khz == 0 {
        return "unknown".to_string();
    }
    if khz < 1_000_000 {
        return format!("{} MHz", khz / 1_000);
    }
    format!("{:.2} GHz", khz as f64 / 1_000_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1024), "1.0 KiB");
        assert_eq!(format_bytes(1024 * 1024), "1.0 MiB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.0 GiB");
    }

    #[test]
    fn format_khz_scales() {
        assert_eq!(format_khz(0), "unknown");
        assert_eq!(format_khz(998_400), "998 MHz");
        assert_eq!(format_khz(2_800_000), "2.80 GHz");
    }
}
