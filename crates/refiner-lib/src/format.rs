//! Display helpers shared by logs and the CLI

/// Two-decimal percentage, e.g. `12.34%`
pub fn format_percentage(value: f64) -> String {
    format!("{:.2}%", value)
}

/// CPU in millicores, e.g. `250m`
pub fn format_cpu(millis: i64) -> String {
    format!("{}m", millis)
}

/// Memory in decimal megabytes, rounded up, e.g. `512MB`
pub fn format_memory(bytes: i64) -> String {
    const MB: i64 = 1_000_000;
    let megabytes = if bytes > 0 { (bytes + MB - 1) / MB } else { bytes / MB };
    format!("{}MB", megabytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_percentage() {
        assert_eq!(format_percentage(12.345_6), "12.35%");
        assert_eq!(format_percentage(0.0), "0.00%");
    }

    #[test]
    fn test_format_cpu() {
        assert_eq!(format_cpu(250), "250m");
        assert_eq!(format_cpu(4000), "4000m");
    }

    #[test]
    fn test_format_memory_rounds_up() {
        assert_eq!(format_memory(512_000_000), "512MB");
        assert_eq!(format_memory(1), "1MB");
        assert_eq!(format_memory(0), "0MB");
        assert_eq!(format_memory(1024 * 1024 * 1024), "1074MB");
    }
}
