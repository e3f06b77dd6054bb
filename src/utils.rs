use std::fs;
use std::path::Path;

/// Clickable file:// hyperlink (OSC 8) for terminal summaries
pub fn osc8_file_link(path: &Path) -> String {
    let abs_path = fs::canonicalize(path)
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| path.to_string_lossy().to_string());
    format!(
        "\x1b]8;;file://{}\x1b\\{}\x1b]8;;\x1b\\",
        abs_path,
        path.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_osc8_file_link_wraps_display_path() {
        let dir = tempfile::tempdir().unwrap();
        let link = osc8_file_link(dir.path());
        assert!(link.starts_with("\x1b]8;;file://"));
        assert!(link.ends_with("\x1b]8;;\x1b\\"));
        assert!(link.contains(&dir.path().display().to_string()));
    }
}
