//! Naming of timestamped backup artifacts.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// Suffix stamped on every artifact, in UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

// `<stem>_YYYYMMDD_HHMMSS` optionally followed by a single extension.
static MANAGED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"_\d{8}_\d{6}(\.[^.]+)?$").expect("artifact pattern is valid")
});

/// Name of the artifact produced by backing up `source` at `at`.
///
/// Directories become `<basename>_<ts>`; files keep their extension after the
/// timestamp, so `report.csv` becomes `report_<ts>.csv`.
pub fn artifact_name(source: &Path, is_dir: bool, at: DateTime<Utc>) -> String {
    let stamp = at.format(TIMESTAMP_FORMAT);

    if is_dir {
        let base = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "backup".to_string());
        return format!("{base}_{stamp}");
    }

    let stem = source
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".to_string());
    match source.extension() {
        Some(ext) => format!("{stem}_{stamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{stamp}"),
    }
}

/// Whether an entry name carries the artifact timestamp suffix.
pub fn is_managed_artifact(name: &str) -> bool {
    MANAGED_RE.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
    }

    #[test]
    fn file_artifact_keeps_extension() {
        assert_eq!(
            artifact_name(Path::new("/data/report.csv"), false, at()),
            "report_20240115_100000.csv"
        );
    }

    #[test]
    fn directory_artifact_uses_basename() {
        assert_eq!(
            artifact_name(Path::new("/srv/photos/"), true, at()),
            "photos_20240115_100000"
        );
    }

    #[test]
    fn extensionless_file() {
        assert_eq!(
            artifact_name(Path::new("/etc/hosts"), false, at()),
            "hosts_20240115_100000"
        );
    }

    #[test]
    fn recognises_managed_names() {
        assert!(is_managed_artifact("photos_20240115_100000"));
        assert!(is_managed_artifact("report_20240115_100000.csv"));
        assert!(!is_managed_artifact("report.csv"));
        assert!(!is_managed_artifact("photos_2024_01"));
        assert!(!is_managed_artifact("dump_20240115_100000.tar.gz"));
    }
}
