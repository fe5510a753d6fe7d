//! Listing of published digests, grouped by month.

use std::path::Path;

use chrono::NaiveDate;
use serde::Serialize;

use moltdigest_shared::{DateKey, DigestError, Result};

/// Published digests of one calendar month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthGroup {
    /// `YYYY-MM`
    pub month: String,
    /// `YYYY-MM-DD.md` basenames, newest first.
    pub days: Vec<String>,
}

/// Published digests under `reports_dir`, newest month first.
///
/// Only `YYYY-MM` directories and `YYYY-MM-DD.md` files of that month count.
/// A missing directory is an empty archive.
pub fn list_published(reports_dir: &Path) -> Result<Vec<MonthGroup>> {
    let entries = match std::fs::read_dir(reports_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(DigestError::io(reports_dir, e)),
    };

    let mut groups = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DigestError::io(reports_dir, e))?;
        let path = entry.path();
        let Some(month) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !path.is_dir() || !is_month(month) {
            continue;
        }

        let mut days = Vec::new();
        for file in std::fs::read_dir(&path).map_err(|e| DigestError::io(&path, e))? {
            let file = file.map_err(|e| DigestError::io(&path, e))?;
            let Some(name) = file.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let in_month = name
                .strip_suffix(".md")
                .and_then(|stem| stem.parse::<DateKey>().ok())
                .is_some_and(|key| key.month_dir() == month && key.file_name() == name);
            if in_month && file.path().is_file() {
                days.push(name);
            }
        }
        if days.is_empty() {
            continue;
        }
        days.sort_unstable_by(|a, b| b.cmp(a));
        groups.push(MonthGroup {
            month: month.to_string(),
            days,
        });
    }

    groups.sort_unstable_by(|a, b| b.month.cmp(&a.month));
    Ok(groups)
}

fn is_month(name: &str) -> bool {
    name.len() == 7
        && NaiveDate::parse_from_str(&format!("{name}-01"), "%Y-%m-%d")
            .is_ok_and(|d| d.format("%Y-%m").to_string() == name)
}
