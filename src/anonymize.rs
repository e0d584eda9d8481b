use camino::Utf8Path;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::info;

use crate::error::CurateError;
use crate::layout::Layout;
use crate::registry::Registry;

/// All acquisition dates are rebased so a subject's first scan lands on
/// this day. Only the date moves; time of day survives.
const BASELINE: NaiveDate = match NaiveDate::from_ymd_opt(1800, 1, 1) {
    Some(date) => date,
    None => unreachable!(),
};

const ACQ_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, Clone, Serialize)]
pub struct AnonymizeResult {
    pub registries_updated: usize,
}

/// Strip identifying acquisition dates from every scans registry in a
/// dataset. In a longitudinal study the shift is fixed by the first
/// session, so gaps between sessions are preserved. Run only after
/// data collection for the study is complete.
pub fn anonymize_acq_times(root: &Utf8Path) -> Result<AnonymizeResult, CurateError> {
    let layout = Layout::new(root.to_path_buf())?;
    let mut registries_updated = 0;

    for subject in layout.subjects()? {
        let sessions = layout.sessions(&subject)?;
        if sessions.is_empty() {
            let path = layout.scans_registry_path(&subject, None);
            let mut registry = Registry::load(&path)?;
            let offset = subject_offset(&registry, &path)?;
            shift_acq_times(&mut registry, &path, offset)?;
            registry.save(&path)?;
            registries_updated += 1;
        } else {
            // Sessions a subject missed do not reset the offset.
            let mut offset = None;
            for session in &sessions {
                let path = layout.scans_registry_path(&subject, Some(session));
                let mut registry = Registry::load(&path)?;
                let days = match offset {
                    Some(days) => days,
                    None => {
                        let days = subject_offset(&registry, &path)?;
                        offset = Some(days);
                        days
                    }
                };
                shift_acq_times(&mut registry, &path, days)?;
                registry.save(&path)?;
                registries_updated += 1;
            }
        }
    }

    info!(registries_updated, "acquisition times anonymized");
    Ok(AnonymizeResult { registries_updated })
}

/// Whole days between the subject's earliest acquisition date and the
/// baseline.
fn subject_offset(registry: &Registry, path: &Utf8Path) -> Result<Duration, CurateError> {
    let column = acq_time_column(registry, path)?;
    let mut earliest: Option<NaiveDateTime> = None;
    for row in registry.rows() {
        if let Some(parsed) = parse_acq_time(&row[column], path)? {
            earliest = Some(match earliest {
                Some(current) => current.min(parsed),
                None => parsed,
            });
        }
    }
    let earliest = earliest.ok_or_else(|| CurateError::Registry {
        path: path.to_path_buf(),
        message: "no parsable acq_time values".to_string(),
    })?;
    Ok(Duration::days((earliest.date() - BASELINE).num_days()))
}

fn shift_acq_times(
    registry: &mut Registry,
    path: &Utf8Path,
    offset: Duration,
) -> Result<(), CurateError> {
    let column = acq_time_column(registry, path)?;
    for row in 0..registry.rows().len() {
        let cell = registry.rows()[row][column].clone();
        let Some(parsed) = parse_acq_time(&cell, path)? else {
            continue;
        };
        let shifted = parsed - offset;
        registry.set_cell(row, column, shifted.format(ACQ_TIME_FORMAT).to_string());
    }
    Ok(())
}

fn acq_time_column(registry: &Registry, path: &Utf8Path) -> Result<usize, CurateError> {
    registry
        .column_index("acq_time")
        .ok_or_else(|| CurateError::Registry {
            path: path.to_path_buf(),
            message: "missing acq_time column".to_string(),
        })
}

/// Converters are not consistent about the datetime shape: `T` and
/// space separators and a trailing zone suffix all occur in the wild.
/// An unparsable non-blank cell is fatal, because skipping it would
/// leave a real date in the anonymized registry.
fn parse_acq_time(cell: &str, path: &Utf8Path) -> Result<Option<NaiveDateTime>, CurateError> {
    if cell.is_empty() || cell == "n/a" {
        return Ok(None);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(cell, format) {
            return Ok(Some(parsed));
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(cell) {
        return Ok(Some(parsed.naive_local()));
    }
    Err(CurateError::Registry {
        path: path.to_path_buf(),
        message: format!("unparsable acq_time value {cell:?}"),
    })
}
