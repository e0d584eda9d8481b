use camino::{Utf8Path, Utf8PathBuf};
use csv::{ReaderBuilder, WriterBuilder};
use tracing::warn;

use crate::error::CurateError;
use crate::fs_util;

/// A delimited registry file (participants, scans) with one header row.
/// Column order is preserved exactly as read and reproduced on save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Registry {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn load(path: &Utf8Path) -> Result<Self, CurateError> {
        if !path.as_std_path().is_file() {
            return Err(CurateError::MissingFile(path.to_path_buf()));
        }
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(false)
            .from_path(path.as_std_path())
            .map_err(|err| CurateError::Registry {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        let columns = reader
            .headers()
            .map_err(|err| CurateError::Registry {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?
            .iter()
            .map(str::to_string)
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| CurateError::Registry {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(Self { columns, rows })
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), CurateError> {
        let mut writer = WriterBuilder::new().delimiter(b'\t').from_writer(Vec::new());
        writer
            .write_record(&self.columns)
            .map_err(|err| CurateError::Registry {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        for row in &self.rows {
            writer
                .write_record(row)
                .map_err(|err| CurateError::Registry {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                })?;
        }
        let buf = writer
            .into_inner()
            .map_err(|err| CurateError::Registry {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        fs_util::write_bytes_atomic(path, &buf)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col == name)
    }

    pub fn set_cell(&mut self, row: usize, column: usize, value: String) {
        self.rows[row][column] = value;
    }

    pub fn push_row(&mut self, row: Vec<String>) -> Result<(), CurateError> {
        if row.len() != self.columns.len() {
            return Err(CurateError::Registry {
                path: Utf8PathBuf::from("(in-memory)"),
                message: format!(
                    "row has {} cells, registry has {} columns",
                    row.len(),
                    self.columns.len()
                ),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Drop columns whose per-row values duplicate an earlier column,
    /// keeping the first occurrence. Defends against the converter
    /// emitting the same column twice in participants files.
    pub fn dedup_columns(&mut self) {
        let mut keep = Vec::new();
        let mut seen: Vec<Vec<&String>> = Vec::new();
        for (idx, _) in self.columns.iter().enumerate() {
            let values: Vec<&String> = self.rows.iter().map(|row| &row[idx]).collect();
            if seen.contains(&values) {
                continue;
            }
            seen.push(values);
            keep.push(idx);
        }
        if keep.len() == self.columns.len() {
            return;
        }
        let columns = keep.iter().map(|&idx| self.columns[idx].clone()).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| keep.iter().map(|&idx| row[idx].clone()).collect())
            .collect();
        self.columns = columns;
        self.rows = rows;
    }

    /// Cell-wise equality of `self`'s row against `other`'s row.
    /// Registries with different column sets never match: a row
    /// carrying a column the other table lacks is new data, not a
    /// duplicate.
    pub fn row_matches(&self, row: usize, other: &Registry, other_row: usize) -> bool {
        if self.columns.len() != other.columns.len() {
            return false;
        }
        self.columns.iter().enumerate().all(|(idx, column)| {
            other
                .column_index(column)
                .is_some_and(|other_idx| self.rows[row][idx] == other.rows[other_row][other_idx])
        })
    }

    /// Append every row of `other`, reordered to this registry's column
    /// order. The receiver's column set is authoritative: a column it
    /// lacks in `other` is an error, extra columns in `other` are
    /// dropped with a warning.
    pub fn append_with_columns(&mut self, other: &Registry) -> Result<(), CurateError> {
        for column in other.columns() {
            if self.column_index(column).is_none() {
                warn!(column = %column, "dropping column not present in master registry");
            }
        }
        let mapping: Vec<usize> = self
            .columns
            .iter()
            .map(|column| {
                other.column_index(column).ok_or_else(|| CurateError::Registry {
                    path: Utf8PathBuf::from("(in-memory)"),
                    message: format!("appended rows lack column {column}"),
                })
            })
            .collect::<Result<_, _>>()?;
        for row in other.rows() {
            self.rows
                .push(mapping.iter().map(|&idx| row[idx].clone()).collect());
        }
        Ok(())
    }

    /// Add a bookkeeping column with a constant default, e.g. `remove`
    /// or `annotation`.
    pub fn add_column(&mut self, name: &str, default: &str) {
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(default.to_string());
        }
    }

    /// Replace empty cells with a constant. Mirrors the NaN fill needed
    /// before feeding QC tables to the classifier.
    pub fn fill_empty(&mut self, value: &str) {
        for row in &mut self.rows {
            for cell in row {
                if cell.is_empty() {
                    *cell = value.to_string();
                }
            }
        }
    }
}
