//! Column-stored numeric dataset.
//!
//! A [`Dataset`] is an ordered collection of records, each mapping a variable
//! name to an `f64`. It is stored column-wise because every estimator reads
//! whole columns. Datasets are values: the derivation helpers
//! (`with_column`, `replace_column`, `select_rows`) return new datasets.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Serialized form: parallel `names` / `columns` arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawDataset {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

/// Ordered numeric records stored as named columns of equal length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDataset", into = "RawDataset")]
pub struct Dataset {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
    n_rows: usize,
}

impl TryFrom<RawDataset> for Dataset {
    type Error = Error;

    fn try_from(raw: RawDataset) -> Result<Self> {
        if raw.names.len() != raw.columns.len() {
            return Err(Error::Validation(format!(
                "dataset has {} names but {} columns",
                raw.names.len(),
                raw.columns.len()
            )));
        }
        Dataset::from_columns(raw.names.into_iter().zip(raw.columns).collect())
    }
}

impl From<Dataset> for RawDataset {
    fn from(ds: Dataset) -> Self {
        RawDataset { names: ds.names, columns: ds.columns }
    }
}

impl Dataset {
    /// Build a dataset from `(name, values)` pairs.
    ///
    /// Names must be non-empty and unique; all columns must have the same length.
    /// Values are not checked for finiteness here; see [`Dataset::validate_columns`].
    pub fn from_columns(columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
        let n_rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut names = Vec::with_capacity(columns.len());
        let mut data = Vec::with_capacity(columns.len());
        for (name, values) in columns {
            if name.trim().is_empty() {
                return Err(Error::invalid_dataset(
                    name,
                    "column name must be non-empty",
                    "give every column a header",
                ));
            }
            if names.contains(&name) {
                return Err(Error::invalid_dataset(
                    name,
                    "duplicate column name",
                    "rename or drop the duplicated column",
                ));
            }
            if values.len() != n_rows {
                return Err(Error::invalid_dataset(
                    name,
                    format!("column has {} rows, expected {}", values.len(), n_rows),
                    "all columns must have the same number of rows",
                ));
            }
            names.push(name);
            data.push(values);
        }
        Ok(Self { names, columns: data, n_rows })
    }

    /// Parse the ingestion format: an array of JSON objects with numeric fields.
    ///
    /// The column set is taken from the first record; every record must carry
    /// exactly those keys with JSON number values.
    pub fn from_json_records(records: &[serde_json::Value]) -> Result<Self> {
        let Some(first) = records.first() else {
            return Ok(Self { names: Vec::new(), columns: Vec::new(), n_rows: 0 });
        };
        let first = first.as_object().ok_or_else(|| {
            Error::invalid_dataset("<record 0>", "record is not an object", "supply rows as JSON objects")
        })?;
        let names: Vec<String> = first.keys().cloned().collect();
        let mut columns: Vec<Vec<f64>> =
            names.iter().map(|_| Vec::with_capacity(records.len())).collect();

        for (row, record) in records.iter().enumerate() {
            let obj = record.as_object().ok_or_else(|| {
                Error::invalid_dataset(
                    format!("<record {row}>"),
                    "record is not an object",
                    "supply rows as JSON objects",
                )
            })?;
            if obj.len() != names.len() {
                let extra = obj.keys().find(|k| !names.contains(k)).cloned();
                return Err(Error::invalid_dataset(
                    extra.unwrap_or_else(|| format!("<record {row}>")),
                    format!("record {row} has {} fields, expected {}", obj.len(), names.len()),
                    "every row must have the same columns",
                ));
            }
            for (name, column) in names.iter().zip(columns.iter_mut()) {
                let value = obj.get(name).ok_or_else(|| {
                    Error::invalid_dataset(
                        name,
                        format!("missing in record {row}"),
                        "every row must have the same columns",
                    )
                })?;
                let v = value.as_f64().ok_or_else(|| {
                    Error::invalid_dataset(
                        name,
                        format!("non-numeric entry {value} in record {row}"),
                        "clean the column so it only contains numbers",
                    )
                })?;
                column.push(v);
            }
        }
        Self::from_columns(names.into_iter().zip(columns).collect())
    }

    /// Parse a JSON array of records (see [`Dataset::from_json_records`]).
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let records = value.as_array().ok_or_else(|| {
            Error::invalid_dataset("<root>", "expected a JSON array of records", "wrap rows in [...]")
        })?;
        Self::from_json_records(records)
    }

    /// Export as an array of JSON objects (the ingestion format).
    pub fn to_json_records(&self) -> Vec<serde_json::Value> {
        (0..self.n_rows)
            .map(|i| {
                let mut obj = serde_json::Map::with_capacity(self.names.len());
                for (name, col) in self.names.iter().zip(&self.columns) {
                    obj.insert(name.clone(), serde_json::json!(col[i]));
                }
                serde_json::Value::Object(obj)
            })
            .collect()
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of columns.
    pub fn n_columns(&self) -> usize {
        self.names.len()
    }

    /// Column names in storage order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Whether a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Borrow a column by name.
    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_slice())
            .ok_or_else(|| {
                Error::invalid_dataset(
                    name,
                    "column not found",
                    format!("available columns: {}", self.names.join(", ")),
                )
            })
    }

    /// Boundary validation for a set of declared variables.
    ///
    /// Fails when the dataset has no rows, or when a declared column is missing
    /// or contains non-finite values.
    pub fn validate_columns(&self, declared: &[&str]) -> Result<()> {
        if self.n_rows == 0 {
            let column = declared.first().copied().unwrap_or("<dataset>");
            return Err(Error::invalid_dataset(
                column,
                "dataset has no rows",
                "load data with at least one row (200+ recommended)",
            ));
        }
        for &name in declared {
            let col = self.column(name)?;
            if let Some(row) = col.iter().position(|v| !v.is_finite()) {
                return Err(Error::invalid_dataset(
                    name,
                    format!("non-finite value {} at row {row}", col[row]),
                    "drop or impute missing values before analysis",
                ));
            }
        }
        Ok(())
    }

    /// New dataset with an extra column appended.
    pub fn with_column(&self, name: impl Into<String>, values: Vec<f64>) -> Result<Self> {
        let name = name.into();
        if self.has_column(&name) {
            return Err(Error::invalid_dataset(
                name,
                "column already exists",
                "choose a different column name",
            ));
        }
        if values.len() != self.n_rows {
            return Err(Error::invalid_dataset(
                name,
                format!("column has {} rows, expected {}", values.len(), self.n_rows),
                "new columns must match the dataset length",
            ));
        }
        let mut out = self.clone();
        out.names.push(name);
        out.columns.push(values);
        Ok(out)
    }

    /// New dataset with one column's values replaced.
    pub fn replace_column(&self, name: &str, values: Vec<f64>) -> Result<Self> {
        let idx = self.names.iter().position(|n| n == name).ok_or_else(|| {
            Error::invalid_dataset(name, "column not found", "replace an existing column")
        })?;
        if values.len() != self.n_rows {
            return Err(Error::invalid_dataset(
                name,
                format!("column has {} rows, expected {}", values.len(), self.n_rows),
                "replacement must match the dataset length",
            ));
        }
        let mut out = self.clone();
        out.columns[idx] = values;
        Ok(out)
    }

    /// New dataset made of the given rows (in the given order; repeats allowed).
    pub fn select_rows(&self, rows: &[usize]) -> Result<Self> {
        if let Some(&bad) = rows.iter().find(|&&r| r >= self.n_rows) {
            return Err(Error::Validation(format!(
                "row index {bad} out of range for dataset with {} rows",
                self.n_rows
            )));
        }
        let columns = self.columns.iter().map(|col| rows.iter().map(|&r| col[r]).collect()).collect();
        Ok(Self { names: self.names.clone(), columns, n_rows: rows.len() })
    }
}
