//! Tabular data loading and the in-memory feature table

use crate::error::{Error, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Opaque identifier column; never participates in distance computation
pub const CUSTOMER_ID: &str = "CustomerID";
/// Cluster assignment column attached to the labeled dataset
pub const CLUSTER: &str = "Cluster";
/// Derived column: PurchaseFrequency * AvgOrderValue
pub const TOTAL_SPEND: &str = "TotalSpend";
/// Purchases per year
pub const PURCHASE_FREQUENCY: &str = "PurchaseFrequency";
/// Average order value
pub const AVG_ORDER_VALUE: &str = "AvgOrderValue";

/// A single cell of a feature table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Numeric attribute
    Number(f64),
    /// Categorical attribute
    Text(String),
    /// Absent entry, imputed during preprocessing
    Missing,
}

impl Value {
    /// Numeric view of the cell, if it holds a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Text view of the cell, if it holds a category
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Whether the cell is missing
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    fn parse(field: &str) -> Value {
        let trimmed = field.trim();
        if trimmed.is_empty() {
            Value::Missing
        } else if let Ok(v) = trimmed.parse::<f64>() {
            Value::Number(v)
        } else {
            Value::Text(trimmed.to_string())
        }
    }

    fn render(&self) -> String {
        match self {
            Value::Number(v) => format!("{}", v),
            Value::Text(v) => v.clone(),
            Value::Missing => String::new(),
        }
    }
}

/// Ordered collection of named columns sharing one row index.
///
/// `row_ids` records each row's position in the table the instance was
/// originally built from, so rows dropped by outlier filtering can be
/// re-associated with their source rows later.
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    names: Vec<String>,
    columns: Vec<Vec<Value>>,
    row_ids: Vec<usize>,
}

impl FeatureTable {
    /// Create an empty table with the given column names
    pub fn new(names: Vec<String>) -> Self {
        let columns = names.iter().map(|_| Vec::new()).collect();
        Self {
            names,
            columns,
            row_ids: Vec::new(),
        }
    }

    /// Load a table from a headered CSV file.
    ///
    /// Empty fields become [`Value::Missing`], fields parsing as `f64` become
    /// [`Value::Number`], everything else [`Value::Text`]. `TotalSpend` is
    /// derived when absent.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut reader = csv::Reader::from_reader(BufReader::new(file));

        let names: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if names.is_empty() {
            return Err(Error::invalid_data("CSV file has no header row"));
        }

        let mut table = FeatureTable::new(names);
        for record in reader.records() {
            let record = record?;
            if record.len() != table.names.len() {
                return Err(Error::invalid_data(format!(
                    "row {} has {} fields, expected {}",
                    table.n_rows() + 1,
                    record.len(),
                    table.names.len()
                )));
            }
            let row: Vec<Value> = record.iter().map(Value::parse).collect();
            table.push_row(row)?;
        }

        table.ensure_total_spend();
        Ok(table)
    }

    /// Write the table as a headered CSV file, creating parent directories
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path.as_ref())?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));
        writer.write_record(&self.names)?;
        for row in 0..self.n_rows() {
            let record: Vec<String> = self.columns.iter().map(|col| col[row].render()).collect();
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Derive `TotalSpend` from `PurchaseFrequency` and `AvgOrderValue` when
    /// the column is not already present. Rows where either factor is missing
    /// get a missing total.
    pub fn ensure_total_spend(&mut self) {
        if self.column(TOTAL_SPEND).is_some() {
            return;
        }
        let (freq, aov) = match (self.column(PURCHASE_FREQUENCY), self.column(AVG_ORDER_VALUE)) {
            (Some(f), Some(a)) => (f.to_vec(), a.to_vec()),
            _ => return,
        };
        let total: Vec<Value> = freq
            .iter()
            .zip(aov.iter())
            .map(|(f, a)| match (f.as_number(), a.as_number()) {
                (Some(f), Some(a)) => Value::Number(f * a),
                _ => Value::Missing,
            })
            .collect();
        self.names.push(TOTAL_SPEND.to_string());
        self.columns.push(total);
    }

    /// Number of rows
    pub fn n_rows(&self) -> usize {
        self.row_ids.len()
    }

    /// Whether the table has no rows
    pub fn is_empty(&self) -> bool {
        self.row_ids.is_empty()
    }

    /// Column names in order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Original row identities of the current rows
    pub fn row_ids(&self) -> &[usize] {
        &self.row_ids
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Cells of the named column, if present
    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.index_of(name).map(|i| self.columns[i].as_slice())
    }

    /// Mutable cells of the named column, if present
    pub fn column_mut(&mut self, name: &str) -> Option<&mut Vec<Value>> {
        self.index_of(name).map(|i| &mut self.columns[i])
    }

    /// Append a row; fails on arity mismatch
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.names.len() {
            return Err(Error::invalid_data(format!(
                "row has {} fields, expected {}",
                row.len(),
                self.names.len()
            )));
        }
        for (column, value) in self.columns.iter_mut().zip(row) {
            column.push(value);
        }
        self.row_ids.push(self.row_ids.len());
        Ok(())
    }

    /// Append a new column at the end; fails on duplicate name or length mismatch
    pub fn add_column(&mut self, name: impl Into<String>, values: Vec<Value>) -> Result<()> {
        self.insert_column(self.names.len(), name, values)
    }

    /// Insert a new column at the given position
    pub fn insert_column(
        &mut self,
        index: usize,
        name: impl Into<String>,
        values: Vec<Value>,
    ) -> Result<()> {
        let name = name.into();
        if self.index_of(&name).is_some() {
            return Err(Error::invalid_data(format!("duplicate column '{}'", name)));
        }
        if values.len() != self.n_rows() {
            return Err(Error::invalid_data(format!(
                "column '{}' has {} values, expected {}",
                name,
                values.len(),
                self.n_rows()
            )));
        }
        self.names.insert(index, name);
        self.columns.insert(index, values);
        Ok(())
    }

    /// Detach and return a column, or None if absent
    pub fn remove_column(&mut self, name: &str) -> Option<Vec<Value>> {
        let index = self.index_of(name)?;
        self.names.remove(index);
        Some(self.columns.remove(index))
    }

    /// Keep only rows where `keep` is true; row identities are preserved
    pub fn retain_rows(&mut self, keep: &[bool]) {
        debug_assert_eq!(keep.len(), self.n_rows());
        for column in &mut self.columns {
            let mut it = keep.iter();
            column.retain(|_| *it.next().unwrap());
        }
        let mut it = keep.iter();
        self.row_ids.retain(|_| *it.next().unwrap());
    }

    /// New table holding the rows whose original identity satisfies `pred`
    pub fn subset_by_row_id<F: Fn(usize) -> bool>(&self, pred: F) -> Self {
        let keep: Vec<bool> = self.row_ids.iter().map(|&id| pred(id)).collect();
        let mut subset = self.clone();
        subset.retain_rows(&keep);
        subset
    }

    /// Columns whose non-missing cells are all numeric
    pub fn numeric_columns(&self) -> Vec<String> {
        self.typed_columns(|values| values.iter().all(|v| !matches!(v, Value::Text(_))))
    }

    /// Columns whose non-missing cells are all categorical
    pub fn categorical_columns(&self) -> Vec<String> {
        self.typed_columns(|values| {
            values.iter().any(|v| matches!(v, Value::Text(_)))
                && values.iter().all(|v| !matches!(v, Value::Number(_)))
        })
    }

    fn typed_columns<F: Fn(&[Value]) -> bool>(&self, pred: F) -> Vec<String> {
        self.names
            .iter()
            .zip(self.columns.iter())
            .filter(|(_, values)| !values.is_empty() && pred(values))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Dense row-major matrix view of a fully numeric table
    pub fn to_matrix(&self) -> Result<Array2<f64>> {
        let n_rows = self.n_rows();
        let n_cols = self.names.len();
        let mut flat = Vec::with_capacity(n_rows * n_cols);
        for row in 0..n_rows {
            for (name, column) in self.names.iter().zip(self.columns.iter()) {
                match column[row].as_number() {
                    Some(v) => flat.push(v),
                    None => {
                        return Err(Error::invalid_data(format!(
                            "column '{}' is not fully numeric at row {}",
                            name, row
                        )))
                    }
                }
            }
        }
        Array2::from_shape_vec((n_rows, n_cols), flat)
            .map_err(|e| Error::invalid_data(format!("matrix shape error: {}", e)))
    }
}

/// Raw attributes of a single customer, as submitted by external callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerProfile {
    /// Age in years
    pub age: f64,
    /// Gender label
    pub gender: String,
    /// Annual income
    pub income: f64,
    /// Spending score, 1-100
    pub spending_score: f64,
    /// Region label
    pub region: String,
    /// Purchases per year
    pub purchase_frequency: f64,
    /// Average order value
    pub avg_order_value: f64,
    /// Days since last purchase, 0-365
    pub recency: f64,
}

impl CustomerProfile {
    /// Single-row feature table with `TotalSpend` derived, matching the
    /// training-table schema minus `CustomerID`
    pub fn to_table(&self) -> FeatureTable {
        let mut table = FeatureTable::new(
            [
                "Age",
                "Gender",
                "Income",
                "SpendingScore",
                "Region",
                PURCHASE_FREQUENCY,
                AVG_ORDER_VALUE,
                "Recency",
                TOTAL_SPEND,
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        );
        table
            .push_row(vec![
                Value::Number(self.age),
                Value::Text(self.gender.clone()),
                Value::Number(self.income),
                Value::Number(self.spending_score),
                Value::Text(self.region.clone()),
                Value::Number(self.purchase_frequency),
                Value::Number(self.avg_order_value),
                Value::Number(self.recency),
                Value::Number(self.purchase_frequency * self.avg_order_value),
            ])
            .expect("profile row matches schema");
        table
    }
}

/// Load a previously written labeled dataset (original table plus `Cluster`)
pub fn load_labeled_dataset<P: AsRef<Path>>(path: P) -> Result<FeatureTable> {
    let table = FeatureTable::from_csv(path)?;
    if table.column(CLUSTER).is_none() {
        return Err(Error::invalid_data(format!(
            "labeled dataset is missing the '{}' column",
            CLUSTER
        )));
    }
    Ok(table)
}
