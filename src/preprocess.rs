//! Deterministic cleaning, encoding and scaling with a fit/transform split.
//!
//! A [`Preprocessor`] learns per-column statistics the first time a column is
//! processed with `fit=true` and reapplies them unchanged afterwards. State is
//! write-once per column: transform calls never mutate it, and repeated fit
//! calls reuse whatever was already learned. The only way to reset is to
//! construct a new instance.

use crate::data::{FeatureTable, Value, CUSTOMER_ID};
use crate::error::{Error, Result};
use crate::stats;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Z-score threshold used by the pipeline's outlier pass
pub const OUTLIER_Z_THRESHOLD: f64 = 3.0;

/// Fitted imputation value for one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImputeValue {
    /// Median of the numeric values observed at fit time
    Median(f64),
    /// Most frequent category observed at fit time
    MostFrequent(String),
}

/// Fitted standardization parameters for one column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnScale {
    /// Column mean at fit time
    pub mean: f64,
    /// Column population standard deviation at fit time
    pub std: f64,
}

/// Holds all fitted per-column state: imputation values, category code maps
/// (first-seen order) and scaling parameters, plus the canonical feature
/// column schema recorded at fit time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    imputers: BTreeMap<String, ImputeValue>,
    encoders: BTreeMap<String, Vec<String>>,
    scales: BTreeMap<String, ColumnScale>,
    feature_columns: Option<Vec<String>>,
}

impl Preprocessor {
    /// Create an empty, unfitted preprocessor
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `preprocess` has run with `fit=true` at least once
    pub fn is_fitted(&self) -> bool {
        self.feature_columns.is_some()
    }

    /// Category list for an encoded column; index position is the code
    pub fn categories(&self, column: &str) -> Option<&[String]> {
        self.encoders.get(column).map(|c| c.as_slice())
    }

    /// Recover the category string assigned a given code at fit time
    pub fn decode_category(&self, column: &str, code: usize) -> Result<&str> {
        let categories = self
            .encoders
            .get(column)
            .ok_or_else(|| Error::state(column, "no fitted category codes"))?;
        categories
            .get(code)
            .map(|s| s.as_str())
            .ok_or_else(|| Error::state(column, format!("no category with code {}", code)))
    }

    /// Replace missing entries using stored per-column imputation values.
    ///
    /// With `fit=true`, columns seen for the first time get their value fitted
    /// (numeric median, categorical most-frequent). With `fit=false`, a
    /// missing entry in a never-fit column is a caller-sequencing defect and
    /// fails with a state error.
    pub fn handle_missing_values(&mut self, table: &mut FeatureTable, fit: bool) -> Result<()> {
        for name in table.numeric_columns() {
            self.impute_column(table, &name, fit, false)?;
        }
        for name in table.categorical_columns() {
            self.impute_column(table, &name, fit, true)?;
        }
        Ok(())
    }

    fn impute_column(
        &mut self,
        table: &mut FeatureTable,
        name: &str,
        fit: bool,
        categorical: bool,
    ) -> Result<()> {
        let values = match table.column(name) {
            Some(v) => v,
            None => return Ok(()),
        };
        if !values.iter().any(Value::is_missing) {
            return Ok(());
        }

        if !self.imputers.contains_key(name) {
            if !fit {
                return Err(Error::state(
                    name,
                    "missing values at inference time but no fitted imputation value",
                ));
            }
            let fitted = if categorical {
                let observed: Vec<&str> = values.iter().filter_map(Value::as_text).collect();
                let mode = stats::most_frequent(&observed).ok_or_else(|| {
                    Error::invalid_data(format!("column '{}' has no observed categories", name))
                })?;
                ImputeValue::MostFrequent(mode)
            } else {
                let observed: Vec<f64> = values.iter().filter_map(Value::as_number).collect();
                if observed.is_empty() {
                    return Err(Error::invalid_data(format!(
                        "column '{}' has no observed numeric values",
                        name
                    )));
                }
                ImputeValue::Median(stats::median(&observed))
            };
            self.imputers.insert(name.to_string(), fitted);
        }

        let fill = match (&self.imputers[name], categorical) {
            (ImputeValue::Median(v), false) => Value::Number(*v),
            (ImputeValue::MostFrequent(v), true) => Value::Text(v.clone()),
            _ => {
                return Err(Error::state(
                    name,
                    "fitted imputation value does not match the column type",
                ))
            }
        };
        let column = table.column_mut(name).expect("column checked above");
        for cell in column.iter_mut() {
            if cell.is_missing() {
                *cell = fill.clone();
            }
        }
        Ok(())
    }

    /// Count per-column values whose |z-score| exceeds `threshold`.
    ///
    /// Mean and standard deviation come from the table as given, not from
    /// fitted state. Columns with zero standard deviation are skipped.
    pub fn detect_outliers(
        &self,
        table: &FeatureTable,
        columns: &[String],
        threshold: f64,
    ) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for name in columns {
            let values = match table.column(name) {
                Some(v) => v,
                None => continue,
            };
            let nums: Vec<f64> = values.iter().filter_map(Value::as_number).collect();
            let mean = stats::mean(&nums);
            let std = stats::std_dev(&nums);
            if std == 0.0 {
                continue;
            }
            let count = nums
                .iter()
                .filter(|&&v| ((v - mean) / std).abs() > threshold)
                .count();
            counts.insert(name.clone(), count);
        }
        counts
    }

    /// Drop every row where any listed column's |z-score| exceeds `threshold`.
    ///
    /// Filtering is sequential per column and recomputes mean/std from the
    /// rows still present, mirroring the detection pass; nothing here touches
    /// fitted state.
    pub fn remove_outliers(&self, table: &mut FeatureTable, columns: &[String], threshold: f64) {
        for name in columns {
            let values = match table.column(name) {
                Some(v) => v,
                None => continue,
            };
            let nums: Vec<f64> = values.iter().filter_map(Value::as_number).collect();
            let mean = stats::mean(&nums);
            let std = stats::std_dev(&nums);
            if std == 0.0 {
                continue;
            }
            let keep: Vec<bool> = values
                .iter()
                .map(|cell| match cell.as_number() {
                    Some(v) => ((v - mean) / std).abs() <= threshold,
                    None => true,
                })
                .collect();
            table.retain_rows(&keep);
        }
    }

    /// Integer-code categorical columns using stored code maps.
    ///
    /// Codes are assigned in first-seen order at fit time. With `fit=false`,
    /// a category unseen at fit time fails with [`Error::UnknownCategory`];
    /// a never-fit column fails with a state error.
    pub fn encode_categorical(
        &mut self,
        table: &mut FeatureTable,
        columns: &[String],
        fit: bool,
    ) -> Result<()> {
        for name in columns {
            let values = match table.column(name) {
                Some(v) => v.to_vec(),
                None => continue,
            };

            if !self.encoders.contains_key(name) {
                if !fit {
                    return Err(Error::state(name.clone(), "no fitted category codes"));
                }
                let mut categories: Vec<String> = Vec::new();
                for cell in &values {
                    match cell {
                        Value::Text(s) => {
                            if !categories.iter().any(|c| c == s) {
                                categories.push(s.clone());
                            }
                        }
                        Value::Number(_) | Value::Missing => {
                            return Err(Error::invalid_data(format!(
                                "column '{}' holds non-categorical values during encoding",
                                name
                            )))
                        }
                    }
                }
                self.encoders.insert(name.clone(), categories);
            }

            let categories = &self.encoders[name];
            let mut encoded = Vec::with_capacity(values.len());
            for cell in &values {
                let text = cell.as_text().ok_or_else(|| {
                    Error::invalid_data(format!(
                        "column '{}' holds non-categorical values during encoding",
                        name
                    ))
                })?;
                let code = categories
                    .iter()
                    .position(|c| c == text)
                    .ok_or_else(|| Error::unknown_category(name.clone(), text))?;
                encoded.push(Value::Number(code as f64));
            }
            *table.column_mut(name).expect("column checked above") = encoded;
        }
        Ok(())
    }

    /// Standardize every column to zero mean and unit variance using stored
    /// per-column parameters. Columns whose fitted standard deviation is zero
    /// transform to 0.0.
    pub fn scale_features(&mut self, table: &mut FeatureTable, fit: bool) -> Result<()> {
        for name in table.names().to_vec() {
            let values = table.column(&name).expect("iterating table names");
            let mut nums = Vec::with_capacity(values.len());
            for cell in values {
                nums.push(cell.as_number().ok_or_else(|| {
                    Error::invalid_data(format!(
                        "column '{}' is not fully numeric during scaling",
                        name
                    ))
                })?);
            }

            if !self.scales.contains_key(&name) {
                if !fit {
                    return Err(Error::state(name.clone(), "no fitted scaling parameters"));
                }
                self.scales.insert(
                    name.clone(),
                    ColumnScale {
                        mean: stats::mean(&nums),
                        std: stats::std_dev(&nums),
                    },
                );
            }

            let scale = self.scales[&name];
            let scaled: Vec<Value> = nums
                .iter()
                .map(|&v| {
                    if scale.std > 0.0 {
                        Value::Number((v - scale.mean) / scale.std)
                    } else {
                        Value::Number(0.0)
                    }
                })
                .collect();
            *table.column_mut(&name).expect("iterating table names") = scaled;
        }
        Ok(())
    }

    /// Full preprocessing pass: detach the identifier, impute, optionally
    /// filter outliers (fit only), encode categoricals, record/validate the
    /// canonical schema, scale, and reattach the identifier row-aligned to
    /// the surviving rows. Returns a new table; the input is untouched.
    pub fn preprocess(
        &mut self,
        table: &FeatureTable,
        remove_outliers: bool,
        fit: bool,
    ) -> Result<FeatureTable> {
        let mut working = table.clone();

        let detached = working.remove_column(CUSTOMER_ID);
        let ids: Option<HashMap<usize, Value>> =
            detached.map(|values| working.row_ids().iter().copied().zip(values).collect());

        self.handle_missing_values(&mut working, fit)?;

        let numeric = working.numeric_columns();
        let categorical = working.categorical_columns();

        if remove_outliers && fit {
            let counts = self.detect_outliers(&working, &numeric, OUTLIER_Z_THRESHOLD);
            log::info!("outliers detected: {:?}", counts);
            self.remove_outliers(&mut working, &numeric, OUTLIER_Z_THRESHOLD);
            log::info!("{} rows retained after outlier removal", working.n_rows());
        }

        if !categorical.is_empty() {
            self.encode_categorical(&mut working, &categorical, fit)?;
        }

        if fit {
            if self.feature_columns.is_none() {
                self.feature_columns = Some(working.names().to_vec());
            }
        } else {
            let expected = self
                .feature_columns
                .as_deref()
                .ok_or_else(|| Error::state("schema", "preprocessor has not been fitted"))?;
            if working.names() != expected {
                let offending = expected
                    .iter()
                    .find(|name| !working.names().contains(*name))
                    .or_else(|| {
                        working
                            .names()
                            .iter()
                            .find(|name| !expected.contains(*name))
                    })
                    .cloned()
                    .unwrap_or_else(|| "schema".to_string());
                return Err(Error::state(
                    offending,
                    "column set or order differs from the fitted schema",
                ));
            }
        }

        self.scale_features(&mut working, fit)?;

        if let Some(id_map) = ids {
            let aligned: Vec<Value> = working
                .row_ids()
                .iter()
                .map(|id| id_map.get(id).cloned().unwrap_or(Value::Missing))
                .collect();
            working.insert_column(0, CUSTOMER_ID, aligned)?;
        }

        Ok(working)
    }

    /// Inference-only convenience over `preprocess(table, false, false)`.
    ///
    /// Takes `&self` so concurrent inference callers can share one fitted
    /// instance; the fit=false path never writes state.
    pub fn transform(&self, table: &FeatureTable) -> Result<FeatureTable> {
        let mut stateless = self.clone();
        let transformed = stateless.preprocess(table, false, false)?;
        debug_assert_eq!(&stateless, self);
        Ok(transformed)
    }

    /// Persist the fitted state as one JSON artifact, creating parent
    /// directories as needed
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path.as_ref())?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Restore a fitted preprocessor from a JSON artifact
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}
