//! Derived per-cluster statistics over a labeled feature table.
//!
//! Everything here is a pure function of (table, cluster column): no fitted
//! state, safe to call repeatedly and concurrently on immutable inputs.

use crate::data::FeatureTable;
use crate::error::{Error, Result};
use crate::stats;
use serde::Serialize;
use std::collections::BTreeMap;

/// Full summary of one numeric column within one cluster
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ColumnProfile {
    /// Mean of non-missing values
    pub mean: f64,
    /// Median of non-missing values
    pub median: f64,
    /// Population standard deviation of non-missing values
    pub std: f64,
    /// Count of non-missing values
    pub count: usize,
}

/// Condensed central-tendency pair used by insights
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CentralTendency {
    /// Mean of non-missing values
    pub mean: f64,
    /// Median of non-missing values
    pub median: f64,
}

/// Presentation-oriented summary of one cluster
#[derive(Debug, Clone, Serialize)]
pub struct ClusterInsight {
    /// Rows assigned to the cluster
    pub size: usize,
    /// Share of the total population, in percent
    pub percentage: f64,
    /// Mean/median per numeric column
    pub stats: BTreeMap<String, CentralTendency>,
}

/// Per-cluster, per-numeric-column mean/median/std/count
pub fn cluster_profiles(
    table: &FeatureTable,
    cluster_col: &str,
) -> Result<BTreeMap<usize, BTreeMap<String, ColumnProfile>>> {
    let groups = group_rows(table, cluster_col)?;
    let columns = numeric_feature_columns(table, cluster_col);

    let mut profiles = BTreeMap::new();
    for (cluster, rows) in groups {
        let mut per_column = BTreeMap::new();
        for name in &columns {
            let values = column_values(table, name, &rows);
            per_column.insert(
                name.clone(),
                ColumnProfile {
                    mean: stats::mean(&values),
                    median: stats::median(&values),
                    std: stats::std_dev(&values),
                    count: values.len(),
                },
            );
        }
        profiles.insert(cluster, per_column);
    }
    Ok(profiles)
}

/// Per-cluster size, population share and per-column central tendencies
pub fn cluster_insights(
    table: &FeatureTable,
    cluster_col: &str,
) -> Result<BTreeMap<usize, ClusterInsight>> {
    let groups = group_rows(table, cluster_col)?;
    let columns = numeric_feature_columns(table, cluster_col);
    let total = table.n_rows();

    let mut insights = BTreeMap::new();
    for (cluster, rows) in groups {
        let mut per_column = BTreeMap::new();
        for name in &columns {
            let values = column_values(table, name, &rows);
            per_column.insert(
                name.clone(),
                CentralTendency {
                    mean: stats::mean(&values),
                    median: stats::median(&values),
                },
            );
        }
        insights.insert(
            cluster,
            ClusterInsight {
                size: rows.len(),
                percentage: rows.len() as f64 / total as f64 * 100.0,
                stats: per_column,
            },
        );
    }
    Ok(insights)
}

/// Per-numeric-column means restricted to one cluster; backs the
/// single-customer prediction contract
pub fn cluster_characteristics(
    table: &FeatureTable,
    cluster_col: &str,
    cluster_id: usize,
) -> Result<BTreeMap<String, f64>> {
    let groups = group_rows(table, cluster_col)?;
    let rows = groups.get(&cluster_id).cloned().unwrap_or_default();
    let columns = numeric_feature_columns(table, cluster_col);

    let mut characteristics = BTreeMap::new();
    for name in &columns {
        let values = column_values(table, name, &rows);
        characteristics.insert(name.clone(), stats::mean(&values));
    }
    Ok(characteristics)
}

/// Rows assigned to one cluster
pub fn cluster_size(table: &FeatureTable, cluster_col: &str, cluster_id: usize) -> Result<usize> {
    let groups = group_rows(table, cluster_col)?;
    Ok(groups.get(&cluster_id).map_or(0, Vec::len))
}

fn group_rows(table: &FeatureTable, cluster_col: &str) -> Result<BTreeMap<usize, Vec<usize>>> {
    let labels = table
        .column(cluster_col)
        .ok_or_else(|| Error::invalid_data(format!("no '{}' column in table", cluster_col)))?;

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (row, cell) in labels.iter().enumerate() {
        let label = cell.as_number().ok_or_else(|| {
            Error::invalid_data(format!(
                "non-numeric cluster label at row {} of '{}'",
                row, cluster_col
            ))
        })?;
        if label < 0.0 || label.fract() != 0.0 {
            return Err(Error::invalid_data(format!(
                "cluster label {} at row {} is not a non-negative integer",
                label, row
            )));
        }
        groups.entry(label as usize).or_default().push(row);
    }
    Ok(groups)
}

fn numeric_feature_columns(table: &FeatureTable, cluster_col: &str) -> Vec<String> {
    table
        .numeric_columns()
        .into_iter()
        .filter(|name| name != cluster_col)
        .collect()
}

fn column_values(table: &FeatureTable, name: &str, rows: &[usize]) -> Vec<f64> {
    let column = match table.column(name) {
        Some(c) => c,
        None => return Vec::new(),
    };
    rows.iter()
        .filter_map(|&row| column[row].as_number())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Value, CLUSTER};

    fn labeled_table() -> FeatureTable {
        let mut table = FeatureTable::new(
            ["CustomerID", "Income", CLUSTER]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        let rows = [
            ("CUST_00001", 10.0, 0.0),
            ("CUST_00002", 20.0, 0.0),
            ("CUST_00003", 30.0, 0.0),
            ("CUST_00004", 100.0, 1.0),
        ];
        for (id, income, cluster) in rows {
            table
                .push_row(vec![
                    Value::Text(id.to_string()),
                    Value::Number(income),
                    Value::Number(cluster),
                ])
                .unwrap();
        }
        table
    }

    #[test]
    fn test_cluster_profiles() {
        let table = labeled_table();
        let profiles = cluster_profiles(&table, CLUSTER).unwrap();

        assert_eq!(profiles.len(), 2);
        let income = &profiles[&0]["Income"];
        assert!((income.mean - 20.0).abs() < 1e-12);
        assert!((income.median - 20.0).abs() < 1e-12);
        assert_eq!(income.count, 3);
        assert!(income.std > 0.0);

        // the identifier and cluster columns never appear as features
        assert!(!profiles[&0].contains_key("CustomerID"));
        assert!(!profiles[&0].contains_key(CLUSTER));
    }

    #[test]
    fn test_cluster_insights_sizes_and_percentages() {
        let table = labeled_table();
        let insights = cluster_insights(&table, CLUSTER).unwrap();

        assert_eq!(insights[&0].size, 3);
        assert!((insights[&0].percentage - 75.0).abs() < 1e-12);
        assert_eq!(insights[&1].size, 1);
        assert!((insights[&1].percentage - 25.0).abs() < 1e-12);
        assert!((insights[&1].stats["Income"].mean - 100.0).abs() < 1e-12);
    }

    #[test]
    fn test_cluster_characteristics_restricts_to_one_cluster() {
        let table = labeled_table();
        let characteristics = cluster_characteristics(&table, CLUSTER, 0).unwrap();
        assert!((characteristics["Income"] - 20.0).abs() < 1e-12);

        let empty = cluster_characteristics(&table, CLUSTER, 9).unwrap();
        assert_eq!(empty["Income"], 0.0);
    }

    #[test]
    fn test_missing_cluster_column_is_invalid() {
        let table = labeled_table();
        assert!(matches!(
            cluster_profiles(&table, "Segment").unwrap_err(),
            Error::InvalidData { .. }
        ));
    }

    #[test]
    fn test_cluster_size() {
        let table = labeled_table();
        assert_eq!(cluster_size(&table, CLUSTER, 0).unwrap(), 3);
        assert_eq!(cluster_size(&table, CLUSTER, 5).unwrap(), 0);
    }
}
