//! End-to-end training pipeline and the single-customer prediction contract

use crate::analytics;
use crate::data::{CustomerProfile, FeatureTable, Value, CLUSTER, CUSTOMER_ID};
use crate::error::{Error, Result};
use crate::model::{SegmentationModel, SelectionMethod, TrainingReport};
use crate::preprocess::Preprocessor;
use ndarray::Array2;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Inputs and artifact destinations for one training run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Raw customer table (CSV)
    pub input: PathBuf,
    /// Destination for the model snapshot
    pub model_path: PathBuf,
    /// Destination for the fitted preprocessor
    pub preprocessor_path: PathBuf,
    /// Destination for the labeled dataset
    pub labeled_path: PathBuf,
    /// Fixed cluster count; when None the count comes from selection
    pub n_clusters: Option<usize>,
    /// Largest candidate cluster count evaluated during selection
    pub max_k: usize,
    /// Cluster-count selection policy
    pub method: SelectionMethod,
    /// Seed for all randomized initializations
    pub random_state: u64,
}

/// Everything a caller needs after a training run
#[derive(Debug)]
pub struct PipelineOutcome {
    /// Fitted preprocessor (also persisted)
    pub preprocessor: Preprocessor,
    /// Trained model (also persisted)
    pub model: SegmentationModel,
    /// Original table plus the `Cluster` column (also persisted)
    pub labeled: FeatureTable,
    /// Training diagnostics
    pub report: TrainingReport,
    /// Rows in the input table
    pub n_rows: usize,
    /// Rows that survived the outlier pass and trained the model
    pub n_retained: usize,
    /// Rows labeled through the no-filter transform path
    pub reassigned_outliers: usize,
}

/// Run the full segmentation pipeline: fit-preprocess with outlier removal,
/// select a cluster count, train, label every input row, and persist the
/// model, preprocessor and labeled dataset.
///
/// Rows dropped by the outlier pass are assigned by preprocessing them again
/// without outlier removal (`fit=false`) and predicting on the result. That
/// is a deliberate approximation inherited from the training recipe, not a
/// geometric nearest-centroid guarantee in the original space.
pub fn run_training(config: &PipelineConfig) -> Result<PipelineOutcome> {
    let raw = FeatureTable::from_csv(&config.input)?;
    if raw.is_empty() {
        return Err(Error::invalid_data(format!(
            "input table {} has no rows",
            config.input.display()
        )));
    }
    log::info!("loaded {} rows from {}", raw.n_rows(), config.input.display());

    let mut preprocessor = Preprocessor::new();
    let processed = preprocessor.preprocess(&raw, true, true)?;
    let features = feature_matrix(&processed)?;

    let mut model = SegmentationModel::new().random_state(config.random_state);
    if let Some(k) = config.n_clusters {
        model = model.with_clusters(k);
        // diagnostics are still worth having, but a fixed K must not fail on
        // tables too small to sweep candidates
        if let Err(e) = model.find_optimal_clusters(&features, config.max_k, config.method) {
            log::warn!("cluster-count diagnostics skipped: {}", e);
        }
    } else {
        model.find_optimal_clusters(&features, config.max_k, config.method)?;
    }

    let report = model.train(&features)?;
    let retained_labels = model.predict(&features)?;

    let mut labels_by_row: BTreeMap<usize, usize> = processed
        .row_ids()
        .iter()
        .copied()
        .zip(retained_labels.iter().copied())
        .collect();

    let retained_ids: HashSet<usize> = processed.row_ids().iter().copied().collect();
    let outliers = raw.subset_by_row_id(|id| !retained_ids.contains(&id));
    let reassigned_outliers = outliers.n_rows();
    if reassigned_outliers > 0 {
        log::info!(
            "assigning {} outlier rows through the no-filter transform path",
            reassigned_outliers
        );
        let outlier_processed = preprocessor.transform(&outliers)?;
        let outlier_features = feature_matrix(&outlier_processed)?;
        let outlier_labels = model.predict(&outlier_features)?;
        for (&id, &label) in outlier_processed
            .row_ids()
            .iter()
            .zip(outlier_labels.iter())
        {
            labels_by_row.insert(id, label);
        }
    }

    let mut labeled = raw.clone();
    let cluster_column: Vec<Value> = labeled
        .row_ids()
        .iter()
        .map(|id| {
            labels_by_row
                .get(id)
                .map(|&label| Value::Number(label as f64))
                .ok_or_else(|| {
                    Error::invalid_data(format!("row {} received no cluster assignment", id))
                })
        })
        .collect::<Result<_>>()?;
    labeled.add_column(CLUSTER, cluster_column)?;

    labeled.to_csv(&config.labeled_path)?;
    model.save_model(&config.model_path)?;
    preprocessor.save(&config.preprocessor_path)?;
    log::info!("labeled dataset written to {}", config.labeled_path.display());

    Ok(PipelineOutcome {
        preprocessor,
        model,
        labeled,
        report,
        n_rows: raw.n_rows(),
        n_retained: retained_ids.len(),
        reassigned_outliers,
    })
}

/// Prediction response for one customer: the assigned cluster plus the
/// context an external caller presents alongside it
#[derive(Debug, Clone, Serialize)]
pub struct SegmentPrediction {
    /// Assigned cluster id
    pub cluster: usize,
    /// Rows of the labeled dataset in that cluster
    pub cluster_size: usize,
    /// Per-numeric-column means of that cluster
    pub characteristics: BTreeMap<String, f64>,
}

/// Classify one customer with already-loaded artifacts.
///
/// Read-only on every input, so concurrent callers can share the fitted
/// preprocessor, trained model and labeled dataset.
pub fn predict_customer(
    preprocessor: &Preprocessor,
    model: &SegmentationModel,
    labeled: &FeatureTable,
    profile: &CustomerProfile,
) -> Result<SegmentPrediction> {
    let table = profile.to_table();
    let processed = preprocessor.transform(&table)?;
    let features = feature_matrix(&processed)?;
    let labels = model.predict(&features)?;
    let cluster = labels[0];

    Ok(SegmentPrediction {
        cluster,
        cluster_size: analytics::cluster_size(labeled, CLUSTER, cluster)?,
        characteristics: analytics::cluster_characteristics(labeled, CLUSTER, cluster)?,
    })
}

/// Classify one customer from artifacts on disk: model snapshot, fitted
/// preprocessor and labeled dataset
pub fn predict_customer_from_artifacts<P: AsRef<Path>>(
    model_path: P,
    preprocessor_path: P,
    labeled_path: P,
    profile: &CustomerProfile,
) -> Result<SegmentPrediction> {
    let model = SegmentationModel::load_model(model_path)?;
    let preprocessor = Preprocessor::load(preprocessor_path)?;
    let labeled = crate::data::load_labeled_dataset(labeled_path)?;
    predict_customer(&preprocessor, &model, &labeled, profile)
}

/// Numeric matrix of a processed table with the identifier column dropped
fn feature_matrix(processed: &FeatureTable) -> Result<Array2<f64>> {
    let mut features = processed.clone();
    features.remove_column(CUSTOMER_ID);
    features.to_matrix()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_input_csv(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("customers.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "CustomerID,Age,Gender,Income,SpendingScore,Region,PurchaseFrequency,AvgOrderValue,Recency"
        )
        .unwrap();
        // two loose value groups plus one extreme spender that the outlier
        // pass drops, and one missing age
        for i in 0..12 {
            writeln!(
                file,
                "CUST_L{:03},{},Female,{},{},North,{},{},{}",
                i,
                25 + i % 5,
                30000 + i * 100,
                30 + i % 5,
                5 + i % 3,
                60 + i,
                200 + i
            )
            .unwrap();
        }
        for i in 0..12 {
            writeln!(
                file,
                "CUST_H{:03},{},Male,{},{},South,{},{},{}",
                i,
                50 + i % 5,
                90000 + i * 100,
                80 + i % 5,
                25 + i % 3,
                300 + i,
                10 + i
            )
            .unwrap();
        }
        writeln!(file, "CUST_MISS,,Female,31000,33,North,6,65,205").unwrap();
        writeln!(file, "CUST_OUT,40,Male,60000,50,South,15,150000,100").unwrap();
        path
    }

    fn test_config(dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            input: write_input_csv(dir),
            model_path: dir.join("model/kmeans_model.json"),
            preprocessor_path: dir.join("model/preprocessor.json"),
            labeled_path: dir.join("data/customers_clustered.csv"),
            n_clusters: Some(2),
            max_k: 6,
            method: SelectionMethod::Both,
            random_state: 42,
        }
    }

    #[test]
    fn test_run_training_labels_every_row_and_persists_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let outcome = run_training(&config).unwrap();

        assert_eq!(outcome.n_rows, 26);
        assert_eq!(outcome.labeled.n_rows(), 26);
        assert_eq!(
            outcome.n_retained + outcome.reassigned_outliers,
            outcome.n_rows
        );
        assert!(outcome.reassigned_outliers >= 1); // the extreme spender

        let labels = outcome.labeled.column(CLUSTER).unwrap();
        assert!(labels
            .iter()
            .all(|v| matches!(v.as_number(), Some(l) if l == 0.0 || l == 1.0)));

        assert!(config.model_path.exists());
        assert!(config.preprocessor_path.exists());
        assert!(config.labeled_path.exists());
    }

    #[test]
    fn test_predict_customer_from_artifacts_matches_contract() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        run_training(&config).unwrap();

        let profile = CustomerProfile {
            age: 26.0,
            gender: "Female".to_string(),
            income: 30500.0,
            spending_score: 31.0,
            region: "North".to_string(),
            purchase_frequency: 6.0,
            avg_order_value: 62.0,
            recency: 210.0,
        };
        let prediction = predict_customer_from_artifacts(
            &config.model_path,
            &config.preprocessor_path,
            &config.labeled_path,
            &profile,
        )
        .unwrap();

        assert!(prediction.cluster < 2);
        assert!(prediction.cluster_size > 0);
        assert!(prediction.characteristics.contains_key("Income"));
        assert!(prediction.characteristics.contains_key("TotalSpend"));
    }
}
