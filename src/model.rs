//! Centroid-based segmentation engine: cluster-count selection, K-Means
//! training and nearest-centroid inference

use crate::error::{Error, Result};
use linfa::prelude::*;
use linfa::Dataset;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Independent seeded initializations per fit; lowest inertia kept
const N_INIT: usize = 10;
/// Iteration cap for a single K-Means run
const MAX_ITERATIONS: u64 = 300;
/// Convergence tolerance for a single K-Means run
const TOLERANCE: f64 = 1e-4;
/// Default seed when none is configured
pub const DEFAULT_RANDOM_STATE: u64 = 42;

/// Policy for choosing the cluster count from the selection diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMethod {
    /// Maximum silhouette score across candidates
    Silhouette,
    /// Maximum curvature (second difference) of the inertia curve
    Elbow,
    /// Evaluate both curves, select by silhouette
    Both,
}

/// Diagnostics reported by [`SegmentationModel::train`]; observational only,
/// training never fails on poor cluster quality
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TrainingReport {
    /// Cluster count the model was trained with
    pub n_clusters: usize,
    /// Within-cluster sum of squared distances
    pub inertia: f64,
    /// Mean silhouette coefficient over all points
    pub silhouette: f64,
    /// Davies-Bouldin index; lower means better-separated clusters
    pub davies_bouldin: f64,
}

/// Centroid-based partition model over the preprocessed feature space.
///
/// Created untrained; [`find_optimal_clusters`](Self::find_optimal_clusters)
/// records diagnostics and a recommended K without training, and
/// [`train`](Self::train) must run before [`predict`](Self::predict). The
/// whole state persists as a single JSON snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationModel {
    n_clusters: Option<usize>,
    random_state: u64,
    optimal_k: Option<usize>,
    inertia_values: Vec<f64>,
    silhouette_scores: Vec<f64>,
    centroids: Option<Array2<f64>>,
}

impl Default for SegmentationModel {
    fn default() -> Self {
        Self {
            n_clusters: None,
            random_state: DEFAULT_RANDOM_STATE,
            optimal_k: None,
            inertia_values: Vec::new(),
            silhouette_scores: Vec::new(),
            centroids: None,
        }
    }
}

impl SegmentationModel {
    /// Create an untrained model with the default seed and no fixed K
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the cluster count instead of relying on selection diagnostics
    pub fn with_clusters(mut self, n_clusters: usize) -> Self {
        self.n_clusters = Some(n_clusters);
        self
    }

    /// Set the seed driving every randomized initialization
    pub fn random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Whether `train` has produced centroids
    pub fn is_trained(&self) -> bool {
        self.centroids.is_some()
    }

    /// Configured or trained cluster count, if resolved
    pub fn n_clusters(&self) -> Option<usize> {
        self.n_clusters
    }

    /// K recommended by the last `find_optimal_clusters` call
    pub fn optimal_k(&self) -> Option<usize> {
        self.optimal_k
    }

    /// Inertia per candidate K from the last selection run, starting at K=2
    pub fn inertia_values(&self) -> &[f64] {
        &self.inertia_values
    }

    /// Silhouette score per candidate K from the last selection run
    pub fn silhouette_scores(&self) -> &[f64] {
        &self.silhouette_scores
    }

    /// Evaluate candidate cluster counts from 2 to `max_k` inclusive and
    /// record inertia and silhouette curves, then choose a K per `method`.
    ///
    /// Candidates are evaluated in parallel; each candidate fits from the
    /// same configured seed, so the recorded curves are reproducible. This
    /// is purely diagnostic and trains nothing usable.
    pub fn find_optimal_clusters(
        &mut self,
        data: &Array2<f64>,
        max_k: usize,
        method: SelectionMethod,
    ) -> Result<usize> {
        if max_k < 2 {
            return Err(Error::configuration(
                "max_k must be at least 2 to evaluate candidate cluster counts",
            ));
        }
        if data.nrows() < max_k {
            return Err(Error::InsufficientData {
                rows: data.nrows(),
                required: max_k,
            });
        }

        let candidates: Vec<usize> = (2..=max_k).collect();
        let seed = self.random_state;
        let evaluated: Result<Vec<(f64, f64)>> = candidates
            .par_iter()
            .map(|&k| {
                let outcome = fit_kmeans(data, k, seed)?;
                let silhouette = silhouette_score(data.view(), outcome.labels.view(), k);
                Ok((outcome.inertia, silhouette))
            })
            .collect();
        let evaluated = evaluated?;

        self.inertia_values = evaluated.iter().map(|(inertia, _)| *inertia).collect();
        self.silhouette_scores = evaluated.iter().map(|(_, s)| *s).collect();

        let optimal = match method {
            SelectionMethod::Silhouette | SelectionMethod::Both => {
                candidates[argmax(&self.silhouette_scores)]
            }
            SelectionMethod::Elbow => elbow_k(&candidates, &self.inertia_values)?,
        };

        self.optimal_k = Some(optimal);
        log::info!(
            "optimal cluster count: {} (method {:?}, {} candidates)",
            optimal,
            method,
            candidates.len()
        );
        Ok(optimal)
    }

    /// Fit final centroids on `data` with the configured K, falling back to
    /// the K recommended by `find_optimal_clusters`.
    pub fn train(&mut self, data: &Array2<f64>) -> Result<TrainingReport> {
        let k = self.n_clusters.or(self.optimal_k).ok_or_else(|| {
            Error::configuration(
                "no cluster count resolved; call find_optimal_clusters first or fix one with with_clusters",
            )
        })?;
        if data.nrows() < k {
            return Err(Error::InsufficientData {
                rows: data.nrows(),
                required: k,
            });
        }

        let outcome = fit_kmeans(data, k, self.random_state)?;
        let silhouette = silhouette_score(data.view(), outcome.labels.view(), k);
        let davies_bouldin =
            davies_bouldin_index(data.view(), outcome.labels.view(), outcome.centroids.view());

        self.n_clusters = Some(k);
        self.centroids = Some(outcome.centroids);

        let report = TrainingReport {
            n_clusters: k,
            inertia: outcome.inertia,
            silhouette,
            davies_bouldin,
        };
        log::info!(
            "trained with k={}: inertia {:.2}, silhouette {:.3}, davies-bouldin {:.3}",
            report.n_clusters,
            report.inertia,
            report.silhouette,
            report.davies_bouldin
        );
        Ok(report)
    }

    /// Assign each row to its nearest centroid by Euclidean distance
    pub fn predict(&self, data: &Array2<f64>) -> Result<Array1<usize>> {
        let centroids = self
            .centroids
            .as_ref()
            .ok_or_else(|| Error::not_trained("predict"))?;
        let mut labels = Array1::zeros(data.nrows());
        for (i, point) in data.outer_iter().enumerate() {
            labels[i] = nearest_centroid(point, centroids.view());
        }
        Ok(labels)
    }

    /// The K centroid vectors in the trained feature space
    pub fn get_cluster_centers(&self) -> Result<&Array2<f64>> {
        self.centroids
            .as_ref()
            .ok_or_else(|| Error::not_trained("get_cluster_centers"))
    }

    /// Persist centroids, K and selection diagnostics as one JSON snapshot,
    /// creating parent directories as needed
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if !self.is_trained() {
            return Err(Error::not_trained("save_model"));
        }
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path.as_ref())?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        log::info!("model saved to {}", path.as_ref().display());
        Ok(())
    }

    /// Restore a snapshot written by `save_model`; the result is
    /// predict-ready with no retraining
    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

struct FitOutcome {
    centroids: Array2<f64>,
    labels: Array1<usize>,
    inertia: f64,
}

/// One seeded multi-initialization K-Means fit; linfa keeps the
/// lowest-inertia run
fn fit_kmeans(data: &Array2<f64>, k: usize, seed: u64) -> Result<FitOutcome> {
    let n_samples = data.nrows();
    let dataset = Dataset::new(data.clone(), Array1::<usize>::zeros(n_samples));
    let rng = StdRng::seed_from_u64(seed);

    let model = KMeans::params_with(k, rng, L2Dist)
        .n_runs(N_INIT)
        .max_n_iterations(MAX_ITERATIONS)
        .tolerance(TOLERANCE)
        .fit(&dataset)
        .map_err(|e| Error::computation(format!("k-means fit failed for k={}: {}", k, e)))?;

    let labels = model.predict(&dataset);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(data.view(), labels.view(), centroids.view());

    Ok(FitOutcome {
        centroids,
        labels,
        inertia,
    })
}

/// Elbow heuristic: the K at the maximum second difference of the inertia
/// curve, offset one position into the candidate range since curvature is
/// defined on interior points
fn elbow_k(candidates: &[usize], inertia: &[f64]) -> Result<usize> {
    if inertia.len() < 3 {
        return Err(Error::configuration(
            "elbow selection needs at least three candidate cluster counts",
        ));
    }
    let diffs: Vec<f64> = inertia.windows(2).map(|w| w[1] - w[0]).collect();
    let diffs2: Vec<f64> = diffs.windows(2).map(|w| w[1] - w[0]).collect();
    Ok(candidates[argmax(&diffs2) + 1])
}

/// Index of the first maximum value
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Sum of squared distances from each point to its assigned centroid
fn compute_inertia(
    data: ArrayView2<f64>,
    labels: ArrayView1<usize>,
    centroids: ArrayView2<f64>,
) -> f64 {
    let mut inertia = 0.0;
    for (point, &cluster) in data.outer_iter().zip(labels.iter()) {
        if cluster < centroids.nrows() {
            let centroid = centroids.row(cluster);
            inertia += point
                .iter()
                .zip(centroid.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>();
        }
    }
    inertia
}

/// Mean silhouette coefficient over all points. Points in singleton clusters
/// contribute 0.
fn silhouette_score(data: ArrayView2<f64>, labels: ArrayView1<usize>, k: usize) -> f64 {
    let n_samples = data.nrows();
    if n_samples < 2 || k < 2 {
        return 0.0;
    }

    let mut silhouette_sum = 0.0;
    for i in 0..n_samples {
        let point = data.row(i);
        let own_cluster = labels[i];

        let mut same_cluster_distances = Vec::new();
        let mut other_cluster_distances: Vec<Vec<f64>> = vec![Vec::new(); k];
        for j in 0..n_samples {
            if i == j {
                continue;
            }
            let distance = euclidean_distance(point, data.row(j));
            let other_label = labels[j];
            if other_label == own_cluster {
                same_cluster_distances.push(distance);
            } else if other_label < k {
                other_cluster_distances[other_label].push(distance);
            }
        }

        if same_cluster_distances.is_empty() {
            continue; // singleton cluster contributes 0
        }
        let a_i =
            same_cluster_distances.iter().sum::<f64>() / same_cluster_distances.len() as f64;
        let b_i = other_cluster_distances
            .iter()
            .filter(|distances| !distances.is_empty())
            .map(|distances| distances.iter().sum::<f64>() / distances.len() as f64)
            .fold(f64::INFINITY, f64::min);

        if b_i.is_finite() && (a_i > 0.0 || b_i > 0.0) {
            silhouette_sum += (b_i - a_i) / a_i.max(b_i);
        }
    }

    silhouette_sum / n_samples as f64
}

/// Davies-Bouldin index: mean over clusters of the worst ratio of summed
/// within-cluster scatter to between-centroid separation
fn davies_bouldin_index(
    data: ArrayView2<f64>,
    labels: ArrayView1<usize>,
    centroids: ArrayView2<f64>,
) -> f64 {
    let k = centroids.nrows();
    if k < 2 {
        return 0.0;
    }

    let mut scatter = vec![0.0; k];
    let mut counts = vec![0usize; k];
    for (point, &cluster) in data.outer_iter().zip(labels.iter()) {
        if cluster < k {
            scatter[cluster] += euclidean_distance(point, centroids.row(cluster));
            counts[cluster] += 1;
        }
    }
    for (s, &count) in scatter.iter_mut().zip(counts.iter()) {
        if count > 0 {
            *s /= count as f64;
        }
    }

    let mut total = 0.0;
    for i in 0..k {
        let mut worst: f64 = 0.0;
        for j in 0..k {
            if i == j {
                continue;
            }
            let separation = euclidean_distance(centroids.row(i), centroids.row(j));
            if separation > 0.0 {
                worst = worst.max((scatter[i] + scatter[j]) / separation);
            }
        }
        total += worst;
    }
    total / k as f64
}

fn nearest_centroid(point: ArrayView1<f64>, centroids: ArrayView2<f64>) -> usize {
    let mut min_distance = f64::INFINITY;
    let mut closest = 0;
    for (cluster, centroid) in centroids.outer_iter().enumerate() {
        let distance = euclidean_distance(point, centroid);
        if distance < min_distance {
            min_distance = distance;
            closest = cluster;
        }
    }
    closest
}

fn euclidean_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_blob_data() -> Array2<f64> {
        let mut rows = Vec::new();
        for i in 0..20 {
            rows.push([(i % 5) as f64 * 0.1, (i / 5) as f64 * 0.1]);
        }
        for i in 0..20 {
            rows.push([100.0 + (i % 5) as f64 * 0.1, 100.0 + (i / 5) as f64 * 0.1]);
        }
        Array2::from_shape_vec((40, 2), rows.into_iter().flatten().collect()).unwrap()
    }

    #[test]
    fn test_builder_defaults() {
        let model = SegmentationModel::new();
        assert_eq!(model.n_clusters(), None);
        assert!(!model.is_trained());

        let model = SegmentationModel::new().with_clusters(4).random_state(7);
        assert_eq!(model.n_clusters(), Some(4));
    }

    #[test]
    fn test_elbow_picks_maximum_second_difference() {
        let candidates = vec![2, 3, 4, 5, 6];
        let inertia = vec![100.0, 50.0, 40.0, 35.0, 33.0];
        // diffs [-50,-10,-5,-2], second diffs [40,5,3]: curvature peaks at k=3
        assert_eq!(elbow_k(&candidates, &inertia).unwrap(), 3);
    }

    #[test]
    fn test_train_without_cluster_count_fails() {
        let data = two_blob_data();
        let mut model = SegmentationModel::new();
        let err = model.train(&data).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_predict_before_train_fails() {
        let model = SegmentationModel::new().with_clusters(2);
        let data = array![[1.0, 2.0]];
        assert!(matches!(
            model.predict(&data).unwrap_err(),
            Error::NotTrained { .. }
        ));
        assert!(matches!(
            model.get_cluster_centers().unwrap_err(),
            Error::NotTrained { .. }
        ));
    }

    #[test]
    fn test_find_optimal_requires_enough_rows() {
        let data = array![[1.0], [2.0], [3.0], [4.0]];
        let mut model = SegmentationModel::new();
        let err = model
            .find_optimal_clusters(&data, 5, SelectionMethod::Silhouette)
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientData { rows: 4, .. }));
    }

    #[test]
    fn test_income_scenario_separates_high_earner() {
        let data = array![[20000.0], [21000.0], [120000.0]];
        let mut model = SegmentationModel::new().with_clusters(2);
        model.train(&data).unwrap();
        let labels = model.predict(&data).unwrap();

        assert_eq!(labels[0], labels[1]);
        assert_ne!(labels[0], labels[2]);
        assert!(labels.iter().all(|&l| l < 2));
    }

    #[test]
    fn test_training_is_deterministic_for_a_seed() {
        let data = two_blob_data();

        let mut first = SegmentationModel::new().with_clusters(2).random_state(42);
        first.train(&data).unwrap();
        let mut second = SegmentationModel::new().with_clusters(2).random_state(42);
        second.train(&data).unwrap();

        let a = first.get_cluster_centers().unwrap();
        let b = second.get_cluster_centers().unwrap();
        assert_eq!(a.shape(), b.shape());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-9);
        }
    }

    #[test]
    fn test_training_report_metrics_are_sane() {
        let data = two_blob_data();
        let mut model = SegmentationModel::new().with_clusters(2);
        let report = model.train(&data).unwrap();

        assert_eq!(report.n_clusters, 2);
        assert!(report.inertia >= 0.0 && report.inertia.is_finite());
        assert!(report.silhouette > 0.8); // blobs are far apart
        assert!(report.davies_bouldin >= 0.0 && report.davies_bouldin < 0.5);
    }

    #[test]
    fn test_save_load_round_trip_is_predict_ready() {
        let data = two_blob_data();
        let mut model = SegmentationModel::new().random_state(42);
        model
            .find_optimal_clusters(&data, 5, SelectionMethod::Both)
            .unwrap();
        model.train(&data).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model").join("kmeans_model.json");
        model.save_model(&path).unwrap();

        let restored = SegmentationModel::load_model(&path).unwrap();
        assert_eq!(restored.optimal_k(), model.optimal_k());
        assert_eq!(restored.inertia_values(), model.inertia_values());
        assert_eq!(restored.silhouette_scores(), model.silhouette_scores());

        let labels = restored.predict(&data).unwrap();
        assert_eq!(labels, model.predict(&data).unwrap());
    }

    #[test]
    fn test_untrained_model_cannot_be_saved() {
        let model = SegmentationModel::new();
        let dir = tempfile::tempdir().unwrap();
        let err = model.save_model(dir.path().join("m.json")).unwrap_err();
        assert!(matches!(err, Error::NotTrained { .. }));
    }
}
