//! Visualization functions using Plotters for selection and cluster analysis

use crate::data::{FeatureTable, CLUSTER};
use crate::error::{Error, Result};
use crate::model::SegmentationModel;
use plotters::prelude::*;
use std::path::Path;

/// Color palette for different clusters
const CLUSTER_COLORS: [RGBColor; 5] = [RED, BLUE, GREEN, YELLOW, MAGENTA];

fn cluster_color(cluster: usize) -> &'static RGBColor {
    CLUSTER_COLORS.get(cluster).unwrap_or(&BLACK)
}

/// Plot the elbow and silhouette curves recorded by
/// `find_optimal_clusters`, side by side, with the chosen K marked
pub fn plot_selection_curves<P: AsRef<Path>>(model: &SegmentationModel, path: P) -> Result<()> {
    let inertia = model.inertia_values();
    let silhouette = model.silhouette_scores();
    if inertia.is_empty() || silhouette.is_empty() {
        return Err(Error::invalid_data(
            "no selection diagnostics recorded; run find_optimal_clusters first",
        ));
    }
    render_selection_curves(inertia, silhouette, model.optimal_k(), path.as_ref())
        .map_err(|e| Error::render(e.to_string()))
}

fn render_selection_curves(
    inertia: &[f64],
    silhouette: &[f64],
    optimal_k: Option<usize>,
    path: &Path,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let root = BitMapBackend::new(path, (1400, 500)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((1, 2));

    // Candidate counts always start at k=2
    let k_min = 2.0;
    let k_max = (inertia.len() + 1) as f64;

    let inertia_max = inertia.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut elbow = ChartBuilder::on(&panels[0])
        .caption("Elbow Method", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(k_min - 0.5..k_max + 0.5, 0.0..inertia_max * 1.1)?;
    elbow
        .configure_mesh()
        .x_desc("Number of Clusters (k)")
        .y_desc("Inertia")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;
    elbow.draw_series(LineSeries::new(
        inertia
            .iter()
            .enumerate()
            .map(|(i, &v)| ((i + 2) as f64, v)),
        BLUE.stroke_width(2),
    ))?;
    elbow.draw_series(
        inertia
            .iter()
            .enumerate()
            .map(|(i, &v)| Circle::new(((i + 2) as f64, v), 4, BLUE.filled())),
    )?;
    if let Some(k) = optimal_k {
        elbow.draw_series(LineSeries::new(
            vec![(k as f64, 0.0), (k as f64, inertia_max * 1.1)],
            RED.stroke_width(1),
        ))?;
    }

    let sil_min = silhouette.iter().cloned().fold(f64::INFINITY, f64::min);
    let sil_max = silhouette.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let pad = ((sil_max - sil_min) * 0.1).max(0.05);
    let mut sil = ChartBuilder::on(&panels[1])
        .caption("Silhouette Analysis", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(k_min - 0.5..k_max + 0.5, sil_min - pad..sil_max + pad)?;
    sil.configure_mesh()
        .x_desc("Number of Clusters (k)")
        .y_desc("Silhouette Score")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;
    sil.draw_series(LineSeries::new(
        silhouette
            .iter()
            .enumerate()
            .map(|(i, &v)| ((i + 2) as f64, v)),
        GREEN.stroke_width(2),
    ))?;
    sil.draw_series(
        silhouette
            .iter()
            .enumerate()
            .map(|(i, &v)| Circle::new(((i + 2) as f64, v), 4, GREEN.filled())),
    )?;
    if let Some(k) = optimal_k {
        sil.draw_series(LineSeries::new(
            vec![(k as f64, sil_min - pad), (k as f64, sil_max + pad)],
            RED.stroke_width(1),
        ))?;
    }

    root.present()?;
    Ok(())
}

/// Scatter two raw columns of the labeled dataset, colored by cluster
pub fn plot_cluster_scatter<P: AsRef<Path>>(
    labeled: &FeatureTable,
    x_col: &str,
    y_col: &str,
    path: P,
) -> Result<()> {
    let points = scatter_points(labeled, x_col, y_col)?;
    if points.is_empty() {
        return Err(Error::invalid_data(format!(
            "no plottable rows for '{}' vs '{}'",
            x_col, y_col
        )));
    }
    render_cluster_scatter(&points, x_col, y_col, path.as_ref())
        .map_err(|e| Error::render(e.to_string()))
}

fn scatter_points(
    labeled: &FeatureTable,
    x_col: &str,
    y_col: &str,
) -> Result<Vec<(f64, f64, usize)>> {
    let x = labeled
        .column(x_col)
        .ok_or_else(|| Error::invalid_data(format!("no '{}' column in table", x_col)))?;
    let y = labeled
        .column(y_col)
        .ok_or_else(|| Error::invalid_data(format!("no '{}' column in table", y_col)))?;
    let clusters = labeled
        .column(CLUSTER)
        .ok_or_else(|| Error::invalid_data(format!("no '{}' column in table", CLUSTER)))?;

    Ok(x.iter()
        .zip(y.iter())
        .zip(clusters.iter())
        .filter_map(|((x, y), c)| match (x.as_number(), y.as_number(), c.as_number()) {
            (Some(x), Some(y), Some(c)) if c >= 0.0 => Some((x, y, c as usize)),
            _ => None,
        })
        .collect())
}

fn render_cluster_scatter(
    points: &[(f64, f64, usize)],
    x_col: &str,
    y_col: &str,
    path: &Path,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let x_min = points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let x_max = points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    let y_min = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
    let y_max = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
    let x_pad = ((x_max - x_min) * 0.05).max(0.5);
    let y_pad = ((y_max - y_min) * 0.05).max(0.5);

    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("Customer Segments: {} vs {}", y_col, x_col),
            ("sans-serif", 30),
        )
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(x_min - x_pad..x_max + x_pad, y_min - y_pad..y_max + y_pad)?;

    chart
        .configure_mesh()
        .x_desc(x_col)
        .y_desc(y_col)
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for &(x, y, cluster) in points {
        chart.draw_series(std::iter::once(Circle::new(
            (x, y),
            4,
            cluster_color(cluster).filled(),
        )))?;
    }

    root.present()?;
    Ok(())
}

/// Bar chart of cluster populations in the labeled dataset
pub fn plot_cluster_sizes<P: AsRef<Path>>(labeled: &FeatureTable, path: P) -> Result<()> {
    let insights = crate::analytics::cluster_insights(labeled, CLUSTER)?;
    let sizes: Vec<(usize, usize)> = insights
        .iter()
        .map(|(&cluster, insight)| (cluster, insight.size))
        .collect();
    if sizes.is_empty() {
        return Err(Error::invalid_data("labeled dataset has no clusters"));
    }
    render_cluster_sizes(&sizes, path.as_ref()).map_err(|e| Error::render(e.to_string()))
}

fn render_cluster_sizes(
    sizes: &[(usize, usize)],
    path: &Path,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let max_cluster = sizes.iter().map(|s| s.0).max().unwrap_or(0);
    let max_size = sizes.iter().map(|s| s.1).max().unwrap_or(1) as f64;

    let root = BitMapBackend::new(path, (600, 400)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Cluster Sizes", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.5f64..max_cluster as f64 + 0.5, 0f64..max_size * 1.1)?;

    chart
        .configure_mesh()
        .x_desc("Cluster")
        .y_desc("Number of Customers")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for &(cluster, size) in sizes {
        chart.draw_series(std::iter::once(Rectangle::new(
            [
                (cluster as f64 - 0.4, 0.0),
                (cluster as f64 + 0.4, size as f64),
            ],
            cluster_color(cluster).filled(),
        )))?;
    }

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::model::SelectionMethod;
    use ndarray::Array2;
    use tempfile::tempdir;

    fn labeled_table() -> FeatureTable {
        let mut table = FeatureTable::new(
            ["Income", "SpendingScore", CLUSTER]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        let rows = [
            (30000.0, 30.0, 0.0),
            (31000.0, 35.0, 0.0),
            (90000.0, 80.0, 1.0),
            (91000.0, 85.0, 1.0),
        ];
        for (income, score, cluster) in rows {
            table
                .push_row(vec![
                    Value::Number(income),
                    Value::Number(score),
                    Value::Number(cluster),
                ])
                .unwrap();
        }
        table
    }

    fn diagnosed_model() -> SegmentationModel {
        let mut rows = Vec::new();
        for i in 0..20 {
            rows.push([(i % 5) as f64, (i / 5) as f64]);
        }
        for i in 0..20 {
            rows.push([50.0 + (i % 5) as f64, 50.0 + (i / 5) as f64]);
        }
        let data = Array2::from_shape_vec((40, 2), rows.into_iter().flatten().collect()).unwrap();
        let mut model = SegmentationModel::new().random_state(42);
        model
            .find_optimal_clusters(&data, 5, SelectionMethod::Both)
            .unwrap();
        model
    }

    #[test]
    fn test_plot_selection_curves() {
        let model = diagnosed_model();
        let dir = tempdir().unwrap();
        let path = dir.path().join("elbow_silhouette.png");
        plot_selection_curves(&model, &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_plot_selection_curves_without_diagnostics_fails() {
        let model = SegmentationModel::new();
        let dir = tempdir().unwrap();
        let err = plot_selection_curves(&model, dir.path().join("x.png")).unwrap_err();
        assert!(matches!(err, Error::InvalidData { .. }));
    }

    #[test]
    fn test_plot_cluster_scatter() {
        let table = labeled_table();
        let dir = tempdir().unwrap();
        let path = dir.path().join("clusters.png");
        plot_cluster_scatter(&table, "Income", "SpendingScore", &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_plot_cluster_sizes() {
        let table = labeled_table();
        let dir = tempdir().unwrap();
        let path = dir.path().join("cluster_sizes.png");
        plot_cluster_sizes(&table, &path).unwrap();
        assert!(path.exists());
    }
}
