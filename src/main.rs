//! Segwise: customer segmentation CLI using K-Means clustering on behavioral attributes
//!
//! This is the main entrypoint that orchestrates preprocessing, cluster-count
//! selection, model training, analytics and prediction.

use anyhow::Result;
use clap::Parser;
use segwise::data::{CustomerProfile, CLUSTER};
use segwise::pipeline::{self, PipelineConfig};
use segwise::{analytics, viz, Args};
use std::path::{Path, PathBuf};
use std::time::Instant;

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        if args.verbose { "info" } else { "warn" },
    ))
    .init();

    if args.verbose {
        println!("Segwise - Customer Segmentation using K-Means");
        println!("=============================================\n");
    }

    if let Some(profile) = args.parse_customer()? {
        run_prediction_mode(&args, &profile)?;
    } else {
        run_full_pipeline(&args)?;
    }

    Ok(())
}

/// Classify one customer from artifacts produced by an earlier pipeline run
fn run_prediction_mode(args: &Args, profile: &CustomerProfile) -> Result<()> {
    println!("=== Prediction Mode ===");
    println!(
        "Input customer: age={}, gender={}, income={}, spending_score={}, region={}, purchase_frequency={}, avg_order_value={}, recency={}",
        profile.age,
        profile.gender,
        profile.income,
        profile.spending_score,
        profile.region,
        profile.purchase_frequency,
        profile.avg_order_value,
        profile.recency
    );

    let start_time = Instant::now();
    let prediction = pipeline::predict_customer_from_artifacts(
        Path::new(&args.model_out),
        Path::new(&args.preprocessor_out),
        Path::new(&args.labeled_out),
        profile,
    )?;
    let elapsed = start_time.elapsed();

    println!("\n✓ Predicted Cluster: {}", prediction.cluster);
    println!("  Processing time: {:.2}s", elapsed.as_secs_f64());

    println!("\nCluster {} details:", prediction.cluster);
    println!("  Size: {} customers", prediction.cluster_size);
    for (column, mean) in &prediction.characteristics {
        println!("  Avg {}: {:.2}", column, mean);
    }

    Ok(())
}

/// Run the full segmentation pipeline and report cluster analytics
fn run_full_pipeline(args: &Args) -> Result<()> {
    println!("=== Full Segmentation Pipeline ===\n");

    let start_time = Instant::now();
    let config = PipelineConfig {
        input: PathBuf::from(&args.input),
        model_path: PathBuf::from(&args.model_out),
        preprocessor_path: PathBuf::from(&args.preprocessor_out),
        labeled_path: PathBuf::from(&args.labeled_out),
        n_clusters: args.clusters,
        max_k: args.max_k,
        method: args.method,
        random_state: args.seed,
    };

    let outcome = pipeline::run_training(&config)?;

    println!("✓ Data loaded: {} customers", outcome.n_rows);
    if args.verbose {
        println!("  Retained after outlier removal: {}", outcome.n_retained);
        println!(
            "  Re-assigned through transform path: {}",
            outcome.reassigned_outliers
        );
    }

    println!("\n✓ Model trained");
    println!("  Number of clusters: {}", outcome.report.n_clusters);
    println!("  Inertia: {:.2}", outcome.report.inertia);
    println!("  Silhouette score: {:.3}", outcome.report.silhouette);
    println!(
        "  Davies-Bouldin index: {:.3}",
        outcome.report.davies_bouldin
    );

    println!("\n=== Cluster Insights ===");
    let insights = analytics::cluster_insights(&outcome.labeled, CLUSTER)?;
    for (cluster, insight) in &insights {
        println!(
            "Cluster {}: {} customers ({:.1}%)",
            cluster, insight.size, insight.percentage
        );
        if args.verbose {
            for (column, stats) in &insight.stats {
                println!(
                    "    {}: mean {:.2}, median {:.2}",
                    column, stats.mean, stats.median
                );
            }
        }
    }

    let plots_dir = Path::new(&args.plots_dir);
    std::fs::create_dir_all(plots_dir)?;

    let curves_path = plots_dir.join("elbow_silhouette.png");
    if outcome.model.inertia_values().is_empty() {
        println!("\nSelection curves skipped (fixed cluster count, no diagnostics)");
    } else {
        viz::plot_selection_curves(&outcome.model, &curves_path)?;
        println!("\nSelection curves saved to: {}", curves_path.display());
    }

    let scatter_path = plots_dir.join("clusters.png");
    viz::plot_cluster_scatter(&outcome.labeled, "Income", "SpendingScore", &scatter_path)?;
    println!("Cluster scatter saved to: {}", scatter_path.display());

    let sizes_path = plots_dir.join("cluster_sizes.png");
    viz::plot_cluster_sizes(&outcome.labeled, &sizes_path)?;
    println!("Cluster sizes chart saved to: {}", sizes_path.display());

    let total_time = start_time.elapsed();
    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", total_time.as_secs_f64());
    println!("Model saved to: {}", args.model_out);
    println!("Preprocessor saved to: {}", args.preprocessor_out);
    println!("Labeled dataset saved to: {}", args.labeled_out);

    Ok(())
}
