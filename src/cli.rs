//! Command-line interface definitions and argument parsing

use crate::data::CustomerProfile;
use crate::error::Error;
use crate::model::SelectionMethod;
use clap::Parser;

/// Customer segmentation CLI: preprocessing, K-Means clustering and cluster analytics
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input customer CSV file
    #[arg(short, long, default_value = "data/customers.csv")]
    pub input: String,

    /// Fixed number of clusters; omit to select one from the diagnostics
    #[arg(short = 'k', long)]
    pub clusters: Option<usize>,

    /// Largest candidate cluster count evaluated during selection
    #[arg(long, default_value = "10")]
    pub max_k: usize,

    /// Cluster-count selection method
    #[arg(short, long, value_enum, default_value = "both")]
    pub method: SelectionMethod,

    /// Output path for the model snapshot
    #[arg(long, default_value = "model/kmeans_model.json")]
    pub model_out: String,

    /// Output path for the fitted preprocessor
    #[arg(long, default_value = "model/preprocessor.json")]
    pub preprocessor_out: String,

    /// Output path for the labeled dataset
    #[arg(long, default_value = "data/customers_clustered.csv")]
    pub labeled_out: String,

    /// Directory for diagnostic plots
    #[arg(long, default_value = "model")]
    pub plots_dir: String,

    /// Seed for all randomized initializations
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Prediction mode: classify one customer from existing artifacts.
    /// Comma-separated "age,gender,income,spending_score,region,purchase_frequency,avg_order_value,recency"
    /// Example: --predict "34,Male,58000,72,North,18,120.5,14"
    #[arg(short, long)]
    pub predict: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Parse the customer attributes from the predict string
    pub fn parse_customer(&self) -> crate::Result<Option<CustomerProfile>> {
        let predict_str = match &self.predict {
            Some(s) => s,
            None => return Ok(None),
        };

        let parts: Vec<&str> = predict_str.split(',').map(str::trim).collect();
        if parts.len() != 8 {
            return Err(Error::invalid_data(
                "predict values must be 'age,gender,income,spending_score,region,purchase_frequency,avg_order_value,recency'",
            ));
        }

        let number = |index: usize, name: &str| -> crate::Result<f64> {
            parts[index]
                .parse()
                .map_err(|_| Error::invalid_data(format!("invalid {} value: {}", name, parts[index])))
        };

        Ok(Some(CustomerProfile {
            age: number(0, "age")?,
            gender: parts[1].to_string(),
            income: number(2, "income")?,
            spending_score: number(3, "spending_score")?,
            region: parts[4].to_string(),
            purchase_frequency: number(5, "purchase_frequency")?,
            avg_order_value: number(6, "avg_order_value")?,
            recency: number(7, "recency")?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            input: "test.csv".to_string(),
            clusters: None,
            max_k: 10,
            method: SelectionMethod::Both,
            model_out: "model/kmeans_model.json".to_string(),
            preprocessor_out: "model/preprocessor.json".to_string(),
            labeled_out: "data/customers_clustered.csv".to_string(),
            plots_dir: "model".to_string(),
            seed: 42,
            predict: None,
            verbose: false,
        }
    }

    #[test]
    fn test_parse_customer() {
        let mut args = base_args();
        args.predict = Some("34,Male,58000,72,North,18,120.5,14".to_string());

        let profile = args.parse_customer().unwrap().unwrap();
        assert_eq!(profile.age, 34.0);
        assert_eq!(profile.gender, "Male");
        assert_eq!(profile.avg_order_value, 120.5);
        assert_eq!(profile.region, "North");

        args.predict = None;
        assert!(args.parse_customer().unwrap().is_none());

        args.predict = Some("34,Male,58000".to_string());
        assert!(args.parse_customer().is_err());

        args.predict = Some("old,Male,58000,72,North,18,120.5,14".to_string());
        assert!(args.parse_customer().is_err());
    }
}
