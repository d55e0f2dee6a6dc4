use anyhow::{Context, Result};
use bbox::prelude::*;
use detect::config::{CategorySource, Config};
use noisy_float::prelude::*;
use serde::Serialize;
use std::{env, path::PathBuf, sync::Arc};
use structopt::StructOpt;
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};

#[derive(Debug, Clone, StructOpt)]
/// Detect objects in an image
struct Args {
    #[structopt(long, default_value = "detect.json5")]
    /// configuration file
    pub config_file: PathBuf,
    #[structopt(long)]
    /// input image
    pub image_path: PathBuf,
    #[structopt(long)]
    /// save the image with drawn boxes here
    pub output_path: Option<PathBuf>,
    #[structopt(long)]
    /// TorchScript model, overrides model.file
    pub model_path: Option<PathBuf>,
    #[structopt(long)]
    /// checkpoint file, overrides model.weights
    pub weights: Option<PathBuf>,
    #[structopt(long)]
    /// annotation table to rebuild the category map from, overrides categories
    pub csv_file: Option<PathBuf>,
    #[structopt(long)]
    /// confidence threshold, overrides threshold
    pub threshold: Option<f64>,
    #[structopt(long)]
    /// print the detections as JSON
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct Report {
    success: bool,
    detections: usize,
    objects: Vec<ObjectReport>,
}

#[derive(Debug, Serialize)]
struct ObjectReport {
    #[serde(rename = "box")]
    bbox: [f32; 4],
    label: String,
    score: f32,
}

#[tokio::main]
pub async fn main() -> Result<()> {
    // setup tracing
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).compact();
    let filter_layer = {
        let filter = EnvFilter::from_default_env();
        if env::var("RUST_LOG").is_err() {
            filter.add_directive(LevelFilter::INFO.into())
        } else {
            filter
        }
    };
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    // parse arguments
    let Args {
        config_file,
        image_path,
        output_path,
        model_path,
        weights,
        csv_file,
        threshold,
        json,
    } = Args::from_args();

    let config = {
        let mut config = Config::open(&config_file).with_context(|| {
            format!("failed to load config file '{}'", config_file.display())
        })?;
        if let Some(model_path) = model_path {
            config.model.file = model_path;
        }
        if let Some(weights) = weights {
            config.model.weights = Some(weights);
        }
        if let Some(csv_file) = csv_file {
            config.categories = CategorySource::Table { csv_file };
        }
        if let Some(threshold) = threshold {
            config.threshold = R64::try_new(threshold).context("the threshold must be finite")?;
        }
        Arc::new(config)
    };

    let detections = detect::start(config, image_path, output_path).await?;

    if json {
        let report = Report {
            success: true,
            detections: detections.len(),
            objects: detections
                .into_iter()
                .map(|detection| ObjectReport {
                    bbox: detection.bbox.xyxy(),
                    label: detection.category_name,
                    score: detection.score,
                })
                .collect(),
        };
        println!("{}", serde_json::to_string(&report)?);
    }

    Ok(())
}
