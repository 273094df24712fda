use anyhow::{Context, Result};
use dicom_stream::{Config, Pipeline};
use tracing::info;

fn main() -> Result<()> {
    init_tracing();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            Config::load(&path).with_context(|| format!("failed to load config from {path}"))?
        }
        None => Config::default(),
    };

    let pipeline = Pipeline::connect(&config);
    info!(
        host = %config.connection.hostname,
        "watching scanner for new acquisitions"
    );

    for volume in pipeline.volumes().iter() {
        let (rows, cols, slices) = volume.dim();
        info!(
            exam = volume.exam,
            series = volume.series,
            acquisition = volume.acquisition,
            rows,
            cols,
            slices,
            tr = volume.tr,
            "assembled volume"
        );
    }

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();
}
