// The dataset builder. Reads a TOML config, discovers the representative pools and
// background recordings it names, writes the rotation sweep of every representative
// image and then synthesizes `frames_per_pool` frames per pool.

use anyhow::{Context, Result};
use clap::Parser;
use composite_synth::config::{DatasetConfig, OutputPaths};
use composite_synth::core_modules::frame_source::{FrameSource, ImageSequence, OpenSource};
use composite_synth::core_modules::representative_image::RepresentativeImage;
use composite_synth::core_modules::representative_pool::RepresentativePool;
use composite_synth::core_modules::utils::image_helper::image_helper;
use composite_synth::parallel_pipeline::SweepPool;
use composite_synth::pipeline::Synthesizer;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Degrees rotated concurrently before the results are written out.
const SWEEP_BATCH: usize = 32;

#[derive(Parser)]
#[command(name = "composite_synth")]
#[command(about = "Synthesize labeled object-detection images from segmented stills")]
#[command(version)]
struct Args {
    /// Dataset configuration file (TOML)
    config: PathBuf,

    /// Seed for every random choice; overrides the config file
    #[arg(long)]
    seed: Option<u64>,

    /// Rotation sweep workers (defaults to the number of CPUs)
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = DatasetConfig::load(&args.config)
        .with_context(|| format!("Failed to load config file: {}", args.config.display()))?;
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    let config = Arc::new(config);
    let paths = Arc::new(config.output_paths());
    paths.create_all().context("Failed to create output directories")?;

    let pools = RepresentativePool::discover(
        &config.representative_dir,
        &config.mask_dir,
        &config.extension,
        &config.classes,
    )
    .context("Failed to load representative images")?;
    info!(pools = pools.len(), "representative pools discovered");

    let background_dirs = background_dirs(&config)?;
    info!(sequences = background_dirs.len(), "background sequences discovered");

    // --- 1. Rotation sweeps ---
    if config.rotation_sweep {
        let sweep_pool = match args.workers {
            Some(n_worker) => SweepPool::new(n_worker),
            None => SweepPool::with_available_parallelism(),
        };
        for rep_image in pools.iter().flat_map(|pool| pool.images()) {
            write_sweep(&sweep_pool, rep_image, &config, &paths).await?;
        }
        sweep_pool.shutdown().await;
    }

    // --- 2. Synthesis, one blocking task and one generator per pool ---
    let handles: Vec<_> = pools
        .into_iter()
        .enumerate()
        .map(|(i_pool, pool)| {
            let config = Arc::clone(&config);
            let paths = Arc::clone(&paths);
            let background_dirs = background_dirs.clone();
            tokio::task::spawn_blocking(move || synthesize_pool(pool, i_pool as u64, &config, &paths, &background_dirs))
        })
        .collect();

    let mut n_frame = 0;
    for handle in futures::future::join_all(handles).await {
        n_frame += handle.context("Synthesis task panicked")??;
    }

    info!(frames = n_frame, output = %config.output_dir.display(), "dataset written");
    Ok(())
}

/// Every subdirectory of `backgrounds_dir`, or the directory itself if it holds the frames.
fn background_dirs(config: &DatasetConfig) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = ImageSequence::discover(&config.backgrounds_dir)
        .with_context(|| format!("Failed to read {}", config.backgrounds_dir.display()))?
        .into_iter()
        .map(|sequence| sequence.dir().to_path_buf())
        .collect();
    if dirs.is_empty() {
        dirs.push(config.backgrounds_dir.clone());
    }
    Ok(dirs)
}

async fn write_sweep(
    sweep_pool: &SweepPool,
    rep_image: &RepresentativeImage,
    config: &DatasetConfig,
    paths: &OutputPaths,
) -> Result<()> {
    sweep_pool
        .sweep_each(rep_image, SWEEP_BATCH, |sample| {
            let stem = format!("{}_{:03}degrees", rep_image.name(), sample.degrees);
            let image_name = format!("{stem}{}", config.extension);
            image_helper::save_image(&sample.image, &paths.domain_adaptation_images.join(&image_name))?;
            sample.label.save(&paths.domain_adaptation_labels.join(format!("{stem}.txt")))?;
            if config.preview {
                image_helper::save_labeled_image(
                    &sample.image,
                    &sample.label,
                    &config.classes,
                    &paths.domain_adaptation_labeled_images.join(&image_name),
                )?;
            }
            Ok(())
        })
        .await
        .with_context(|| format!("Rotation sweep of {} failed", rep_image.name()))
}

fn synthesize_pool(
    mut pool: RepresentativePool,
    i_pool: u64,
    config: &DatasetConfig,
    paths: &OutputPaths,
    background_dirs: &[PathBuf],
) -> Result<usize> {
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(i_pool));
    let mut synthesizer = Synthesizer::new(config.synthesis.clone())?;

    let mut sequences: Vec<ImageSequence> = background_dirs.iter().map(ImageSequence::new).collect();
    let mut backgrounds = sequences
        .iter_mut()
        .map(OpenSource::new)
        .collect::<composite_synth::Result<Vec<_>>>()?;

    for i_frame in 0..config.frames_per_pool {
        let i_source = rng.random_range(0..backgrounds.len());
        let frame = backgrounds[i_source].random_read(&mut rng, config.read_policy)?;
        let synthesized = synthesizer
            .synthesize(
                &frame,
                &mut pool,
                &config.foreground_augmentation,
                &config.background_augmentation,
                &mut rng,
            )
            .with_context(|| format!("Synthesis of frame {i_frame} from pool {} failed", pool.name()))?;

        let stem = format!("{}_{i_frame:06}", pool.name());
        let image_name = format!("{stem}{}", config.extension);
        image_helper::save_image(&synthesized.image, &paths.images.join(&image_name))?;
        synthesized.label.save(&paths.labels.join(format!("{stem}.txt")))?;
        if config.preview {
            image_helper::save_labeled_image(
                &synthesized.image,
                &synthesized.label,
                &config.classes,
                &paths.labeled_images.join(&image_name),
            )?;
        }
    }

    info!(pool = pool.name(), frames = config.frames_per_pool, "pool synthesized");
    Ok(config.frames_per_pool)
}
