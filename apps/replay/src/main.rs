use anyhow::{bail, Context};
use basalt::prelude::*;
use log::{error, info};
use std::{collections::BTreeMap, path::PathBuf, process};
use structopt::StructOpt;
use strum::VariantNames;

#[derive(Debug, StructOpt)]
#[structopt(no_version)]
struct AppParams {
    #[structopt(flatten)]
    renderer_params: RendererParams,

    /// Number of frames to record
    #[structopt(short = "n", long, default_value = "16")]
    frame_count: u32,

    /// Start a lightmap bake on the first frame
    #[structopt(long)]
    bake: bool,

    /// Denoise the lightmap on this frame
    #[structopt(long)]
    denoise_frame: Option<u32>,

    /// Run the median filter on this frame
    #[structopt(long)]
    median_frame: Option<u32>,

    /// Lightmap image to export
    #[structopt(long, possible_values=LightmapPreview::VARIANTS, default_value="final-lightmap")]
    preview: LightmapPreview,

    /// Write the lightmap preview to this file as PPM after the last frame
    #[structopt(long, parse(from_os_str))]
    export: Option<PathBuf>,

    /// Print every recorded command as JSON instead of a summary
    #[structopt(long)]
    json: bool,
}

fn print_summary(recorder: &Recorder) -> anyhow::Result<()> {
    let mut counts = BTreeMap::new();
    for command in recorder.commands() {
        let value = serde_json::to_value(command)?;
        let op = value["op"].as_str().unwrap_or("unknown").to_owned();
        *counts.entry(op).or_insert(0usize) += 1;
    }
    for (op, count) in counts.iter() {
        println!("{:>8} {}", count, op);
    }
    println!(
        "{:>8} live buffers, {} live images",
        recorder.live_buffer_count(),
        recorder.live_image_count()
    );
    Ok(())
}

fn run(params: &AppParams) -> anyhow::Result<()> {
    let mut settings = params
        .renderer_params
        .render_settings()
        .context("failed to load render settings")?;
    let presets = params
        .renderer_params
        .scene_presets()
        .context("failed to load scene presets")?;

    let mut recorder = Recorder::default();
    let mut renderer = Renderer::new(
        &mut recorder,
        params.renderer_params.size(),
        &settings,
        presets,
        Box::new(ProceduralScenes),
        DenoiserAdapter::with_median(),
    )?;
    if params.bake {
        renderer.baker_mut().start();
    }

    for frame in 0..params.frame_count {
        if params.denoise_frame == Some(frame) {
            renderer.baker_mut().request_denoise();
        }
        if params.median_frame == Some(frame) {
            renderer.baker_mut().request_median_denoise();
        }
        let report = renderer.update(&mut recorder, &mut settings)?;
        if let Some(kind) = report.scene_loaded {
            info!("frame {}: loaded {}", frame, kind);
        }
        if let Some(ms) = report.accel_build_time_ms {
            info!("frame {}: acceleration structure built in {:.3} ms", frame, ms);
        }
        recorder.end_frame();
    }

    let progress = renderer.progress();
    info!(
        "path trace at {}/{} samples, {} lightmap samples",
        progress.sample_index(),
        progress.target_sample_count(),
        renderer.baker().sample_index()
    );
    let size = renderer.size();
    info!(
        "{} rays per frame at path length {}",
        rays_per_frame(size, settings.path_trace.max_path_length),
        settings.path_trace.max_path_length
    );

    if let Some(path) = params.export.as_ref() {
        renderer.baker_mut().export_ppm(&mut recorder, params.preview, path)?;
    }
    renderer.destroy(&mut recorder);

    if params.json {
        println!("{}", recorder.commands_to_json()?);
    } else {
        print_summary(&recorder)?;
    }

    let violations = recorder.violations();
    if let Some(first) = violations.first() {
        bail!("recorded {} usage violations, first: {}", violations.len(), first);
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let params = AppParams::from_args();
    if let Err(err) = run(&params) {
        error!("{:#}", err);
        process::exit(1);
    }
}
