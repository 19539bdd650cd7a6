use ale_vision::calibration::Calibration;
use ale_vision::render::{self, DisplayMode};
use ale_vision::{Action, Frame, Palette, PipelineConfig, VisionPipeline};
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Replays recorded PNG frames through a vision pipeline and writes annotated frames.
#[derive(Parser, Debug)]
#[command(name = "frame_tester")]
#[command(about = "Replay PNG frames through ale_vision and write annotated PNGs")]
struct Args {
    /// Directory of PNG frames, replayed in file-name order
    frames_dir: PathBuf,

    /// Directory for the annotated frames
    output_dir: PathBuf,

    /// File with one action index per line
    #[arg(long)]
    actions: Option<PathBuf>,

    /// Overlay drawn on each frame
    #[arg(long, value_enum, default_value_t = Mode::Objects)]
    mode: Mode,

    /// Directory of reference masks of the agent's sprite
    #[arg(long)]
    self_masks: Option<PathBuf>,

    /// Directory with one subdirectory of masks per object class
    #[arg(long)]
    class_masks: Option<PathBuf>,

    /// Save the final self object's mask to this file
    #[arg(long)]
    save_self: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Screen,
    Blobs,
    Objects,
    Prototypes,
}

impl From<Mode> for DisplayMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Screen => DisplayMode::Screen,
            Mode::Blobs => DisplayMode::Blobs,
            Mode::Objects => DisplayMode::Objects,
            Mode::Prototypes => DisplayMode::Prototypes,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    // --- 1. Argument Parsing & Setup ---
    let args = Args::parse();
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("cannot create output directory {:?}", args.output_dir))?;

    let frame_paths = list_frames(&args.frames_dir)?;
    let Some(first) = frame_paths.first() else {
        bail!("no PNG frames in {:?}", args.frames_dir);
    };
    let actions = match &args.actions {
        Some(path) => read_actions(path)?,
        None => Vec::new(),
    };

    // --- 2. Vision Pipeline Initialization ---
    let first = image::open(first).with_context(|| format!("cannot open {first:?}"))?.to_rgb8();
    let config = PipelineConfig {
        image_width: first.width(),
        image_height: first.height(),
        ..Default::default()
    };
    let calibration = Calibration::load(args.self_masks.as_deref(), args.class_masks.as_deref());
    let mut pipeline = VisionPipeline::with_calibration(config, calibration)?;
    info!(
        "replaying {} frames at {}x{}, self detection {:?}",
        frame_paths.len(),
        first.width(),
        first.height(),
        pipeline.self_detection()
    );

    // --- 3. Main Processing Loop ---
    let mut palette = Palette::new();
    for (i, path) in frame_paths.iter().enumerate() {
        let image = image::open(path).with_context(|| format!("cannot open {path:?}"))?.to_rgb8();
        let frame = Frame::from_rgb_image(&image, &mut palette)?;
        let action = actions.get(i).copied().unwrap_or_default();

        let summary = match pipeline.process_frame(&frame, action) {
            Ok(summary) => summary,
            Err(e) => {
                warn!("skipping {path:?}: {e}");
                continue;
            }
        };
        info!(
            "frame {}: {} blobs, {} objects, {} prototypes, self at {:?}",
            summary.frame_number,
            summary.blob_count,
            pipeline.objects().len(),
            pipeline.prototypes().len(),
            pipeline.self_centroid()
        );

        // --- 4. Visualization ---
        if let Some(annotated) = render::render(&pipeline, &palette, args.mode.into()) {
            let out = args.output_dir.join(format!("frame_{i:05}.png"));
            annotated.save(&out).with_context(|| format!("cannot write {out:?}"))?;
        }
    }

    // --- 5. Optional Selection Export ---
    if let Some(path) = &args.save_self {
        match pipeline.self_object() {
            Some(object) => {
                pipeline.export_object_mask(object.id, path)?;
                info!("saved self mask of object {} to {path:?}", object.id);
            }
            None => warn!("self was not found, nothing saved to {path:?}"),
        }
    }

    println!("Processing complete. Output saved to {:?}", args.output_dir);
    Ok(())
}

/// PNG files in `dir`, sorted by name so numbered dumps replay in order.
fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("cannot read frames directory {dir:?}"))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|e| e.eq_ignore_ascii_case("png")))
        .collect();
    paths.sort();
    Ok(paths)
}

/// One action index per line; blank lines count as `Noop`.
fn read_actions(path: &Path) -> Result<Vec<Action>> {
    let text = fs::read_to_string(path).with_context(|| format!("cannot read actions file {path:?}"))?;
    text.lines()
        .enumerate()
        .map(|(n, line)| {
            let line = line.trim();
            if line.is_empty() {
                return Ok(Action::Noop);
            }
            let index: u8 = line
                .parse()
                .with_context(|| format!("{path:?} line {}: {line:?} is not an action index", n + 1))?;
            Ok(Action::try_from(index)?)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positional_dirs_and_flags() {
        let args = Args::try_parse_from([
            "frame_tester",
            "frames",
            "out",
            "--mode",
            "prototypes",
            "--actions",
            "actions.txt",
        ])
        .unwrap();
        assert_eq!(args.frames_dir, PathBuf::from("frames"));
        assert_eq!(args.output_dir, PathBuf::from("out"));
        assert_eq!(args.mode, Mode::Prototypes);
        assert_eq!(args.actions, Some(PathBuf::from("actions.txt")));
        assert!(args.self_masks.is_none());
    }

    #[test]
    fn mode_defaults_to_objects_and_rejects_unknown() {
        let args = Args::try_parse_from(["frame_tester", "frames", "out"]).unwrap();
        assert_eq!(DisplayMode::from(args.mode), DisplayMode::Objects);
        assert!(Args::try_parse_from(["frame_tester", "frames", "out", "--mode", "heat"]).is_err());
        assert!(Args::try_parse_from(["frame_tester", "frames"]).is_err());
    }

    #[test]
    fn actions_file_maps_indices_and_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("actions.txt");
        fs::write(&path, "3\n\n11\n").unwrap();
        assert_eq!(read_actions(&path).unwrap(), vec![Action::Right, Action::Noop, Action::RightFire]);

        fs::write(&path, "42\n").unwrap();
        assert!(read_actions(&path).is_err());
    }
}
