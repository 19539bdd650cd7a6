// THEORY:
// Calibration files let a human hand the engine prior knowledge: what the agent's
// sprite looks like, and which shapes belong together as one class. They are
// read once when a pipeline is built and never written back by the core.
//
// File layout (`.mask`, plain text):
//
//     <width> <height> <active pixel count>
//     <x> <y>
//     <x> <y>
//     ...
//
// Loading is forgiving: a missing directory or a malformed file is logged and
// skipped, and the engine simply runs without that knowledge.

use crate::core_modules::pixel_mask::PixelMask;
use crate::error::{Result, VisionError};
use log::{info, warn};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const MASK_EXTENSION: &str = "mask";

/// Largest mask area accepted from a file, well above any emulator screen.
pub const MAX_MASK_PIXELS: u32 = 1 << 20;

/// Writes `mask` to `path` in the calibration layout.
pub fn export_mask(mask: &PixelMask, path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "{} {} {}", mask.width(), mask.height(), mask.size())?;
    for (x, y) in mask.active_pixels() {
        writeln!(writer, "{x} {y}")?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a mask written by [`export_mask`].
pub fn import_mask(path: &Path) -> Result<PixelMask> {
    let malformed = |reason: String| VisionError::MalformedMask {
        path: path.to_path_buf(),
        reason,
    };
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();

    let header = lines.next().ok_or_else(|| malformed("empty file".into()))??;
    let header = parse_numbers(&header).ok_or_else(|| malformed(format!("bad header {header:?}")))?;
    let [width, height, size] = header[..] else {
        return Err(malformed("header needs width, height and size".into()));
    };

    let area = width
        .checked_mul(height)
        .filter(|a| *a <= MAX_MASK_PIXELS)
        .ok_or_else(|| malformed(format!("{width}x{height} exceeds {MAX_MASK_PIXELS} pixels")))?;
    if size > area {
        return Err(malformed(format!("{size} active pixels cannot fit in {width}x{height}")));
    }

    let mut mask = PixelMask::new(width, height);
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let coords = parse_numbers(&line).ok_or_else(|| malformed(format!("bad pixel line {line:?}")))?;
        let [x, y] = coords[..] else {
            return Err(malformed(format!("pixel line {line:?} needs x and y")));
        };
        if x >= width || y >= height {
            return Err(malformed(format!("pixel ({x}, {y}) outside {width}x{height}")));
        }
        mask.set_pixel(x, y, true);
    }

    if mask.size() != size {
        return Err(malformed(format!("header says {size} pixels, found {}", mask.size())));
    }
    Ok(mask)
}

fn parse_numbers(line: &str) -> Option<Vec<u32>> {
    line.split_whitespace().map(|t| t.parse().ok()).collect()
}

/// Loads every `.mask` file in `dir`, in file-name order. Malformed files are
/// skipped with a warning.
pub fn load_masks_in_dir(dir: &Path) -> Result<Vec<PixelMask>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == MASK_EXTENSION))
        .collect();
    paths.sort();

    let mut masks = Vec::with_capacity(paths.len());
    for path in paths {
        match import_mask(&path) {
            Ok(mask) => masks.push(mask),
            Err(e) => warn!("skipping calibration mask: {e}"),
        }
    }
    Ok(masks)
}

/// Reference masks handed to a pipeline at start-up.
#[derive(Debug, Clone, Default)]
pub struct Calibration {
    /// Shapes of the agent's sprite.
    pub self_masks: Vec<PixelMask>,
    /// One mask set per known object class.
    pub class_masks: Vec<Vec<PixelMask>>,
}

impl Calibration {
    /// Loads self masks from `self_dir` and one class per subdirectory of
    /// `class_dir`. Any directory that cannot be read contributes nothing.
    pub fn load(self_dir: Option<&Path>, class_dir: Option<&Path>) -> Self {
        let mut calibration = Calibration::default();

        if let Some(dir) = self_dir {
            match load_masks_in_dir(dir) {
                Ok(masks) => calibration.self_masks = masks,
                Err(e) => warn!("cannot read self calibration in {dir:?}: {e}"),
            }
        }

        if let Some(dir) = class_dir {
            match Self::load_classes(dir) {
                Ok(classes) => calibration.class_masks = classes,
                Err(e) => warn!("cannot read class calibration in {dir:?}: {e}"),
            }
        }

        info!(
            "calibration: {} self masks, {} classes",
            calibration.self_masks.len(),
            calibration.class_masks.len()
        );
        calibration
    }

    fn load_classes(dir: &Path) -> Result<Vec<Vec<PixelMask>>> {
        let mut class_dirs: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        class_dirs.sort();

        let mut classes = Vec::new();
        for class_dir in class_dirs {
            match load_masks_in_dir(&class_dir) {
                Ok(masks) if !masks.is_empty() => classes.push(masks),
                Ok(_) => {}
                Err(e) => warn!("skipping class {class_dir:?}: {e}"),
            }
        }
        Ok(classes)
    }

    pub fn is_empty(&self) -> bool {
        self.self_masks.is_empty() && self.class_masks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sprite() -> PixelMask {
        let mut mask = PixelMask::new(5, 3);
        for (x, y) in [(0, 0), (4, 0), (1, 1), (2, 1), (3, 1), (2, 2)] {
            mask.set_pixel(x, y, true);
        }
        mask
    }

    #[test]
    fn export_then_import_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.mask");
        let mask = sprite();

        export_mask(&mask, &path).unwrap();
        let loaded = import_mask(&path).unwrap();

        assert_eq!(loaded.width(), mask.width());
        assert_eq!(loaded.height(), mask.height());
        assert_eq!(loaded.size(), mask.size());
        let before: HashSet<_> = mask.active_pixels().collect();
        let after: HashSet<_> = loaded.active_pixels().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn rejects_out_of_bounds_and_wrong_counts() {
        let dir = tempfile::tempdir().unwrap();

        let outside = dir.path().join("outside.mask");
        fs::write(&outside, "2 2 1\n2 0\n").unwrap();
        assert!(matches!(import_mask(&outside), Err(VisionError::MalformedMask { .. })));

        let miscounted = dir.path().join("miscounted.mask");
        fs::write(&miscounted, "2 2 3\n0 0\n1 1\n").unwrap();
        assert!(matches!(import_mask(&miscounted), Err(VisionError::MalformedMask { .. })));

        let garbage = dir.path().join("garbage.mask");
        fs::write(&garbage, "two by two\n").unwrap();
        assert!(matches!(import_mask(&garbage), Err(VisionError::MalformedMask { .. })));
    }

    #[test]
    fn oversized_header_is_malformed_not_a_crash() {
        let dir = tempfile::tempdir().unwrap();
        let huge = dir.path().join("huge.mask");
        fs::write(&huge, "70000 70000 0\n").unwrap();
        assert!(matches!(import_mask(&huge), Err(VisionError::MalformedMask { .. })));

        let crowded = dir.path().join("crowded.mask");
        fs::write(&crowded, "2 2 5\n").unwrap();
        assert!(matches!(import_mask(&crowded), Err(VisionError::MalformedMask { .. })));

        let calibration = Calibration::load(Some(dir.path()), None);
        assert!(calibration.self_masks.is_empty());
    }

    #[test]
    fn directory_loading_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        export_mask(&sprite(), &dir.path().join("a.mask")).unwrap();
        fs::write(dir.path().join("b.mask"), "nonsense").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let masks = load_masks_in_dir(dir.path()).unwrap();
        assert_eq!(masks, vec![sprite()]);
    }

    #[test]
    fn loads_classes_from_subdirectories() {
        let root = tempfile::tempdir().unwrap();
        let self_dir = root.path().join("self");
        let class_dir = root.path().join("classes");
        fs::create_dir_all(class_dir.join("enemy")).unwrap();
        fs::create_dir_all(class_dir.join("empty")).unwrap();
        fs::create_dir_all(&self_dir).unwrap();
        export_mask(&sprite(), &self_dir.join("player.mask")).unwrap();
        export_mask(&sprite(), &class_dir.join("enemy").join("frame0.mask")).unwrap();

        let calibration = Calibration::load(Some(&self_dir), Some(&class_dir));
        assert_eq!(calibration.self_masks.len(), 1);
        assert_eq!(calibration.class_masks.len(), 1);
    }

    #[test]
    fn missing_directories_yield_empty_calibration() {
        let calibration = Calibration::load(Some(Path::new("/nonexistent/self")), None);
        assert!(calibration.is_empty());
    }
}
