// THEORY:
// The `BlobDetector` is the engine of the spatial layer. It implements plain
// connected-component labeling over a palette-indexed frame: every maximal
// region of 4-connected pixels that share a colour becomes one `Blob`.
//
// Key architectural principles & algorithm steps:
// 1.  **Raster Seeding**: The frame is scanned row by row. The first unlabeled,
//     non-background pixel met becomes the seed of a new blob, so blob ids follow
//     raster order and two runs over the same frame label it identically.
// 2.  **Region Growing**: From the seed, a breadth-first search visits the four
//     direct neighbours (no diagonals) of the same colour, labelling each pixel
//     exactly once.
// 3.  **Data Aggregation**: Once a region is complete, its bounding box and
//     box-local pixel mask are built from the collected pixels.
// 4.  **Adjacency**: A final pass links blobs whose pixels touch in the
//     8-neighbourhood. Diagonal contact never joins two regions into one blob,
//     but it does make them neighbours, which the object layer relies on.
// 5.  **Stateless Utility**: Apart from the id generator it is handed, the
//     detector keeps no memory between frames.

use crate::core_modules::blob::{Blob, BlobId, BlobMap};
use crate::core_modules::frame::{ColorIndex, Frame};
use crate::core_modules::geometry::{BoundingBox, Point};
use crate::core_modules::id_generator::IdGenerator;
use crate::core_modules::pixel_mask::PixelMask;

pub mod blob_detector {
    use super::*; // Make structs from parent module available.
    use log::trace;
    use std::collections::VecDeque;

    /// Labels every non-background pixel of `frame` into blobs with fresh ids.
    /// An all-background frame yields an empty map.
    pub fn find_blobs(frame: &Frame, background: ColorIndex, ids: &mut IdGenerator) -> BlobMap {
        let width = frame.width() as usize;
        let height = frame.height() as usize;

        // --- 1. Labeling ---
        // `labels` holds the owning blob id of every pixel once it is visited.
        let mut labels: Vec<Option<BlobId>> = vec![None; width * height];
        let mut blobs = BlobMap::new();

        for y in 0..height {
            for x in 0..width {
                let color = frame.get(x as u32, y as u32);
                if color == background || labels[y * width + x].is_some() {
                    continue;
                }

                let id = ids.next_id();
                let blob = grow_blob_from_seed(frame, Point::new(x as i32, y as i32), color, id, &mut labels);
                blobs.insert(id, blob);
            }
        }

        // --- 2. Adjacency ---
        // Only the forward half of the 8-neighbourhood is inspected; each link is
        // recorded on both sides.
        for y in 0..height {
            for x in 0..width {
                let Some(a) = labels[y * width + x] else { continue };
                for (dx, dy) in [(1i64, 0i64), (-1, 1), (0, 1), (1, 1)] {
                    let nx = x as i64 + dx;
                    let ny = y as i64 + dy;
                    if nx < 0 || nx >= width as i64 || ny >= height as i64 {
                        continue;
                    }
                    if let Some(b) = labels[ny as usize * width + nx as usize] {
                        if a != b {
                            link(&mut blobs, a, b);
                        }
                    }
                }
            }
        }

        trace!("detected {} blobs", blobs.len());
        blobs
    }

    fn link(blobs: &mut BlobMap, a: BlobId, b: BlobId) {
        if let Some(blob) = blobs.get_mut(&a) {
            blob.neighbors.insert(b);
        }
        if let Some(blob) = blobs.get_mut(&b) {
            blob.neighbors.insert(a);
        }
    }

    /// Breadth-first search collecting the 4-connected region of `color` around `seed`.
    fn grow_blob_from_seed(
        frame: &Frame,
        seed: Point,
        color: ColorIndex,
        blob_id: BlobId,
        labels: &mut [Option<BlobId>],
    ) -> Blob {
        let width = frame.width() as i32;
        let height = frame.height() as i32;

        let mut region: Vec<Point> = Vec::new();
        let mut queue: VecDeque<Point> = VecDeque::from([seed]);
        labels[(seed.y * width + seed.x) as usize] = Some(blob_id);
        let mut bounding_box = BoundingBox::at(seed);

        while let Some(current) = queue.pop_front() {
            region.push(current);
            bounding_box.include(current);

            // Check all 4 direct neighbors (not diagonals).
            for (dx, dy) in &[(0, 1), (0, -1), (1, 0), (-1, 0)] {
                let nx = current.x + dx;
                let ny = current.y + dy;

                if nx >= 0 && nx < width && ny >= 0 && ny < height {
                    let index = (ny * width + nx) as usize;
                    if labels[index].is_none() && frame.get(nx as u32, ny as u32) == color {
                        labels[index] = Some(blob_id);
                        queue.push_back(Point::new(nx, ny));
                    }
                }
            }
        }

        // --- Data Aggregation ---
        let mut mask = PixelMask::new(bounding_box.width(), bounding_box.height());
        for point in &region {
            mask.set_pixel(
                (point.x - bounding_box.x_min) as u32,
                (point.y - bounding_box.y_min) as u32,
                true,
            );
        }

        Blob::new(blob_id, color, bounding_box, mask)
    }
}

#[cfg(test)]
mod tests {
    use super::blob_detector::find_blobs;
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    const BG: ColorIndex = 0;

    fn frame_from_rows(rows: &[&str]) -> Frame {
        let height = rows.len() as u32;
        let width = rows[0].len() as u32;
        let pixels = rows
            .iter()
            .flat_map(|row| row.bytes().map(|b| if b == b'.' { BG } else { b - b'0' }))
            .collect();
        Frame::new(width, height, pixels).unwrap()
    }

    #[test]
    fn empty_frame_has_no_blobs() {
        let frame = Frame::filled(8, 8, BG);
        assert!(find_blobs(&frame, BG, &mut IdGenerator::new()).is_empty());
    }

    #[test]
    fn separates_colours_and_components() {
        let frame = frame_from_rows(&[
            "11..2", //
            "1...2",
            "...22",
            "33...",
        ]);
        let blobs = find_blobs(&frame, BG, &mut IdGenerator::new());
        assert_eq!(blobs.len(), 3);

        let first = &blobs[&0];
        assert_eq!(first.color, 1);
        assert_eq!(first.mask.size(), 3);
        assert_eq!((first.bounding_box.x_min, first.bounding_box.x_max), (0, 1));

        let second = &blobs[&1];
        assert_eq!(second.color, 2);
        assert_eq!(second.mask.size(), 4);
        assert_eq!(second.bounding_box.area(), 6);
        assert!(!second.mask.get_pixel(0, 0));

        assert_eq!(blobs[&2].color, 3);
    }

    #[test]
    fn diagonal_contact_makes_neighbours_not_one_blob() {
        let frame = frame_from_rows(&[
            "11..", //
            "11..",
            "..11",
            "..11",
        ]);
        let blobs = find_blobs(&frame, BG, &mut IdGenerator::new());
        assert_eq!(blobs.len(), 2);
        assert!(blobs[&0].neighbors.contains(&1));
        assert!(blobs[&1].neighbors.contains(&0));
    }

    #[test]
    fn touching_colours_are_neighbours() {
        let frame = frame_from_rows(&["1122"]);
        let blobs = find_blobs(&frame, BG, &mut IdGenerator::new());
        assert_eq!(blobs[&0].neighbors.iter().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn ids_continue_across_frames() {
        let frame = frame_from_rows(&["1.2"]);
        let mut ids = IdGenerator::new();
        find_blobs(&frame, BG, &mut ids);
        let second = find_blobs(&frame, BG, &mut ids);
        assert_eq!(second.keys().copied().collect::<Vec<_>>(), vec![2, 3]);
    }

    proptest! {
        #[test]
        fn every_foreground_pixel_in_exactly_one_blob(
            pixels in proptest::collection::vec(0u8..4, 12 * 9)
        ) {
            let frame = Frame::new(12, 9, pixels).unwrap();
            let blobs = find_blobs(&frame, BG, &mut IdGenerator::new());

            let mut owners: HashMap<Point, u32> = HashMap::new();
            for blob in blobs.values() {
                for p in blob.screen_pixels() {
                    prop_assert_eq!(frame.get(p.x as u32, p.y as u32), blob.color);
                    *owners.entry(p).or_default() += 1;
                }
            }
            for y in 0..9u32 {
                for x in 0..12u32 {
                    let p = Point::new(x as i32, y as i32);
                    let expected = if frame.get(x, y) == BG { 0 } else { 1 };
                    prop_assert_eq!(owners.get(&p).copied().unwrap_or(0), expected);
                }
            }
        }
    }
}
