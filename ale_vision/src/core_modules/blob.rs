// THEORY:
// The `Blob` is the primary data container of the spatial layer. It represents
// one maximal region of identically coloured, 4-connected pixels in a single
// frame.
//
// Key architectural principles:
// 1.  **Snapshot, not a track**: A blob belongs to exactly one frame. Once the
//     detector emits it, only the matcher touches it again, and then only to
//     annotate velocity and the temporal links.
// 2.  **Temporal links are keys**: `parent_id` and `child_id` are plain ids into
//     the previous and next frame's blob maps. They are resolved by lookup, never
//     held as references, so history can be evicted freely.
// 3.  **Shape travels with the blob**: The mask is local to the bounding box, so
//     the same sprite at two positions produces two equal masks.

use crate::core_modules::frame::ColorIndex;
use crate::core_modules::geometry::{BoundingBox, Point, Velocity};
use crate::core_modules::pixel_mask::PixelMask;
use std::collections::{BTreeMap, BTreeSet};

pub type BlobId = u64;

/// All blobs of one frame keyed by id. Ordered so iteration is deterministic.
pub type BlobMap = BTreeMap<BlobId, Blob>;

/// A maximal 4-connected region of one colour in a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    /// Unique, never reused within a pipeline instance.
    pub id: BlobId,
    /// Palette index shared by every pixel of the blob.
    pub color: ColorIndex,
    /// Inclusive screen-space extent of the blob.
    pub bounding_box: BoundingBox,
    /// Shape of the blob relative to the top-left of `bounding_box`.
    pub mask: PixelMask,
    /// Blobs of this frame whose pixels touch this one (8-neighbourhood).
    pub neighbors: BTreeSet<BlobId>,
    /// Centroid displacement since the matched blob of the previous frame.
    pub velocity: Velocity,
    /// Matched blob in the previous frame.
    pub parent_id: Option<BlobId>,
    /// Matched blob in the next frame.
    pub child_id: Option<BlobId>,
}

impl Blob {
    pub fn new(id: BlobId, color: ColorIndex, bounding_box: BoundingBox, mask: PixelMask) -> Self {
        Self {
            id,
            color,
            bounding_box,
            mask,
            neighbors: BTreeSet::new(),
            velocity: Velocity::default(),
            parent_id: None,
            child_id: None,
        }
    }

    pub fn centroid(&self) -> Point {
        self.bounding_box.center()
    }

    pub fn centroid_distance(&self, other: &Blob) -> f64 {
        self.centroid().distance(&other.centroid())
    }

    /// Active pixels per pixel of bounding-box area.
    pub fn density(&self) -> f64 {
        self.mask.density()
    }

    /// Screen coordinates of every pixel in the blob.
    pub fn screen_pixels(&self) -> impl Iterator<Item = Point> + '_ {
        let origin = Point::new(self.bounding_box.x_min, self.bounding_box.y_min);
        self.mask
            .active_pixels()
            .map(move |(x, y)| Point::new(origin.x + x as i32, origin.y + y as i32))
    }
}
