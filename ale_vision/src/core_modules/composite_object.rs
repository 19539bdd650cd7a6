use crate::core_modules::blob::{BlobId, BlobMap};
use crate::core_modules::geometry::{BoundingBox, Point, Velocity};
use crate::core_modules::pixel_mask::PixelMask;
use std::collections::{BTreeMap, BTreeSet};

pub type ObjectId = u64;

/// Live composite objects keyed by id.
pub type ObjectMap = BTreeMap<ObjectId, CompositeObject>;

/// Blobs of one frame that move together. Produced by the merge step before the
/// group has an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobGroup {
    /// Blob the group was grown from; always a member.
    pub seed: BlobId,
    pub blob_ids: BTreeSet<BlobId>,
    pub velocity: Velocity,
}

/// A persistent entity made of one or more blobs that share velocity.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeObject {
    pub id: ObjectId,
    /// Member blobs in the frame the object was last seen.
    pub blob_ids: BTreeSet<BlobId>,
    /// Pixel-union of the member blob masks, local to `bounding_box`.
    pub mask: PixelMask,
    /// Union of the member bounding boxes.
    pub bounding_box: BoundingBox,
    pub velocity: Velocity,
    /// Frames this object has been tracked; 0 in the frame it first appears.
    pub age: u32,
    pub frames_since_last_movement: u32,
    /// Consecutive frames without a match. Non-zero only in the lost pool.
    pub frames_unseen: u32,
    /// Prototype assigned in the current frame, if any.
    pub prototype_id: Option<u64>,
}

impl CompositeObject {
    /// Builds a fresh object from a blob group.
    ///
    /// Panics if the group names a blob missing from `blobs`; groups always come
    /// from merging the same map.
    pub fn from_group(id: ObjectId, group: &BlobGroup, blobs: &BlobMap) -> Self {
        let bounding_box = group
            .blob_ids
            .iter()
            .map(|bid| blobs[bid].bounding_box)
            .fold(blobs[&group.seed].bounding_box, |a, b| a.union(&b));

        let mut object = Self {
            id,
            blob_ids: group.blob_ids.clone(),
            mask: PixelMask::new(bounding_box.width(), bounding_box.height()),
            bounding_box,
            velocity: group.velocity,
            age: 0,
            frames_since_last_movement: 0,
            frames_unseen: 0,
            prototype_id: None,
        };
        object.compute_mask(blobs);
        object
    }

    /// Rebuilds `mask` from the member blobs.
    pub fn compute_mask(&mut self, blobs: &BlobMap) {
        self.mask = PixelMask::new(self.bounding_box.width(), self.bounding_box.height());
        for bid in &self.blob_ids {
            for p in blobs[bid].screen_pixels() {
                self.mask.set_pixel(
                    (p.x - self.bounding_box.x_min) as u32,
                    (p.y - self.bounding_box.y_min) as u32,
                    true,
                );
            }
        }
    }

    pub fn centroid(&self) -> Point {
        self.bounding_box.center()
    }

    /// Expected centroid after `frames` more frames at the current velocity.
    pub fn predicted_centroid(&self, frames: u32) -> Point {
        let c = self.centroid();
        Point::new(
            c.x + self.velocity.dx * frames as i32,
            c.y + self.velocity.dy * frames as i32,
        )
    }

    /// Screen coordinates of every pixel in the object.
    pub fn screen_pixels(&self) -> impl Iterator<Item = Point> + '_ {
        let origin = Point::new(self.bounding_box.x_min, self.bounding_box.y_min);
        self.mask
            .active_pixels()
            .map(move |(x, y)| Point::new(origin.x + x as i32, origin.y + y as i32))
    }
}
