// THEORY:
// The `BlobMatcher` solves the data association problem at the blob level: which
// blob in the previous frame is each blob of the current frame?
//
// Key architectural principles:
// 1.  **Colour is a hard filter**: Only previous blobs of exactly the same palette
//     index are candidates. Everything else is scored.
// 2.  **Aggregate score**: A candidate is scored by a weighted mean of centroid
//     proximity, mask overlap, bounding-box area similarity and density
//     similarity. Each signal lies in `[0, 1]`.
// 3.  **Greedy, one-to-one**: Current blobs are visited in id order and each
//     takes its best remaining candidate. A previous blob, once claimed, leaves
//     the pool.
// 4.  **Lifecycle events**: A match links the pair through `parent_id` /
//     `child_id` and gives the child a velocity. Unmatched current blobs are
//     births, unmatched previous blobs are deaths.

use crate::core_modules::blob::{Blob, BlobId, BlobMap};
use crate::core_modules::geometry::Velocity;
use crate::error::{Result, VisionError};
use log::trace;
use std::collections::BTreeSet;

/// Weights and thresholds for the aggregate blob match.
#[derive(Debug, Clone)]
pub struct BlobMatchConfig {
    pub distance_weight: f64,
    pub overlap_weight: f64,
    pub area_weight: f64,
    pub density_weight: f64,
    /// Centroid distance at which the proximity signal reaches zero.
    pub max_distance: f64,
    /// Centroid distance beyond which two blobs never match, whatever their score.
    pub max_displacement: f64,
    /// Minimum aggregate score for a candidate to be accepted.
    pub acceptance_threshold: f64,
}

impl Default for BlobMatchConfig {
    fn default() -> Self {
        Self {
            distance_weight: 1.0,
            overlap_weight: 1.0,
            area_weight: 1.0,
            density_weight: 1.0,
            max_distance: 50.0,
            max_displacement: 20.0,
            acceptance_threshold: 0.6,
        }
    }
}

impl BlobMatchConfig {
    pub fn validate(&self) -> Result<()> {
        let weights = [self.distance_weight, self.overlap_weight, self.area_weight, self.density_weight];
        if weights.iter().any(|w| *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(VisionError::InvalidConfig(
                "blob match weights must be non-negative with a positive sum".into(),
            ));
        }
        if self.max_distance <= 0.0 || self.max_displacement <= 0.0 {
            return Err(VisionError::InvalidConfig(
                "blob max_distance and max_displacement must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Outcome of matching one frame's blobs against the previous frame's.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlobMatchReport {
    /// `(parent, child)` pairs.
    pub matches: Vec<(BlobId, BlobId)>,
    /// Current blobs with no parent.
    pub births: Vec<BlobId>,
    /// Previous blobs with no child.
    pub deaths: Vec<BlobId>,
}

/// Aggregate similarity of two blobs in `[0, 1]`; zero for differing colours.
pub fn aggregate_blob_match(a: &Blob, b: &Blob, config: &BlobMatchConfig) -> f64 {
    if a.color != b.color {
        return 0.0;
    }

    let distance = a.centroid_distance(b);
    let distance_score = 1.0 - distance.min(config.max_distance) / config.max_distance;
    let overlap_score = a.mask.overlap_percent(&b.mask);
    let (area_a, area_b) = (a.bounding_box.area() as f64, b.bounding_box.area() as f64);
    let area_score = area_a.min(area_b) / area_a.max(area_b);
    let density_score = 1.0 - (a.density() - b.density()).abs();

    let weighted = config.distance_weight * distance_score
        + config.overlap_weight * overlap_score
        + config.area_weight * area_score
        + config.density_weight * density_score;
    let total = config.distance_weight + config.overlap_weight + config.area_weight + config.density_weight;
    weighted / total
}

struct Candidate {
    id: BlobId,
    score: f64,
    distance: f64,
}

/// Links `current` blobs to `previous` blobs, annotating velocity and the
/// reciprocal parent / child ids on both maps.
pub fn match_blobs(current: &mut BlobMap, previous: &mut BlobMap, config: &BlobMatchConfig) -> BlobMatchReport {
    let mut report = BlobMatchReport::default();
    let mut pool: BTreeSet<BlobId> = previous.keys().copied().collect();

    for blob in current.values_mut() {
        let mut best: Option<Candidate> = None;

        // Ascending id order, so equal score and distance keeps the smaller id.
        for &prev_id in &pool {
            let prev = &previous[&prev_id];
            if prev.color != blob.color {
                continue;
            }
            let distance = blob.centroid_distance(prev);
            if distance > config.max_displacement {
                continue;
            }
            let score = aggregate_blob_match(blob, prev, config);
            if score < config.acceptance_threshold {
                continue;
            }
            let better = match &best {
                None => true,
                Some(b) => score > b.score || (score == b.score && distance < b.distance),
            };
            if better {
                best = Some(Candidate { id: prev_id, score, distance });
            }
        }

        match best {
            Some(candidate) => {
                pool.remove(&candidate.id);
                if let Some(parent) = previous.get_mut(&candidate.id) {
                    parent.child_id = Some(blob.id);
                    blob.parent_id = Some(parent.id);
                    blob.velocity = Velocity::between(parent.centroid(), blob.centroid());
                }
                trace!(
                    "blob {} -> {} (score {:.3}, velocity {:?})",
                    candidate.id, blob.id, candidate.score, blob.velocity
                );
                report.matches.push((candidate.id, blob.id));
            }
            None => report.births.push(blob.id),
        }
    }

    report.deaths = pool.into_iter().collect();
    report
}
