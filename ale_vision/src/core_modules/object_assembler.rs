// THEORY:
// The `object_assembler` module is the heart of the persistence layer. It adds
// "object permanence" on top of the per-frame blobs: several blobs that touch and
// move together become one `CompositeObject`, and that object keeps its identity
// from frame to frame.
//
// Key architectural principles:
// 1.  **Graph Expansion**: Blobs form a same-frame adjacency graph. Starting from
//     an unclaimed seed, a breadth-first walk admits neighbours whose velocity
//     matches the seed's within an epsilon. A multi-coloured sprite whose parts
//     move in lockstep therefore becomes one object.
// 2.  **Identity Matching**: Freshly merged groups are matched against the objects
//     of the previous frame (and the recently lost ones) with the same
//     aggregate-score principle as blob matching: mask overlap, velocity
//     agreement and distance to the predicted position.
// 3.  **Lifecycle Management**:
//     - **Birth**: an unmatched group becomes a new object with `age = 0`.
//     - **Tracking**: a matched group inherits the id and increments `age`.
//     - **Occlusion**: an unmatched object waits in the lost pool and can be
//       re-acquired until the invalidation window runs out.
//     - **Sanitization**: tiny or implausibly fast objects are discarded as noise
//       before anything downstream sees them.

use crate::core_modules::blob::{BlobId, BlobMap};
use crate::core_modules::composite_object::{BlobGroup, CompositeObject, ObjectId, ObjectMap};
use crate::core_modules::id_generator::IdGenerator;
use crate::error::{Result, VisionError};
use log::{debug, trace};
use std::collections::{BTreeSet, VecDeque};

/// Tunables for merging, identity matching and sanitization.
#[derive(Debug, Clone)]
pub struct ObjectConfig {
    /// Largest per-axis velocity difference for two neighbouring blobs to merge.
    pub velocity_epsilon: i32,
    /// Only moving blobs may seed a new object.
    pub seed_moving_only: bool,
    pub overlap_weight: f64,
    pub velocity_weight: f64,
    pub distance_weight: f64,
    /// Distance from the predicted centroid at which the proximity signal reaches zero.
    pub max_distance: f64,
    /// Velocity difference at which the velocity signal reaches zero.
    pub max_velocity_difference: f64,
    /// Minimum aggregate score to inherit an identity.
    pub acceptance_threshold: f64,
    /// Objects with a smaller bounding-box area are noise.
    pub min_object_area: u32,
    /// Objects moving faster than this (pixels per frame) are noise.
    pub max_velocity: f64,
    /// Frames a lost object can stay unseen before it expires.
    pub invalidation_window: u32,
}

impl Default for ObjectConfig {
    fn default() -> Self {
        Self {
            velocity_epsilon: 0,
            seed_moving_only: false,
            overlap_weight: 1.0,
            velocity_weight: 1.0,
            distance_weight: 1.0,
            max_distance: 30.0,
            max_velocity_difference: 8.0,
            acceptance_threshold: 0.5,
            min_object_area: 2,
            max_velocity: 20.0,
            invalidation_window: 10,
        }
    }
}

impl ObjectConfig {
    pub fn validate(&self) -> Result<()> {
        let weights = [self.overlap_weight, self.velocity_weight, self.distance_weight];
        if weights.iter().any(|w| *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(VisionError::InvalidConfig(
                "object match weights must be non-negative with a positive sum".into(),
            ));
        }
        if self.velocity_epsilon < 0 {
            return Err(VisionError::InvalidConfig("velocity_epsilon must not be negative".into()));
        }
        if self.max_distance <= 0.0 || self.max_velocity_difference <= 0.0 {
            return Err(VisionError::InvalidConfig(
                "object max_distance and max_velocity_difference must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Merges neighbouring blobs with matching velocity into groups.
///
/// Seeds are taken in ascending blob id order and every blob ends up in at
/// most one group.
pub fn merge_blobs(blobs: &BlobMap, config: &ObjectConfig) -> Vec<BlobGroup> {
    let mut claimed: BTreeSet<BlobId> = BTreeSet::new();
    let mut groups = Vec::new();

    for (&seed_id, seed) in blobs {
        if claimed.contains(&seed_id) {
            continue;
        }
        if config.seed_moving_only && seed.velocity.is_zero() {
            continue;
        }

        let velocity = seed.velocity;
        let mut members = BTreeSet::from([seed_id]);
        let mut queue = VecDeque::from([seed_id]);
        claimed.insert(seed_id);

        while let Some(current) = queue.pop_front() {
            for neighbor_id in &blobs[&current].neighbors {
                if claimed.contains(neighbor_id) {
                    continue;
                }
                let Some(neighbor) = blobs.get(neighbor_id) else { continue };
                if neighbor.velocity.within(&velocity, config.velocity_epsilon) {
                    claimed.insert(*neighbor_id);
                    members.insert(*neighbor_id);
                    queue.push_back(*neighbor_id);
                }
            }
        }

        groups.push(BlobGroup {
            seed: seed_id,
            blob_ids: members,
            velocity,
        });
    }

    groups
}

/// Aggregate similarity between a fresh object and a previously tracked one.
pub fn aggregate_object_match(current: &CompositeObject, previous: &CompositeObject, config: &ObjectConfig) -> f64 {
    let overlap_score = current.mask.overlap_percent(&previous.mask);

    let velocity_difference = current.velocity.difference(&previous.velocity);
    let velocity_score =
        1.0 - velocity_difference.min(config.max_velocity_difference) / config.max_velocity_difference;

    let predicted = previous.predicted_centroid(previous.frames_unseen + 1);
    let distance = current.centroid().distance(&predicted);
    let distance_score = 1.0 - distance.min(config.max_distance) / config.max_distance;

    let weighted = config.overlap_weight * overlap_score
        + config.velocity_weight * velocity_score
        + config.distance_weight * distance_score;
    weighted / (config.overlap_weight + config.velocity_weight + config.distance_weight)
}

/// What happened to objects during one update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssemblyReport {
    /// Objects first seen this frame.
    pub born: Vec<ObjectId>,
    /// Objects that kept their identity from an earlier frame.
    pub tracked: Vec<ObjectId>,
    /// Objects dropped as noise this frame.
    pub sanitized: Vec<ObjectId>,
    /// Lost objects that ran past the invalidation window.
    pub expired: Vec<ObjectId>,
}

/// Owns the live object map, the lost pool and the object id generator.
#[derive(Debug, Clone, Default)]
pub struct ObjectAssembler {
    objects: ObjectMap,
    lost: ObjectMap,
    ids: IdGenerator,
}

impl ObjectAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Objects seen in the current frame.
    pub fn objects(&self) -> &ObjectMap {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectMap {
        &mut self.objects
    }

    /// Objects that went unseen but may still be re-acquired.
    pub fn lost_objects(&self) -> &ObjectMap {
        &self.lost
    }

    /// Merges `blobs` into objects, carries identities over from the previous
    /// frame, ages the lost pool and sanitizes the result.
    pub fn update(&mut self, blobs: &BlobMap, config: &ObjectConfig) -> AssemblyReport {
        let mut report = AssemblyReport::default();
        let groups = merge_blobs(blobs, config);

        // Fresh objects get a placeholder identity until matching decides.
        let fresh: Vec<CompositeObject> = groups
            .iter()
            .map(|group| CompositeObject::from_group(ObjectId::MAX, group, blobs))
            .collect();

        // --- 1. Matching ---
        let mut pool: ObjectMap = std::mem::take(&mut self.objects);
        pool.append(&mut std::mem::take(&mut self.lost));

        let mut inherited: Vec<Option<CompositeObject>> = Vec::with_capacity(fresh.len());
        for object in &fresh {
            let mut best: Option<(ObjectId, f64, f64)> = None;
            for (&prev_id, prev) in &pool {
                let score = aggregate_object_match(object, prev, config);
                if score < config.acceptance_threshold {
                    continue;
                }
                let distance = object.centroid().distance(&prev.predicted_centroid(prev.frames_unseen + 1));
                let better = match best {
                    None => true,
                    Some((_, s, d)) => score > s || (score == s && distance < d),
                };
                if better {
                    best = Some((prev_id, score, distance));
                }
            }
            inherited.push(best.and_then(|(id, _, _)| pool.remove(&id)));
        }

        // --- 2. State Updating ---
        for (mut object, previous) in fresh.into_iter().zip(inherited) {
            match previous {
                Some(prev) => {
                    object.id = prev.id;
                    object.age = prev.age + 1;
                    object.frames_since_last_movement = if object.velocity.is_zero() {
                        prev.frames_since_last_movement + 1
                    } else {
                        0
                    };
                    report.tracked.push(object.id);
                }
                None => {
                    object.id = self.ids.next_id();
                    report.born.push(object.id);
                }
            }
            trace!(
                "object {} age {} blobs {:?} velocity {:?}",
                object.id, object.age, object.blob_ids, object.velocity
            );
            self.objects.insert(object.id, object);
        }

        // Unmatched previous objects are occluded or gone.
        for (id, mut object) in pool {
            object.frames_unseen += 1;
            object.prototype_id = None;
            if object.frames_unseen <= config.invalidation_window {
                self.lost.insert(id, object);
            } else {
                report.expired.push(id);
            }
        }

        // --- 3. Sanitization ---
        report.sanitized = self.sanitize(config);
        report.born.retain(|id| !report.sanitized.contains(id));
        report.tracked.retain(|id| !report.sanitized.contains(id));

        debug!(
            "objects: {} live, {} lost, {} born, {} sanitized, {} expired",
            self.objects.len(),
            self.lost.len(),
            report.born.len(),
            report.sanitized.len(),
            report.expired.len()
        );
        report
    }

    /// Removes live objects that are too small or too fast to be real.
    fn sanitize(&mut self, config: &ObjectConfig) -> Vec<ObjectId> {
        let noise: Vec<ObjectId> = self
            .objects
            .values()
            .filter(|o| o.bounding_box.area() < config.min_object_area || o.velocity.magnitude() > config.max_velocity)
            .map(|o| o.id)
            .collect();
        for id in &noise {
            self.objects.remove(id);
        }
        noise
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::blob::Blob;
    use crate::core_modules::blob_detector::blob_detector::find_blobs;
    use crate::core_modules::blob_matcher::{BlobMatchConfig, match_blobs};
    use crate::core_modules::frame::Frame;
    use crate::core_modules::geometry::{Point, Velocity};
    use std::collections::HashSet;

    fn paint(frame: &mut Frame, x: u32, y: u32, w: u32, h: u32, color: u8) {
        for dy in 0..h {
            for dx in 0..w {
                frame.set(x + dx, y + dy, color);
            }
        }
    }

    fn with_velocity(mut blobs: BlobMap, velocity: Velocity) -> BlobMap {
        blobs.values_mut().for_each(|b: &mut Blob| b.velocity = velocity);
        blobs
    }

    #[test]
    fn diagonal_same_colour_blobs_with_shared_velocity_merge() {
        let mut frame = Frame::filled(20, 20, 0);
        paint(&mut frame, 2, 2, 2, 2, 4);
        paint(&mut frame, 4, 4, 3, 3, 4);
        let blobs = with_velocity(find_blobs(&frame, 0, &mut IdGenerator::new()), Velocity::new(1, 0));
        assert_eq!(blobs.len(), 2);

        let mut assembler = ObjectAssembler::new();
        let report = assembler.update(&blobs, &ObjectConfig::default());

        assert_eq!(report.born, vec![0]);
        let object = &assembler.objects()[&0];
        assert_eq!(object.blob_ids.len(), 2);
        let union = blobs[&0].bounding_box.union(&blobs[&1].bounding_box);
        assert_eq!(object.bounding_box, union);
        assert_eq!(object.mask.size(), 4 + 9);
        assert_eq!(object.age, 0);
    }

    #[test]
    fn differing_velocity_keeps_blobs_apart() {
        let mut frame = Frame::filled(20, 20, 0);
        paint(&mut frame, 2, 2, 2, 2, 4);
        paint(&mut frame, 4, 2, 2, 2, 5);
        let mut blobs = find_blobs(&frame, 0, &mut IdGenerator::new());
        blobs.get_mut(&1).unwrap().velocity = Velocity::new(3, 0);

        let groups = merge_blobs(&blobs, &ObjectConfig::default());
        assert_eq!(groups.len(), 2);

        let tolerant = ObjectConfig {
            velocity_epsilon: 3,
            ..Default::default()
        };
        assert_eq!(merge_blobs(&blobs, &tolerant).len(), 1);
    }

    #[test]
    fn object_mask_is_union_of_member_blobs() {
        let mut frame = Frame::filled(24, 24, 0);
        paint(&mut frame, 3, 3, 4, 2, 1);
        paint(&mut frame, 3, 5, 2, 3, 2);
        paint(&mut frame, 7, 3, 1, 5, 3);
        paint(&mut frame, 15, 15, 2, 2, 1);
        let blobs = find_blobs(&frame, 0, &mut IdGenerator::new());

        let mut assembler = ObjectAssembler::new();
        assembler.update(&blobs, &ObjectConfig::default());

        for object in assembler.objects().values() {
            let from_blobs: HashSet<Point> = object
                .blob_ids
                .iter()
                .flat_map(|id| blobs[id].screen_pixels().collect::<Vec<_>>())
                .collect();
            let from_mask: HashSet<Point> = object.screen_pixels().collect();
            assert_eq!(from_blobs, from_mask);
        }
        assert_eq!(assembler.objects().len(), 2);
    }

    #[test]
    fn identity_and_age_persist_across_frames() {
        let mut ids = IdGenerator::new();
        let config = ObjectConfig::default();
        let mut assembler = ObjectAssembler::new();
        let mut previous = BlobMap::new();

        for step in 0..4u32 {
            let mut frame = Frame::filled(40, 20, 0);
            paint(&mut frame, 5 + 2 * step, 5, 3, 3, 6);
            let mut blobs = find_blobs(&frame, 0, &mut ids);
            match_blobs(&mut blobs, &mut previous, &BlobMatchConfig::default());
            let report = assembler.update(&blobs, &config);
            previous = blobs;

            assert_eq!(assembler.objects().len(), 1);
            let object = assembler.objects().values().next().unwrap();
            assert_eq!(object.id, 0);
            assert_eq!(object.age, step);
            assert_eq!(object.frames_since_last_movement, 0);
            if step == 0 {
                assert_eq!(report.born, vec![0]);
            } else {
                assert_eq!(report.tracked, vec![0]);
            }
        }
    }

    #[test]
    fn stationary_object_counts_frames_without_movement() {
        let mut frame = Frame::filled(20, 20, 0);
        paint(&mut frame, 5, 5, 3, 3, 6);
        let mut ids = IdGenerator::new();
        let mut assembler = ObjectAssembler::new();
        let config = ObjectConfig::default();

        for _ in 0..3 {
            assembler.update(&find_blobs(&frame, 0, &mut ids), &config);
        }
        let object = &assembler.objects()[&0];
        assert_eq!(object.age, 2);
        assert_eq!(object.frames_since_last_movement, 2);
    }

    #[test]
    fn lost_objects_are_reacquired_then_expire() {
        let mut ids = IdGenerator::new();
        let config = ObjectConfig {
            invalidation_window: 2,
            ..Default::default()
        };
        let mut present = Frame::filled(20, 20, 0);
        paint(&mut present, 5, 5, 3, 3, 6);
        let empty = Frame::filled(20, 20, 0);

        let mut assembler = ObjectAssembler::new();
        assembler.update(&find_blobs(&present, 0, &mut ids), &config);
        assembler.update(&find_blobs(&empty, 0, &mut ids), &config);
        assert!(assembler.objects().is_empty());
        assert_eq!(assembler.lost_objects()[&0].frames_unseen, 1);

        let report = assembler.update(&find_blobs(&present, 0, &mut ids), &config);
        assert_eq!(report.tracked, vec![0]);
        assert!(assembler.lost_objects().is_empty());

        let mut expired = Vec::new();
        for _ in 0..3 {
            expired.extend(assembler.update(&find_blobs(&empty, 0, &mut ids), &config).expired);
        }
        assert_eq!(expired, vec![0]);
        assert!(assembler.lost_objects().is_empty());

        let report = assembler.update(&find_blobs(&present, 0, &mut ids), &config);
        assert_eq!(report.born, vec![1]);
    }

    #[test]
    fn small_and_fast_objects_are_sanitized() {
        let mut frame = Frame::filled(30, 30, 0);
        paint(&mut frame, 2, 2, 1, 1, 3);
        paint(&mut frame, 10, 10, 3, 3, 4);
        paint(&mut frame, 20, 20, 3, 3, 5);
        let mut blobs = find_blobs(&frame, 0, &mut IdGenerator::new());
        blobs.get_mut(&2).unwrap().velocity = Velocity::new(40, 0);

        let mut assembler = ObjectAssembler::new();
        let config = ObjectConfig {
            min_object_area: 4,
            ..Default::default()
        };
        let report = assembler.update(&blobs, &config);

        assert_eq!(report.sanitized, vec![0, 2]);
        assert_eq!(report.born, vec![1]);
        assert_eq!(assembler.objects().keys().copied().collect::<Vec<_>>(), vec![1]);
        assert!(assembler.lost_objects().is_empty());
    }
}
