// THEORY:
// The `self_identifier` closes the loop between perception and control: of all
// the things moving on screen, which one is the agent?
//
// Two strategies are available, fixed when the pipeline is built:
// 1.  **Automatic**: The agent is whatever moves the way the joystick says. For
//     every directional action, each valid prototype on screen records how well its
//     objects' motion agrees with the intended direction (cosine of the angle,
//     zero for an object that did not move). The sliding-window mean of those
//     samples is the prototype's `self_likelihood`; the best valid prototype
//     above the confidence threshold is the self.
// 2.  **Manual**: Reference masks of the agent's sprite are loaded once from
//     calibration files. Each frame, the object whose mask best matches one of
//     them is the self.
//
// Failing to find the self is a normal outcome, reported through `found_self()`.

use crate::core_modules::action::Action;
use crate::core_modules::composite_object::{CompositeObject, ObjectId, ObjectMap};
use crate::core_modules::geometry::{Point, Velocity};
use crate::core_modules::pixel_mask::PixelMask;
use crate::core_modules::prototype::{Prototype, PrototypeId};
use crate::error::{Result, VisionError};
use log::{debug, warn};

/// How the self is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelfDetection {
    /// Correlate object motion with the issued actions.
    #[default]
    Automatic,
    /// Match objects against calibration masks.
    Manual,
}

#[derive(Debug, Clone)]
pub struct SelfConfig {
    pub mode: SelfDetection,
    /// Agreement samples kept per prototype.
    pub sample_window: usize,
    /// Samples a prototype needs before it can be chosen.
    pub min_samples: usize,
    /// Minimum `self_likelihood` for the automatic choice.
    pub confidence_threshold: f64,
    /// Minimum mask overlap for the manual choice.
    pub manual_match_threshold: f64,
}

impl Default for SelfConfig {
    fn default() -> Self {
        Self {
            mode: SelfDetection::Automatic,
            sample_window: 50,
            min_samples: 5,
            confidence_threshold: 0.5,
            manual_match_threshold: 0.9,
        }
    }
}

impl SelfConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sample_window == 0 || self.min_samples > self.sample_window {
            return Err(VisionError::InvalidConfig(
                "self sample_window must be positive and at least min_samples".into(),
            ));
        }
        Ok(())
    }
}

/// Agreement between an action's intended direction and an observed velocity,
/// in `[-1, 1]`. `None` for actions without a direction.
pub fn action_agreement(action: Action, velocity: Velocity) -> Option<f64> {
    let direction = action.direction();
    if direction.is_zero() {
        return None;
    }
    if velocity.is_zero() {
        return Some(0.0);
    }
    let dot = (direction.dx * velocity.dx + direction.dy * velocity.dy) as f64;
    Some(dot / (direction.magnitude() * velocity.magnitude()))
}

/// Tracks which object is the agent.
#[derive(Debug, Clone)]
pub struct SelfIdentifier {
    mode: SelfDetection,
    reference_masks: Vec<PixelMask>,
    self_prototype: Option<PrototypeId>,
    self_object: Option<ObjectId>,
    self_centroid: Option<Point>,
}

impl SelfIdentifier {
    /// Builds an identifier for `mode`. Manual mode without reference masks
    /// falls back to automatic.
    pub fn new(mode: SelfDetection, reference_masks: Vec<PixelMask>) -> Self {
        let mode = match mode {
            SelfDetection::Manual if reference_masks.is_empty() => {
                warn!("manual self detection requested without reference masks, using automatic");
                SelfDetection::Automatic
            }
            other => other,
        };
        Self {
            mode,
            reference_masks,
            self_prototype: None,
            self_object: None,
            self_centroid: None,
        }
    }

    /// The mode actually in effect.
    pub fn mode(&self) -> SelfDetection {
        self.mode
    }

    pub fn reference_masks(&self) -> &[PixelMask] {
        &self.reference_masks
    }

    pub fn found_self(&self) -> bool {
        self.self_object.is_some()
    }

    /// Centroid of the self object. `None` whenever `found_self()` is false.
    pub fn self_centroid(&self) -> Option<Point> {
        self.self_centroid
    }

    pub fn self_object(&self) -> Option<ObjectId> {
        self.self_object
    }

    /// Prototype chosen by the automatic mode.
    pub fn self_prototype(&self) -> Option<PrototypeId> {
        self.self_prototype
    }

    /// Re-evaluates the self for the current frame.
    pub fn update(&mut self, objects: &ObjectMap, prototypes: &mut [Prototype], action: Action, config: &SelfConfig) {
        let chosen = match self.mode {
            SelfDetection::Automatic => self.identify_automatic(objects, prototypes, action, config),
            SelfDetection::Manual => self.identify_manual(objects, config),
        };

        self.self_object = chosen.map(|o| o.id);
        self.self_centroid = chosen.map(|o| o.centroid());
        if let Some(object) = chosen {
            debug!("self is object {} at {}", object.id, object.centroid());
        }
    }

    fn identify_automatic<'a>(
        &mut self,
        objects: &'a ObjectMap,
        prototypes: &mut [Prototype],
        action: Action,
        config: &SelfConfig,
    ) -> Option<&'a CompositeObject> {
        // --- 1. Evidence ---
        for prototype in prototypes.iter_mut() {
            if !prototype.is_valid || prototype.times_seen_this_frame == 0 {
                continue;
            }
            let samples: Vec<f64> = objects
                .values()
                .filter(|o| o.prototype_id == Some(prototype.id))
                .filter_map(|o| action_agreement(action, o.velocity))
                .collect();
            if samples.is_empty() {
                continue;
            }

            let sample = samples.iter().sum::<f64>() / samples.len() as f64;
            prototype.motion_samples.push_back(sample);
            while prototype.motion_samples.len() > config.sample_window {
                prototype.motion_samples.pop_front();
            }
            prototype.self_likelihood =
                prototype.motion_samples.iter().sum::<f64>() / prototype.motion_samples.len() as f64;
        }

        // --- 2. Decision ---
        let mut best: Option<&Prototype> = None;
        for prototype in prototypes.iter() {
            if !prototype.is_valid
                || prototype.motion_sample_count() < config.min_samples
                || prototype.self_likelihood < config.confidence_threshold
            {
                continue;
            }
            let better = match best {
                None => true,
                Some(b) => {
                    prototype.self_likelihood > b.self_likelihood
                        || (prototype.self_likelihood == b.self_likelihood && prototype.id < b.id)
                }
            };
            if better {
                best = Some(prototype);
            }
        }
        self.self_prototype = best.map(|p| p.id);

        // The oldest live instance of the chosen class stands in for the self.
        let prototype_id = self.self_prototype?;
        objects
            .values()
            .filter(|o| o.prototype_id == Some(prototype_id))
            .fold(None, |acc: Option<&CompositeObject>, o| match acc {
                Some(a) if a.age >= o.age => Some(a),
                _ => Some(o),
            })
    }

    fn identify_manual<'a>(&self, objects: &'a ObjectMap, config: &SelfConfig) -> Option<&'a CompositeObject> {
        let mut best: Option<(&CompositeObject, f64)> = None;
        for object in objects.values() {
            let overlap = self
                .reference_masks
                .iter()
                .map(|mask| object.mask.overlap_percent(mask))
                .fold(0.0, f64::max);
            if overlap < config.manual_match_threshold {
                continue;
            }
            if best.is_none_or(|(_, b)| overlap > b) {
                best = Some((object, overlap));
            }
        }
        best.map(|(object, _)| object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::geometry::BoundingBox;
    use std::collections::BTreeSet;

    fn rect_mask(w: u32, h: u32) -> PixelMask {
        let mut mask = PixelMask::new(w, h);
        for y in 0..h {
            for x in 0..w {
                mask.set_pixel(x, y, true);
            }
        }
        mask
    }

    fn object(
        id: ObjectId,
        at: Point,
        mask: PixelMask,
        velocity: Velocity,
        prototype: Option<PrototypeId>,
    ) -> CompositeObject {
        let mut bounding_box = BoundingBox::at(at);
        bounding_box.include(Point::new(at.x + mask.width() as i32 - 1, at.y + mask.height() as i32 - 1));
        CompositeObject {
            id,
            blob_ids: BTreeSet::new(),
            mask,
            bounding_box,
            velocity,
            age: id as u32,
            frames_since_last_movement: 0,
            frames_unseen: 0,
            prototype_id: prototype,
        }
    }

    fn valid_prototype(id: PrototypeId) -> Prototype {
        let mut prototype = Prototype::from_masks(id, vec![rect_mask(2, 2)]);
        prototype.is_valid = true;
        prototype.times_seen_this_frame = 1;
        prototype
    }

    #[test]
    fn agreement_is_cosine_of_intent_and_motion() {
        assert_eq!(action_agreement(Action::Noop, Velocity::new(3, 0)), None);
        assert_eq!(action_agreement(Action::Right, Velocity::new(3, 0)), Some(1.0));
        assert_eq!(action_agreement(Action::LeftFire, Velocity::new(3, 0)), Some(-1.0));
        assert_eq!(action_agreement(Action::Up, Velocity::new(0, 0)), Some(0.0));
        let diagonal = action_agreement(Action::DownRight, Velocity::new(2, 0)).unwrap();
        assert!((diagonal - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-9);
    }

    #[test]
    fn manual_without_masks_falls_back() {
        let identifier = SelfIdentifier::new(SelfDetection::Manual, Vec::new());
        assert_eq!(identifier.mode(), SelfDetection::Automatic);
        assert!(!identifier.found_self());
        assert_eq!(identifier.self_centroid(), None);
    }

    #[test]
    fn manual_mode_finds_object_with_matching_mask() {
        let mut identifier = SelfIdentifier::new(SelfDetection::Manual, vec![rect_mask(3, 5)]);
        let objects = ObjectMap::from([
            (1, object(1, Point::new(2, 2), rect_mask(4, 4), Velocity::default(), None)),
            (2, object(2, Point::new(20, 10), rect_mask(3, 5), Velocity::default(), None)),
        ]);

        identifier.update(&objects, &mut [], Action::Noop, &SelfConfig::default());

        assert!(identifier.found_self());
        assert_eq!(identifier.self_object(), Some(2));
        assert_eq!(identifier.self_centroid(), Some(objects[&2].centroid()));
    }

    #[test]
    fn automatic_mode_follows_the_controlled_prototype() {
        let config = SelfConfig {
            min_samples: 3,
            ..Default::default()
        };
        let mut identifier = SelfIdentifier::new(SelfDetection::Automatic, Vec::new());
        let mut prototypes = vec![valid_prototype(0), valid_prototype(1)];

        let actions = [Action::Right, Action::Left, Action::Up, Action::Down, Action::Right];
        for (step, action) in actions.iter().enumerate() {
            let d = action.direction();
            let objects = ObjectMap::from([
                // Drifts right no matter what.
                (1, object(1, Point::new(10 + step as i32, 5), rect_mask(2, 2), Velocity::new(1, 0), Some(0))),
                // Follows the joystick.
                (2, object(2, Point::new(40, 40), rect_mask(2, 2), Velocity::new(2 * d.dx, 2 * d.dy), Some(1))),
            ]);
            identifier.update(&objects, &mut prototypes, *action, &config);

            if step + 1 < config.min_samples {
                assert!(!identifier.found_self());
            }
        }

        assert!(identifier.found_self());
        assert_eq!(identifier.self_prototype(), Some(1));
        assert_eq!(identifier.self_object(), Some(2));
        assert_eq!(prototypes[1].self_likelihood, 1.0);
        assert!(prototypes[0].self_likelihood < config.confidence_threshold);
    }

    #[test]
    fn invalid_prototypes_are_never_the_self() {
        let config = SelfConfig {
            min_samples: 1,
            ..Default::default()
        };
        let mut identifier = SelfIdentifier::new(SelfDetection::Automatic, Vec::new());
        let mut prototypes = vec![valid_prototype(0)];
        prototypes[0].is_valid = false;

        let mover = object(1, Point::new(0, 0), rect_mask(2, 2), Velocity::new(1, 0), Some(0));
        let objects = ObjectMap::from([(1, mover)]);
        identifier.update(&objects, &mut prototypes, Action::Right, &config);

        assert_eq!(prototypes[0].motion_sample_count(), 0);
        assert_eq!(prototypes[0].self_likelihood, 0.0);
        assert!(!identifier.found_self());

        // Once valid, the same motion starts counting.
        prototypes[0].is_valid = true;
        identifier.update(&objects, &mut prototypes, Action::Right, &config);
        assert_eq!(prototypes[0].motion_sample_count(), 1);
        assert!(identifier.found_self());
    }
}
