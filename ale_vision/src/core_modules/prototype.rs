// THEORY:
// The `prototype` module is the classification layer. Where the assembler answers
// "is this the same object as last frame?", prototypes answer "have I seen this
// kind of object before?". A prototype is a learned class of shapes, stored as a
// small library of representative masks.
//
// Key architectural principles:
// 1.  **Unsupervised**: Every object that matches no existing class founds a new
//     one. Nothing is labelled up front, although calibration can seed classes.
// 2.  **Bounded memory**: A class only learns a new mask when the object looks
//     noticeably different from every mask it already holds, and never beyond a
//     fixed library size.
// 3.  **Never forget**: Prototypes are invalidated when unseen for a while but
//     never deleted, so a sprite that blinks on and off screen is recognised
//     again when it returns.

use crate::core_modules::composite_object::{CompositeObject, ObjectId, ObjectMap};
use crate::core_modules::id_generator::IdGenerator;
use crate::core_modules::pixel_mask::PixelMask;
use crate::error::{Result, VisionError};
use log::{debug, trace};
use std::collections::{BTreeSet, VecDeque};

pub type PrototypeId = u64;

/// Tunables for classification and the validity policy.
#[derive(Debug, Clone)]
pub struct PrototypeConfig {
    /// Minimum mask overlap for an object to join an existing prototype.
    pub acceptance_threshold: f64,
    /// A joining object whose best overlap is below this adds its mask to the library.
    pub redundancy_threshold: f64,
    /// Largest mask library a prototype may hold.
    pub max_masks: usize,
    /// Sightings needed inside `recency_window` frames to become valid.
    pub min_seen_count: usize,
    pub recency_window: u64,
    /// Frames a prototype may go unseen before it is invalidated.
    pub invalidation_window: u32,
}

impl Default for PrototypeConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.75,
            redundancy_threshold: 0.95,
            max_masks: 8,
            min_seen_count: 3,
            recency_window: 10,
            invalidation_window: 30,
        }
    }
}

impl PrototypeConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.acceptance_threshold) || !(0.0..=1.0).contains(&self.redundancy_threshold) {
            return Err(VisionError::InvalidConfig("prototype thresholds must lie in [0, 1]".into()));
        }
        if self.max_masks == 0 {
            return Err(VisionError::InvalidConfig("prototype max_masks must be at least 1".into()));
        }
        if self.min_seen_count as u64 > self.recency_window {
            return Err(VisionError::InvalidConfig(
                "prototype min_seen_count cannot exceed recency_window".into(),
            ));
        }
        Ok(())
    }
}

/// A learned class of recurring object shapes.
#[derive(Debug, Clone, PartialEq)]
pub struct Prototype {
    pub id: PrototypeId,
    /// Every object ever assigned to this class.
    pub obj_ids: BTreeSet<ObjectId>,
    /// Representative masks, bounded by `PrototypeConfig::max_masks`.
    pub masks: Vec<PixelMask>,
    pub seen_count: u64,
    pub frames_since_last_seen: u32,
    pub times_seen_this_frame: u32,
    pub is_valid: bool,
    /// How strongly this class appears to follow the agent's actions.
    pub self_likelihood: f64,
    /// Frame numbers of recent sightings, used by the validity policy.
    recent_sightings: VecDeque<u64>,
    /// Sliding window of action/motion agreement samples.
    pub(crate) motion_samples: VecDeque<f64>,
}

impl Prototype {
    /// A prototype founded by `object`.
    pub fn new(id: PrototypeId, object: &CompositeObject) -> Self {
        let mut prototype = Self::from_masks(id, vec![object.mask.clone()]);
        prototype.obj_ids.insert(object.id);
        prototype.seen_count = 1;
        prototype
    }

    /// A prototype seeded from calibration masks. It has not been seen yet.
    pub fn from_masks(id: PrototypeId, masks: Vec<PixelMask>) -> Self {
        Self {
            id,
            obj_ids: BTreeSet::new(),
            masks,
            seen_count: 0,
            frames_since_last_seen: 0,
            times_seen_this_frame: 0,
            is_valid: false,
            self_likelihood: 0.0,
            recent_sightings: VecDeque::new(),
            motion_samples: VecDeque::new(),
        }
    }

    /// Best overlap of `mask` against the library and the index of that mask.
    pub fn pixel_match(&self, mask: &PixelMask) -> Option<(f64, usize)> {
        let mut best: Option<(f64, usize)> = None;
        for (index, candidate) in self.masks.iter().enumerate() {
            let overlap = mask.overlap_percent(candidate);
            if best.is_none_or(|(b, _)| overlap > b) {
                best = Some((overlap, index));
            }
        }
        best
    }

    /// Number of agreement samples currently in the window.
    pub fn motion_sample_count(&self) -> usize {
        self.motion_samples.len()
    }

    fn record_sighting(&mut self, frame: u64) {
        self.seen_count += 1;
        self.frames_since_last_seen = 0;
        self.times_seen_this_frame += 1;
        self.recent_sightings.push_back(frame);
    }
}

/// What classification did during one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationReport {
    /// `(object, prototype)` assignments for this frame.
    pub assignments: Vec<(ObjectId, PrototypeId)>,
    /// Prototypes founded this frame.
    pub created: Vec<PrototypeId>,
    /// Prototypes that learned a new mask this frame.
    pub grown: Vec<PrototypeId>,
    /// Prototypes that turned invalid at the end of this frame.
    pub invalidated: Vec<PrototypeId>,
}

/// Owns every prototype and the prototype id generator.
#[derive(Debug, Clone, Default)]
pub struct PrototypeClassifier {
    prototypes: Vec<Prototype>,
    ids: IdGenerator,
    frame: u64,
}

impl PrototypeClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds one prototype per calibration class.
    pub fn seed_classes(&mut self, classes: Vec<Vec<PixelMask>>) {
        for masks in classes.into_iter().filter(|m| !m.is_empty()) {
            let id = self.ids.next_id();
            debug!("seeded prototype {} with {} calibration masks", id, masks.len());
            self.prototypes.push(Prototype::from_masks(id, masks));
        }
    }

    pub fn prototypes(&self) -> &[Prototype] {
        &self.prototypes
    }

    pub fn prototypes_mut(&mut self) -> &mut [Prototype] {
        &mut self.prototypes
    }

    pub fn get(&self, id: PrototypeId) -> Option<&Prototype> {
        self.prototypes.iter().find(|p| p.id == id)
    }

    /// Assigns every object to a prototype, founding new ones where needed, then
    /// applies the validity policy to all prototypes.
    pub fn classify(&mut self, objects: &mut ObjectMap, config: &PrototypeConfig) -> ClassificationReport {
        self.frame += 1;
        let mut report = ClassificationReport::default();
        for prototype in &mut self.prototypes {
            prototype.times_seen_this_frame = 0;
        }

        for object in objects.values_mut() {
            // Single best (prototype, mask) pair; earlier prototypes win ties.
            let mut best: Option<(usize, f64)> = None;
            for (index, prototype) in self.prototypes.iter().enumerate() {
                if let Some((overlap, _)) = prototype.pixel_match(&object.mask) {
                    if best.is_none_or(|(_, b)| overlap > b) {
                        best = Some((index, overlap));
                    }
                }
            }

            let prototype_id = match best {
                Some((index, overlap)) if overlap >= config.acceptance_threshold => {
                    let prototype = &mut self.prototypes[index];
                    prototype.record_sighting(self.frame);
                    prototype.obj_ids.insert(object.id);
                    if overlap < config.redundancy_threshold && prototype.masks.len() < config.max_masks {
                        prototype.masks.push(object.mask.clone());
                        report.grown.push(prototype.id);
                    }
                    trace!("object {} -> prototype {} (overlap {:.3})", object.id, prototype.id, overlap);
                    prototype.id
                }
                _ => {
                    let mut prototype = Prototype::new(self.ids.next_id(), object);
                    prototype.times_seen_this_frame = 1;
                    prototype.recent_sightings.push_back(self.frame);
                    let id = prototype.id;
                    trace!("object {} founded prototype {}", object.id, id);
                    self.prototypes.push(prototype);
                    report.created.push(id);
                    id
                }
            };

            object.prototype_id = Some(prototype_id);
            report.assignments.push((object.id, prototype_id));
        }

        report.invalidated = self.update_validity(config);
        report
    }

    /// End-of-frame validity pass over every prototype.
    fn update_validity(&mut self, config: &PrototypeConfig) -> Vec<PrototypeId> {
        let mut invalidated = Vec::new();
        for prototype in &mut self.prototypes {
            if prototype.times_seen_this_frame == 0 {
                prototype.frames_since_last_seen += 1;
            }
            while prototype
                .recent_sightings
                .front()
                .is_some_and(|f| self.frame - f >= config.recency_window)
            {
                prototype.recent_sightings.pop_front();
            }

            if prototype.frames_since_last_seen > config.invalidation_window {
                if prototype.is_valid {
                    invalidated.push(prototype.id);
                }
                prototype.is_valid = false;
            } else if prototype.recent_sightings.len() >= config.min_seen_count {
                prototype.is_valid = true;
            }
        }
        invalidated
    }
}
