// THEORY:
// The `pipeline` module is the top-level API for the whole engine. It wires the
// layers together in a single, synchronous pass per frame and owns every piece
// of state that must survive between frames: the history buffers, the blob id
// counter, the object registry, the prototypes and the self identifier.
//
// One `VisionPipeline` serves exactly one game instance. Nothing in it is shared,
// so running several games side by side just means owning several pipelines.

use crate::calibration::{self, Calibration};
use crate::core_modules::action::Action;
use crate::core_modules::blob::BlobMap;
use crate::core_modules::blob_detector::blob_detector;
use crate::core_modules::blob_matcher::{self, BlobMatchConfig, BlobMatchReport};
use crate::core_modules::frame::{ColorIndex, Frame};
use crate::core_modules::id_generator::IdGenerator;
use crate::core_modules::object_assembler::{AssemblyReport, ObjectAssembler, ObjectConfig};
use crate::core_modules::prototype::{ClassificationReport, PrototypeClassifier, PrototypeConfig};
use crate::core_modules::self_identifier::{SelfConfig, SelfDetection, SelfIdentifier};
use crate::error::{Result, VisionError};
use log::debug;
use std::collections::VecDeque;
use std::path::Path;

// Re-export key data structures for the public API.
pub use crate::core_modules::composite_object::{CompositeObject, ObjectId, ObjectMap};
pub use crate::core_modules::geometry::Point;
pub use crate::core_modules::prototype::Prototype;

static NO_BLOBS: BlobMap = BlobMap::new();

/// Configuration for the VisionPipeline, allowing for tunable behavior.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub image_width: u32,
    pub image_height: u32,
    /// Palette index that never forms blobs.
    pub background_color: ColorIndex,
    /// Frames, actions and blob maps kept in history.
    pub history_len: usize,
    pub blob_matching: BlobMatchConfig,
    pub objects: ObjectConfig,
    pub prototypes: PrototypeConfig,
    pub self_detection: SelfConfig,
}

impl Default for PipelineConfig {
    /// Tuned for the 160x210 Atari 2600 screen.
    fn default() -> Self {
        Self {
            image_width: 160,
            image_height: 210,
            background_color: 0,
            history_len: 50,
            blob_matching: BlobMatchConfig::default(),
            objects: ObjectConfig::default(),
            prototypes: PrototypeConfig::default(),
            self_detection: SelfConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.image_width == 0 || self.image_height == 0 {
            return Err(VisionError::InvalidConfig("image dimensions must be positive".into()));
        }
        if self.history_len == 0 {
            return Err(VisionError::InvalidConfig("history_len must be at least 1".into()));
        }
        self.blob_matching.validate()?;
        self.objects.validate()?;
        self.prototypes.validate()?;
        self.self_detection.validate()
    }
}

/// What happened while processing one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSummary {
    /// 1-based index of the processed frame since construction or reset.
    pub frame_number: u64,
    pub blob_count: usize,
    pub blob_matches: BlobMatchReport,
    pub assembly: AssemblyReport,
    pub classification: ClassificationReport,
    pub found_self: bool,
}

/// The main, top-level struct for the vision engine.
#[derive(Debug, Clone)]
pub struct VisionPipeline {
    config: PipelineConfig,
    calibration: Calibration,
    frame_history: VecDeque<Frame>,
    action_history: VecDeque<Action>,
    blob_history: VecDeque<BlobMap>,
    blob_ids: IdGenerator,
    assembler: ObjectAssembler,
    classifier: PrototypeClassifier,
    identifier: SelfIdentifier,
    last_blob_matches: BlobMatchReport,
    last_assembly: AssemblyReport,
    frame_count: u64,
}

impl VisionPipeline {
    /// A pipeline with no calibration; self detection is automatic.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::with_calibration(config, Calibration::default())
    }

    /// A pipeline seeded with calibration masks. Class masks become initial
    /// prototypes; self masks enable manual self detection when configured.
    pub fn with_calibration(config: PipelineConfig, calibration: Calibration) -> Result<Self> {
        config.validate()?;
        let mut pipeline = Self {
            frame_history: VecDeque::with_capacity(config.history_len),
            action_history: VecDeque::with_capacity(config.history_len),
            blob_history: VecDeque::with_capacity(config.history_len),
            blob_ids: IdGenerator::new(),
            assembler: ObjectAssembler::new(),
            classifier: PrototypeClassifier::new(),
            identifier: SelfIdentifier::new(SelfDetection::Automatic, Vec::new()),
            last_blob_matches: BlobMatchReport::default(),
            last_assembly: AssemblyReport::default(),
            frame_count: 0,
            config,
            calibration,
        };
        pipeline.reset();
        Ok(pipeline)
    }

    /// Clears history, tracked state and id counters, then re-applies the
    /// start-up calibration.
    pub fn reset(&mut self) {
        self.frame_history.clear();
        self.action_history.clear();
        self.blob_history.clear();
        self.blob_ids = IdGenerator::new();
        self.assembler = ObjectAssembler::new();
        self.classifier = PrototypeClassifier::new();
        self.classifier.seed_classes(self.calibration.class_masks.clone());
        self.identifier = SelfIdentifier::new(self.config.self_detection.mode, self.calibration.self_masks.clone());
        self.last_blob_matches = BlobMatchReport::default();
        self.last_assembly = AssemblyReport::default();
        self.frame_count = 0;
    }

    /// Runs one frame through every layer. A frame of the wrong size is rejected
    /// before any state changes.
    pub fn process_frame(&mut self, frame: &Frame, action: Action) -> Result<FrameSummary> {
        if frame.width() != self.config.image_width || frame.height() != self.config.image_height {
            return Err(VisionError::FrameSizeMismatch {
                expected_width: self.config.image_width,
                expected_height: self.config.image_height,
                actual_width: frame.width(),
                actual_height: frame.height(),
            });
        }

        // Stage 1: Blob Detection
        let mut blobs = blob_detector::find_blobs(frame, self.config.background_color, &mut self.blob_ids);

        // Stage 2: Blob Matching
        let blob_matches = match self.blob_history.back_mut() {
            Some(previous) => blob_matcher::match_blobs(&mut blobs, previous, &self.config.blob_matching),
            None => blob_matcher::match_blobs(&mut blobs, &mut BlobMap::new(), &self.config.blob_matching),
        };
        let blob_count = blobs.len();

        // Stage 2.5: History
        self.push_history(frame.clone(), action, blobs);
        let blobs = self.blob_history.back().unwrap_or(&NO_BLOBS);

        // Stage 3: Object Assembly, Identity and Sanitization
        let assembly = self.assembler.update(blobs, &self.config.objects);

        // Stage 4: Classification
        let classification = self
            .classifier
            .classify(self.assembler.objects_mut(), &self.config.prototypes);

        // Stage 5: Self Identification
        self.identifier.update(
            self.assembler.objects(),
            self.classifier.prototypes_mut(),
            action,
            &self.config.self_detection,
        );

        self.frame_count += 1;
        debug!(
            "frame {}: {} blobs ({} births, {} deaths), {} objects, {} prototypes, self: {:?}",
            self.frame_count,
            blob_count,
            blob_matches.births.len(),
            blob_matches.deaths.len(),
            self.assembler.objects().len(),
            self.classifier.prototypes().len(),
            self.identifier.self_object()
        );

        self.last_blob_matches = blob_matches.clone();
        self.last_assembly = assembly.clone();
        Ok(FrameSummary {
            frame_number: self.frame_count,
            blob_count,
            blob_matches,
            assembly,
            classification,
            found_self: self.identifier.found_self(),
        })
    }

    fn push_history(&mut self, frame: Frame, action: Action, blobs: BlobMap) {
        self.frame_history.push_back(frame);
        self.action_history.push_back(action);
        self.blob_history.push_back(blobs);
        while self.frame_history.len() > self.config.history_len {
            self.frame_history.pop_front();
        }
        while self.action_history.len() > self.config.history_len {
            self.action_history.pop_front();
        }
        while self.blob_history.len() > self.config.history_len {
            self.blob_history.pop_front();
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Calibration the pipeline was built with.
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Frames processed since construction or the last reset.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Blobs of the most recent frame.
    pub fn blobs(&self) -> &BlobMap {
        self.blob_history.back().unwrap_or(&NO_BLOBS)
    }

    /// Live composite objects of the most recent frame.
    pub fn objects(&self) -> &ObjectMap {
        self.assembler.objects()
    }

    /// Objects currently unseen but still eligible for re-acquisition.
    pub fn lost_objects(&self) -> &ObjectMap {
        self.assembler.lost_objects()
    }

    /// Blob correspondences, births and deaths of the most recent frame.
    pub fn last_match_report(&self) -> &BlobMatchReport {
        &self.last_blob_matches
    }

    /// Object births, identity carry-overs, sanitized and expired ids of the
    /// most recent frame.
    pub fn last_assembly_report(&self) -> &AssemblyReport {
        &self.last_assembly
    }

    pub fn prototypes(&self) -> &[Prototype] {
        self.classifier.prototypes()
    }

    pub fn found_self(&self) -> bool {
        self.identifier.found_self()
    }

    /// Centroid of the self object; `None` whenever `found_self()` is false.
    pub fn self_centroid(&self) -> Option<Point> {
        self.identifier.self_centroid()
    }

    pub fn self_object(&self) -> Option<&CompositeObject> {
        self.identifier.self_object().and_then(|id| self.objects().get(&id))
    }

    /// The self detection mode in effect after calibration fallbacks.
    pub fn self_detection(&self) -> SelfDetection {
        self.identifier.mode()
    }

    pub fn last_frame(&self) -> Option<&Frame> {
        self.frame_history.back()
    }

    pub fn last_action(&self) -> Option<Action> {
        self.action_history.back().copied()
    }

    /// Number of frames currently held in history.
    pub fn history_len(&self) -> usize {
        self.frame_history.len()
    }

    /// Past blob maps, oldest first; the last entry is the current frame.
    pub fn blob_history(&self) -> &VecDeque<BlobMap> {
        &self.blob_history
    }

    pub fn action_history(&self) -> &VecDeque<Action> {
        &self.action_history
    }

    /// Saves the mask of a live object in the calibration layout, e.g. to record
    /// the agent's sprite for manual self detection.
    pub fn export_object_mask(&self, id: ObjectId, path: &Path) -> Result<()> {
        let object = self.objects().get(&id).ok_or(VisionError::MissingObject(id))?;
        calibration::export_mask(&object.mask, path)
    }
}
