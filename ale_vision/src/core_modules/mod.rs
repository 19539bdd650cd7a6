// Layers of the engine, bottom-up: screen primitives, blobs, composite objects,
// prototype classes and the self.

pub mod action;
pub mod blob;
pub mod blob_detector;
pub mod blob_matcher;
pub mod composite_object;
pub mod frame;
pub mod geometry;
pub mod id_generator;
pub mod object_assembler;
pub mod pixel_mask;
pub mod prototype;
pub mod self_identifier;
