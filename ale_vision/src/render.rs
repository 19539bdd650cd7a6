// THEORY:
// The `render` module turns engine state into pictures for humans. It only reads
// pipeline state and writes into an image buffer supplied (or returned) to the
// caller; nothing here feeds back into tracking.
//
// The overlays mirror the layers of the engine: the raw screen, the blobs, the
// composite objects, the prototype classes, and a marker for the self. Entities
// get a stable pseudo-random colour from their id so the same object keeps its
// colour from frame to frame.

use crate::core_modules::blob::BlobMap;
use crate::core_modules::composite_object::ObjectMap;
use crate::core_modules::frame::{Frame, Palette};
use crate::core_modules::geometry::{BoundingBox, Point};
use crate::pipeline::VisionPipeline;
use image::{Rgb, RgbImage};

/// Which layer to draw on top of the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    /// The screen as the emulator drew it.
    Screen,
    Blobs,
    #[default]
    Objects,
    Prototypes,
}

const SELF_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const DIM_FACTOR: f32 = 0.4;

/// Stable colour for an entity id.
pub fn id_color(id: u64) -> Rgb<u8> {
    // Fibonacci hashing spreads consecutive ids across the hue wheel.
    let hash = id.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let bytes = hash.to_be_bytes();
    Rgb([bytes[0] | 0x40, bytes[1] | 0x40, bytes[2] | 0x40])
}

/// Paints `frame` through `palette`, dimming the background colour.
pub fn draw_frame(frame: &Frame, palette: &Palette, background: u8) -> RgbImage {
    RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
        let index = frame.get(x, y);
        let Rgb([r, g, b]) = palette.color(index);
        if index == background {
            let dim = |c: u8| (c as f32 * DIM_FACTOR) as u8;
            Rgb([dim(r), dim(g), dim(b)])
        } else {
            Rgb([r, g, b])
        }
    })
}

/// Draws the outline of `bbox`, clipped to the image.
pub fn box_region(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let mut put = |x: i32, y: i32| {
        if x >= 0 && x < w && y >= 0 && y < h {
            image.put_pixel(x as u32, y as u32, color);
        }
    };
    for x in bbox.x_min..=bbox.x_max {
        put(x, bbox.y_min);
        put(x, bbox.y_max);
    }
    for y in bbox.y_min..=bbox.y_max {
        put(bbox.x_min, y);
        put(bbox.x_max, y);
    }
}

/// Fills the pixels of each blob with its id colour.
pub fn plot_blobs(blobs: &BlobMap, image: &mut RgbImage) {
    for blob in blobs.values() {
        let color = id_color(blob.id);
        for p in blob.screen_pixels() {
            if p.x >= 0 && p.y >= 0 && (p.x as u32) < image.width() && (p.y as u32) < image.height() {
                image.put_pixel(p.x as u32, p.y as u32, color);
            }
        }
    }
}

/// Boxes each object in its id colour.
pub fn plot_objects(objects: &ObjectMap, image: &mut RgbImage) {
    for object in objects.values() {
        box_region(image, &object.bounding_box, id_color(object.id));
    }
}

/// Boxes each classified object in the colour of its prototype.
pub fn plot_prototypes(objects: &ObjectMap, image: &mut RgbImage) {
    for object in objects.values() {
        if let Some(prototype_id) = object.prototype_id {
            box_region(image, &object.bounding_box, id_color(prototype_id));
        }
    }
}

/// Draws a cross-hair on the self centroid.
pub fn plot_self(centroid: Point, image: &mut RgbImage) {
    let mut bbox = BoundingBox::at(centroid);
    bbox.include(Point::new(centroid.x - 3, centroid.y - 3));
    bbox.include(Point::new(centroid.x + 3, centroid.y + 3));
    box_region(image, &bbox, SELF_COLOR);
    for d in -2..=2 {
        for (x, y) in [(centroid.x + d, centroid.y), (centroid.x, centroid.y + d)] {
            if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
                image.put_pixel(x as u32, y as u32, SELF_COLOR);
            }
        }
    }
}

/// Renders the most recent frame of `pipeline` with the requested overlay and
/// the self marker. Returns `None` before the first frame.
pub fn render(pipeline: &VisionPipeline, palette: &Palette, mode: DisplayMode) -> Option<RgbImage> {
    let frame = pipeline.last_frame()?;
    let mut image = draw_frame(frame, palette, pipeline.config().background_color);

    match mode {
        DisplayMode::Screen => {}
        DisplayMode::Blobs => plot_blobs(pipeline.blobs(), &mut image),
        DisplayMode::Objects => plot_objects(pipeline.objects(), &mut image),
        DisplayMode::Prototypes => plot_prototypes(pipeline.objects(), &mut image),
    }
    if let Some(centroid) = pipeline.self_centroid() {
        plot_self(centroid, &mut image);
    }
    Some(image)
}
