//! Storage module - output filenames, payload decoding and image persistence

pub mod base64;
pub mod file;

pub use file::{collect_images, detect_image_format, extension_from_url, generate_filename, ImageStore};
