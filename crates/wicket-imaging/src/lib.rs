//! Wicket Imaging
//!
//! The bounded thumbnail worker pool behind uploaded image attachments: a
//! fixed pool of threads drains a lossy MPMC queue of paths and downscales
//! each oversized image to a JPEG thumbnail.
//!
//! # Components
//!
//! - [`downscale::downscale`]: single-image nearest-neighbour thumbnail generation
//! - [`queue::ThumbnailQueue`]: the bounded queue and its worker pool

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod downscale;
mod queue;

pub use downscale::downscale;
pub use queue::ThumbnailQueue;

/// Failure from decoding, resizing, or writing a thumbnail.
#[derive(Debug, thiserror::Error)]
pub enum DownscaleError {
    /// The source path could not be decoded as an image, or the result
    /// could not be encoded as JPEG.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// The thumbnail file could not be created or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
