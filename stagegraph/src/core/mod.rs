//! Core domain types for stagegraph.
//!
//! This module contains the value types every other module speaks in:
//! - File references, images with their companions, transform handles
//! - Blurring kernel widths

mod files;
mod kernel;

pub use files::{explode, pairs, FileRef, Image, XfmHandle};
pub use kernel::Fwhm;
