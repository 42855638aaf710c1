//! Aspect-preserving normalization of decoded images to a fixed output size.
//!
//! An image is first cropped (trim mode) or zero-padded (pad mode) so that
//! its aspect ratio matches the target, then resampled with a Lanczos filter.
//! When the excess along an axis is odd, the extra row or column goes to the
//! bottom/right side.

use crate::error::{CacheError, CacheResult};

use image::{RgbImage};
use image::imageops::{FilterType, crop_imm, replace, resize};

use std::fmt;
use std::str::{FromStr};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeMode {
  Trim,
  Pad,
}

impl FromStr for ShapeMode {
  type Err = String;

  fn from_str(s: &str) -> Result<ShapeMode, String> {
    match s {
      "trimming" | "trim" => Ok(ShapeMode::Trim),
      "padding" | "pad" => Ok(ShapeMode::Pad),
      _ => Err(format!("unknown shaping mode: {} (expected trimming or padding)", s)),
    }
  }
}

impl fmt::Display for ShapeMode {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match *self {
      ShapeMode::Trim => write!(f, "trimming"),
      ShapeMode::Pad => write!(f, "padding"),
    }
  }
}

/// Channel-first (3, height, width) byte tensor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChwTensor {
  pub height: u32,
  pub width:  u32,
  pub data:   Vec<u8>,
}

impl ChwTensor {
  pub fn from_rgb(image: &RgbImage) -> ChwTensor {
    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0; 3 * plane];
    for (x, y, px) in image.enumerate_pixels() {
      let off = (y * width + x) as usize;
      for c in 0 .. 3 {
        data[c * plane + off] = px[c];
      }
    }
    ChwTensor{height, width, data}
  }

  pub fn shape(&self) -> (usize, usize, usize) {
    (3, self.height as usize, self.width as usize)
  }

  pub fn get(&self, c: usize, y: u32, x: u32) -> u8 {
    let plane = (self.width * self.height) as usize;
    self.data[c * plane + (y * self.width + x) as usize]
  }
}

/// The crop or pad step that brings an image to the target aspect ratio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reshape {
  Keep,
  CropRows { top: u32, keep: u32 },
  CropCols { left: u32, keep: u32 },
  PadRows { top: u32, bottom: u32 },
  PadCols { left: u32, right: u32 },
}

/// Plans the crop/pad for an `h` x `w` image and a `height` x `width` target.
///
/// Ratios are compared by cross-multiplication and target extents are
/// integer floors, so an input whose ratio already equals the target's is
/// never cropped or padded.
pub fn plan_reshape(h: u32, w: u32, height: u32, width: u32, mode: ShapeMode) -> CacheResult<Reshape> {
  let (h64, w64) = (h as u64, w as u64);
  let (th64, tw64) = (height as u64, width as u64);
  let extent = |v: u64| u32::try_from(v).map_err(|_| CacheError::ReshapeOverflow{h, w, height, width});
  let plan = match mode {
    ShapeMode::Trim => {
      if h64 * tw64 > th64 * w64 {
        let target_h = extent((w64 * th64 / tw64).max(1))?;
        Reshape::CropRows{top: (h - target_h) / 2, keep: target_h}
      } else {
        let target_w = extent((h64 * tw64 / th64).max(1))?;
        if target_w >= w {
          Reshape::Keep
        } else {
          Reshape::CropCols{left: (w - target_w) / 2, keep: target_w}
        }
      }
    }
    ShapeMode::Pad => {
      if h64 * tw64 < th64 * w64 {
        let target_h = extent(th64 * w64 / tw64)?;
        if target_h <= h {
          Reshape::Keep
        } else {
          let top = (target_h - h) / 2;
          Reshape::PadRows{top, bottom: target_h - h - top}
        }
      } else {
        let target_w = extent(tw64 * h64 / th64)?;
        if target_w <= w {
          Reshape::Keep
        } else {
          let left = (target_w - w) / 2;
          Reshape::PadCols{left, right: target_w - w - left}
        }
      }
    }
  };
  Ok(plan)
}

pub fn apply_reshape(image: &RgbImage, plan: Reshape) -> RgbImage {
  let (w, h) = image.dimensions();
  match plan {
    Reshape::Keep => image.clone(),
    Reshape::CropRows{top, keep} => crop_imm(image, 0, top, w, keep).to_image(),
    Reshape::CropCols{left, keep} => crop_imm(image, left, 0, keep, h).to_image(),
    Reshape::PadRows{top, bottom} => pad(image, 0, top, w, h + top + bottom),
    Reshape::PadCols{left, right} => pad(image, left, 0, w + left + right, h),
  }
}

fn pad(image: &RgbImage, left: u32, top: u32, new_w: u32, new_h: u32) -> RgbImage {
  let mut canvas = RgbImage::new(new_w, new_h);
  replace(&mut canvas, image, left.into(), top.into());
  canvas
}

/// Normalizes `image` to a (3, `height`, `width`) tensor.
pub fn normalize(image: &RgbImage, width: u32, height: u32, mode: ShapeMode) -> CacheResult<ChwTensor> {
  let (w, h) = image.dimensions();
  if (w, h) == (width, height) {
    return Ok(ChwTensor::from_rgb(image));
  }
  let shaped = apply_reshape(image, plan_reshape(h, w, height, width, mode)?);
  if shaped.dimensions() == (width, height) {
    Ok(ChwTensor::from_rgb(&shaped))
  } else {
    Ok(ChwTensor::from_rgb(&resize(&shaped, width, height, FilterType::Lanczos3)))
  }
}
