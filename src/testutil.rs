use image::{ImageBuffer, ImageOutputFormat, Rgb, RgbImage};
use tar::{Builder, Header};

use std::io::{Cursor};

pub fn tar_bytes(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
  let mut builder = Builder::new(vec![]);
  for &(name, ref data) in members.iter() {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, &data[..]).unwrap();
  }
  builder.into_inner().unwrap()
}

pub fn png_bytes(image: &RgbImage) -> Vec<u8> {
  let mut buf = Cursor::new(vec![]);
  image::DynamicImage::ImageRgb8(image.clone()).write_to(&mut buf, ImageOutputFormat::Png).unwrap();
  buf.into_inner()
}

pub fn solid(w: u32, h: u32, value: u8) -> RgbImage {
  ImageBuffer::from_pixel(w, h, Rgb([value, value, value]))
}
