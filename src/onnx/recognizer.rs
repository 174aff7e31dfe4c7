use crate::common::config::ModelConfig;
use crate::common::{FaceProofError, Result};
use crate::core::face::{Embedding, FaceBox};
use crate::onnx::build_session;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array4, CowArray};
use ort::{Environment, Session, Value};
use std::sync::Arc;

/// Fraction of the box size added on each side before cropping.
const CROP_MARGIN: f32 = 0.1;

pub struct FaceRecognizer {
    session: Session,
    input_size: u32,
    normalization_value: f32,
}

impl FaceRecognizer {
    pub fn new(config: &ModelConfig, environment: &Arc<Environment>) -> Result<Self> {
        let session = build_session(environment, &config.recognizer_path, config.optimization_level)?;
        Ok(Self {
            session,
            input_size: config.recognizer_input_size,
            normalization_value: config.normalization_value,
        })
    }

    /// L2-normalized embedding of the face inside `face`.
    pub fn embed(&self, image: &DynamicImage, face: &FaceBox) -> Result<Embedding> {
        let crop = crop_face(image, face)
            .ok_or_else(|| FaceProofError::Model("Face box lies outside the frame".into()))?;
        let resized = crop.resize_exact(self.input_size, self.input_size, FilterType::Triangle);

        let input_array = preprocess(&resized, self.normalization_value);
        let cow_array = CowArray::from(input_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let raw = outputs
            .first()
            .ok_or_else(|| FaceProofError::Model("Recognizer produced no outputs".into()))?
            .try_extract::<f32>()?
            .view()
            .to_owned()
            .into_raw_vec();

        Ok(l2_normalize(raw))
    }
}

fn crop_face(image: &DynamicImage, face: &FaceBox) -> Option<DynamicImage> {
    let (img_w, img_h) = (image.width() as f32, image.height() as f32);
    let margin_x = face.width() * CROP_MARGIN;
    let margin_y = face.height() * CROP_MARGIN;

    let x1 = (face.x1 - margin_x).clamp(0.0, img_w);
    let y1 = (face.y1 - margin_y).clamp(0.0, img_h);
    let x2 = (face.x2 + margin_x).clamp(0.0, img_w);
    let y2 = (face.y2 + margin_y).clamp(0.0, img_h);

    let (w, h) = ((x2 - x1) as u32, (y2 - y1) as u32);
    if w == 0 || h == 0 {
        return None;
    }
    Some(image.crop_imm(x1 as u32, y1 as u32, w, h))
}

fn preprocess(img: &DynamicImage, norm: f32) -> Array4<f32> {
    let rgb = img.to_rgb8();
    let (w, h) = (rgb.width() as usize, rgb.height() as usize);
    let mut array = Array4::<f32>::zeros((1, 3, h, w));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            array[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - norm) / norm;
        }
    }
    array
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn normalization_yields_unit_length() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn crop_is_clamped_to_frame() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(100, 100));
        let face = FaceBox { x1: 80.0, y1: 80.0, x2: 120.0, y2: 120.0, confidence: 0.9 };
        let crop = crop_face(&image, &face).unwrap();
        assert!(crop.width() <= 24 && crop.height() <= 24);

        let outside = FaceBox { x1: 150.0, y1: 150.0, x2: 190.0, y2: 190.0, confidence: 0.9 };
        assert!(crop_face(&image, &outside).is_none());
    }

    #[test]
    fn preprocess_centers_pixel_values() {
        let mut img = RgbImage::new(2, 2);
        img.put_pixel(0, 0, image::Rgb([255, 0, 128]));
        let array = preprocess(&DynamicImage::ImageRgb8(img), 127.5);
        assert_eq!(array.shape(), &[1, 3, 2, 2]);
        assert!((array[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((array[[0, 1, 0, 0]] + 1.0).abs() < 1e-6);
    }
}
