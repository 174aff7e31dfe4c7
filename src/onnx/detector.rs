use crate::common::config::ModelConfig;
use crate::common::{FaceProofError, Result};
use crate::core::face::{DetectedFace, FaceBox, Keypoints, Point};
use crate::onnx::build_session;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array4, CowArray};
use ort::{Environment, Session, Value};
use std::sync::Arc;

const NMS_IOU_THRESHOLD: f32 = 0.45;
const MAX_FACES: usize = 5;

/// YOLOv8-face detector. Output is `[1, C, N]` or `[1, N, C]` with
/// `C = 4 box + 1 score (+ 5 keypoints * 3)`.
pub struct FaceDetector {
    session: Session,
    config: ModelConfig,
}

impl FaceDetector {
    pub fn new(config: &ModelConfig, environment: &Arc<Environment>) -> Result<Self> {
        let session = build_session(environment, &config.detector_path, config.optimization_level)?;
        Ok(Self { session, config: config.clone() })
    }

    pub fn detect(&self, image: &DynamicImage, min_confidence: f32) -> Result<Vec<DetectedFace>> {
        let orig_width = image.width() as f32;
        let orig_height = image.height() as f32;
        let (input_w, input_h) = (self.config.detector_input_width, self.config.detector_input_height);

        let img_array = if image.width() == input_w && image.height() == input_h {
            image_to_array(image)
        } else {
            image_to_array(&image.resize_exact(input_w, input_h, FilterType::Nearest))
        };

        let cow_array = CowArray::from(img_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let output = outputs
            .first()
            .ok_or_else(|| FaceProofError::Model("Detector produced no outputs".into()))?
            .try_extract::<f32>()?
            .view()
            .to_owned();
        let data = output
            .as_slice()
            .ok_or_else(|| FaceProofError::Model("Detector output is not contiguous".into()))?;

        let mut faces = parse_predictions(data, output.shape(), input_w as f32, input_h as f32, min_confidence);

        let scale_x = orig_width / input_w as f32;
        let scale_y = orig_height / input_h as f32;
        for face in &mut faces {
            scale_face(face, scale_x, scale_y);
        }

        Ok(faces)
    }
}

fn image_to_array(img: &DynamicImage) -> Array4<f32> {
    let rgb = img.to_rgb8();
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    let mut array = Array4::<f32>::zeros((1, 3, height, width));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            array[[0, c, y, x]] = pixel[c] as f32 / 255.0;
        }
    }

    array
}

fn scale_face(face: &mut DetectedFace, sx: f32, sy: f32) {
    face.bbox.x1 *= sx;
    face.bbox.x2 *= sx;
    face.bbox.y1 *= sy;
    face.bbox.y2 *= sy;
    if let Some(k) = face.keypoints.as_mut() {
        for p in [&mut k.left_eye, &mut k.right_eye, &mut k.nose, &mut k.mouth_left, &mut k.mouth_right] {
            p.x *= sx;
            p.y *= sy;
        }
    }
}

/// Decodes raw predictions, applies NMS and the confidence floor. Coordinates
/// stay in detector input space.
pub(crate) fn parse_predictions(
    data: &[f32],
    shape: &[usize],
    input_w: f32,
    input_h: f32,
    min_confidence: f32,
) -> Vec<DetectedFace> {
    let (num_predictions, channels, transposed) = match shape {
        [_, a, b] if a < b => (*b, *a, true),
        [_, a, b] => (*a, *b, false),
        [a, b] => (*a, *b, false),
        _ => {
            tracing::warn!("Unexpected detector output shape: {:?}", shape);
            return Vec::new();
        }
    };
    if channels < 5 || data.len() < num_predictions * channels {
        tracing::warn!("Detector output too small for shape {:?}", shape);
        return Vec::new();
    }

    let at = |i: usize, c: usize| {
        if transposed {
            data[c * num_predictions + i]
        } else {
            data[i * channels + c]
        }
    };

    let mut faces = Vec::new();
    for i in 0..num_predictions {
        let confidence = at(i, 4);
        if confidence <= 0.001 {
            continue;
        }

        let (cx, cy, w, h) = (at(i, 0), at(i, 1), at(i, 2), at(i, 3));
        // Some exports emit normalized coordinates
        let (sx, sy) = if cx <= 1.0 && cy <= 1.0 && w <= 1.0 && h <= 1.0 {
            (input_w, input_h)
        } else {
            (1.0, 1.0)
        };

        let x1 = ((cx - w / 2.0) * sx).max(0.0);
        let y1 = ((cy - h / 2.0) * sy).max(0.0);
        let x2 = ((cx + w / 2.0) * sx).min(input_w);
        let y2 = ((cy + h / 2.0) * sy).min(input_h);
        if x2 - x1 <= 10.0 || y2 - y1 <= 10.0 {
            continue;
        }

        let keypoints = (channels >= 20).then(|| {
            let point = |k: usize| Point::new(at(i, 5 + k * 3) * sx, at(i, 6 + k * 3) * sy);
            Keypoints {
                left_eye: point(0),
                right_eye: point(1),
                nose: point(2),
                mouth_left: point(3),
                mouth_right: point(4),
            }
        });

        faces.push(DetectedFace {
            bbox: FaceBox { x1, y1, x2, y2, confidence },
            keypoints,
            blendshapes: None,
        });
    }

    // NMS first on everything, then the real confidence floor
    let mut faces = apply_nms(faces, NMS_IOU_THRESHOLD);
    faces.retain(|f| f.bbox.confidence >= min_confidence);
    faces.truncate(MAX_FACES);
    faces
}

fn apply_nms(mut faces: Vec<DetectedFace>, iou_threshold: f32) -> Vec<DetectedFace> {
    faces.sort_by(|a, b| b.bbox.confidence.total_cmp(&a.bbox.confidence));

    let mut keep: Vec<DetectedFace> = Vec::new();
    for face in faces {
        if keep.iter().all(|kept| kept.bbox.iou(&face.bbox) < iou_threshold) {
            keep.push(face);
        }
    }
    keep
}
