use crate::common::config::LightingConfig;
use crate::core::face::Frame;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightingBand {
    TooDark,
    Dim,
    Adequate,
    TooBright,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightingAssessment {
    /// Mean perceptual luminance mapped onto 0-100.
    pub level: f32,
    pub band: LightingBand,
    pub is_adequate: bool,
    pub message: String,
}

pub struct LightingAssessor {
    config: LightingConfig,
}

impl LightingAssessor {
    pub fn new(config: LightingConfig) -> Self {
        Self { config }
    }

    pub fn assess(&self, frame: &Frame) -> LightingAssessment {
        let level = self.mean_luminance(frame) / 255.0 * 100.0;
        self.classify(level)
    }

    /// Maps a 0-100 level onto a band. Band edges belong to the brighter band,
    /// except the upper edge which is still adequate.
    pub fn classify(&self, level: f32) -> LightingAssessment {
        let band = if level < self.config.too_dark_below {
            LightingBand::TooDark
        } else if level < self.config.dim_below {
            LightingBand::Dim
        } else if level > self.config.too_bright_above {
            LightingBand::TooBright
        } else {
            LightingBand::Adequate
        };

        let message = match band {
            LightingBand::TooDark => "Too dark - turn on a light or face a window",
            LightingBand::Dim => "Lighting is dim - add more light in front of you",
            LightingBand::TooBright => "Too bright - move away from direct light or reduce backlight",
            LightingBand::Adequate => "Lighting is good",
        };

        LightingAssessment {
            level,
            band,
            is_adequate: band == LightingBand::Adequate,
            message: message.to_string(),
        }
    }

    fn mean_luminance(&self, frame: &Frame) -> f32 {
        let stride = self.config.sample_stride.max(1);

        // Grayscale frames are already luminance
        if let DynamicImage::ImageLuma8(gray) = frame {
            let (sum, count) = gray
                .as_raw()
                .iter()
                .step_by(stride)
                .fold((0.0f64, 0usize), |(sum, count), &v| (sum + v as f64, count + 1));
            return if count == 0 { 0.0 } else { (sum / count as f64) as f32 };
        }

        let converted;
        let rgb = match frame.as_rgb8() {
            Some(rgb) => rgb,
            None => {
                converted = frame.to_rgb8();
                &converted
            }
        };

        let mut sum = 0.0f64;
        let mut count = 0usize;
        for pixel in rgb.pixels().step_by(stride) {
            let [r, g, b] = pixel.0;
            sum += 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
            count += 1;
        }

        if count == 0 {
            0.0
        } else {
            (sum / count as f64) as f32
        }
    }
}
