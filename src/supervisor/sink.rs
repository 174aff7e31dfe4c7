use crate::common::{FaceProofError, Result};
use crate::core::face::{FaceBox, Frame};
use crate::supervisor::scheduler::SnapshotSupervisor;
use crate::supervisor::snapshot::SupervisionSnapshot;
use crate::supervisor::verdict::SupervisionVerdict;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Everything handed to persistence at the end of an assessment.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisionReport {
    pub profile_id: String,
    pub reference_digest: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub verdict: SupervisionVerdict,
    pub snapshots: Vec<SupervisionSnapshot>,
}

impl SupervisionReport {
    pub fn from_supervisor(supervisor: &SnapshotSupervisor) -> Self {
        Self {
            profile_id: supervisor.profile_id().to_string(),
            reference_digest: supervisor.reference_digest().map(str::to_string),
            generated_at: Utc::now(),
            verdict: supervisor.verify_test_integrity(),
            snapshots: supervisor.snapshots().to_vec(),
        }
    }
}

#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn persist(&self, report: &SupervisionReport) -> Result<()>;
}

/// Writes one directory per report: annotated JPEGs plus `verdict.json`.
pub struct DirectorySnapshotSink {
    root: PathBuf,
}

impl DirectorySnapshotSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn report_dir(&self, report: &SupervisionReport) -> PathBuf {
        self.root.join(format!(
            "{}-{}",
            report.profile_id,
            report.generated_at.format("%Y%m%dT%H%M%S")
        ))
    }
}

#[async_trait]
impl SnapshotSink for DirectorySnapshotSink {
    async fn persist(&self, report: &SupervisionReport) -> Result<()> {
        let dir = self.report_dir(report);
        let report = report.clone();

        tokio::task::spawn_blocking(move || write_report(&dir, &report))
            .await
            .map_err(|e| FaceProofError::Storage(format!("Snapshot writer task failed: {}", e)))?
    }
}

fn write_report(dir: &Path, report: &SupervisionReport) -> Result<()> {
    std::fs::create_dir_all(dir)?;

    for snapshot in &report.snapshots {
        let Some(image) = &snapshot.image else { continue };
        let annotated = annotate(image, &snapshot.face_boxes, snapshot.face_verified);
        let path = dir.join(format!("snapshot_{:02}.jpg", snapshot.index));
        annotated.save_with_format(&path, ImageFormat::Jpeg)?;
    }

    let json = serde_json::to_vec_pretty(report)?;
    std::fs::write(dir.join("verdict.json"), json)?;

    tracing::info!("Wrote supervision report for {} to {}", report.profile_id, dir.display());
    Ok(())
}

fn annotate(frame: &Frame, boxes: &[FaceBox], verified: bool) -> RgbImage {
    let mut img = frame.to_rgb8();
    let color = if verified { Rgb([0, 255, 0]) } else { Rgb([255, 0, 0]) };

    for face in boxes {
        let x1 = face.x1.max(0.0) as i32;
        let y1 = face.y1.max(0.0) as i32;
        let width = (face.width() as u32).max(1);
        let height = (face.height() as u32).max(1);
        draw_hollow_rect_mut(&mut img, Rect::at(x1, y1).of_size(width, height), color);
    }

    img
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::verdict::{compute_verdict, VerdictPolicy};
    use image::DynamicImage;
    use tempfile::tempdir;

    fn snapshot(index: usize, image: Option<Frame>) -> SupervisionSnapshot {
        SupervisionSnapshot {
            image,
            index,
            taken_at: Utc::now(),
            has_face: true,
            has_multiple_faces: false,
            face_count: 1,
            face_boxes: vec![FaceBox { x1: 4.0, y1: 4.0, x2: 20.0, y2: 24.0, confidence: 0.9 }],
            face_quality: Some(0.8),
            face_verified: true,
            similarity: Some(0.7),
            lighting_level: Some(50.0),
            error: None,
        }
    }

    #[test]
    fn boxes_are_drawn_in_verdict_color() {
        let frame = DynamicImage::ImageRgb8(RgbImage::new(32, 32));
        let boxes = [FaceBox { x1: 4.0, y1: 4.0, x2: 20.0, y2: 24.0, confidence: 0.9 }];

        let img = annotate(&frame, &boxes, true);
        assert_eq!(img.get_pixel(4, 4), &Rgb([0, 255, 0]));
        assert_eq!(img.get_pixel(10, 10), &Rgb([0, 0, 0]));

        let img = annotate(&frame, &boxes, false);
        assert_eq!(img.get_pixel(4, 4), &Rgb([255, 0, 0]));
    }

    #[tokio::test]
    async fn report_directory_holds_images_and_verdict() {
        let root = tempdir().unwrap();
        let frame = DynamicImage::ImageRgb8(RgbImage::new(32, 32));
        let snapshots = vec![snapshot(0, Some(frame)), snapshot(1, None)];
        let report = SupervisionReport {
            profile_id: "alice".into(),
            reference_digest: Some("abc".into()),
            generated_at: Utc::now(),
            verdict: compute_verdict(&snapshots, &VerdictPolicy::default()),
            snapshots,
        };

        let sink = DirectorySnapshotSink::new(root.path());
        sink.persist(&report).await.unwrap();

        let dir = sink.report_dir(&report);
        assert!(dir.join("snapshot_00.jpg").exists());
        assert!(!dir.join("snapshot_01.jpg").exists());

        let json: serde_json::Value = serde_json::from_slice(&std::fs::read(dir.join("verdict.json")).unwrap()).unwrap();
        assert_eq!(json["verdict"]["verified"], serde_json::Value::Bool(true));
        assert_eq!(json["snapshots"].as_array().unwrap().len(), 2);
        assert!(json["snapshots"][0].get("image").is_none());
    }
}
