pub mod common;
pub mod config;
pub mod data;
pub mod encoding;
pub mod geometry;
pub mod pipeline;
pub mod proposal;
pub mod sample;

pub use config::Config;
pub use data::{
    input::{Calibration, Frame, FrameProvider, LidarPoint, Object},
    kitti::{load_split_ids, KittiDataset},
    output::{Batch, Sample},
    BBox3D, Class, Difficulty, ObjectType, Proposal,
};
pub use pipeline::{PipelineState, TrainingStream};

use geo::{intersects::Intersects, prelude::Area, Polygon};
use geo_clipper::Clipper;
use ordered_float::OrderedFloat;

/// 两个俯视图多边形的 IOU
pub fn iou_2d(poly1: &Polygon<f64>, poly2: &Polygon<f64>) -> f32 {
    let (area1, area2) = (poly1.unsigned_area(), poly2.unsigned_area());
    if !poly1.intersects(poly2) {
        return 0.0;
    }

    // clipper 以整数坐标计算，1e6 的缩放保留到微米
    let intersection = poly1.intersection(poly2, 1e6).unsigned_area();
    let union = area1 + area2 - intersection;
    if union <= 0.0 {
        0.0
    } else {
        (intersection / union) as f32
    }
}

/// 在所有真值框中找出与提议框 IOU 最大的一个，返回 (下标, IOU)
///
/// IOU 相同时取靠前的真值框；没有真值框时返回 None
pub fn find_match_label(proposal: &Polygon<f64>, labels: &[Polygon<f64>]) -> Option<(usize, f32)> {
    labels
        .iter()
        .map(|label| iou_2d(proposal, label))
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (idx, iou)| match best {
            Some((_, best_iou)) if OrderedFloat(iou) <= OrderedFloat(best_iou) => best,
            _ => Some((idx, iou)),
        })
}
