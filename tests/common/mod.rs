#![allow(dead_code)]

use std::collections::HashMap;

use rcnn_dataset::{
    common::*,
    config::ProposalNoise,
    data::BBox2D,
    BBox3D::XYZLWHRotY,
    Calibration, Config, Difficulty, FrameProvider, LidarPoint, Object, ObjectType,
};

pub const IMAGE_WIDTH: u32 = 100;
pub const IMAGE_HEIGHT: u32 = 50;

/// 不在任何标注框内的背景点（rect 坐标）
const BACKGROUND: [[f32; 3]; 3] = [[-8.0, 1.0, 25.0], [6.0, 0.5, 30.0], [0.0, 1.2, 40.0]];

pub fn init_logging() {
    let _ = pretty_env_logger::try_init();
}

/// 内存中的数据集，点云由标注框内的规则网格生成
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    frames: HashMap<String, Vec<Object>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame(mut self, frame_id: &str, objects: Vec<Object>) -> Self {
        self.frames.insert(frame_id.to_string(), objects);
        self
    }

    fn objects(&self, frame_id: &str) -> Result<&Vec<Object>> {
        self.frames
            .get(frame_id)
            .ok_or_else(|| format_err!("frame {} does not exist", frame_id))
    }
}

impl FrameProvider for MockProvider {
    fn get_calibration(&self, frame_id: &str) -> Result<Calibration> {
        self.objects(frame_id)?;
        Ok(calibration())
    }

    fn get_label_objects(&self, frame_id: &str) -> Result<Vec<Object>> {
        Ok(self.objects(frame_id)?.clone())
    }

    fn get_image(&self, frame_id: &str) -> Result<RgbImage> {
        self.objects(frame_id)?;
        Ok(RgbImage::from_fn(IMAGE_WIDTH, IMAGE_HEIGHT, |u, v| {
            image::Rgb([u as u8, v as u8, 128])
        }))
    }

    fn get_lidar(&self, frame_id: &str) -> Result<Vec<LidarPoint>> {
        let objects = self.objects(frame_id)?;
        let inside = objects.iter().flat_map(|object| {
            let n = grid_size(object);
            grid_points(&object.bbox_3d, n)
        });
        let background = BACKGROUND
            .iter()
            .map(|&[x, y, z]| na::Point3::new(x, y, z));
        let points = inside
            .chain(background)
            .map(|position| {
                let velo = rect_to_velo(&position);
                LidarPoint::new(velo.x, velo.y, velo.z, 0.5)
            })
            .collect();
        Ok(points)
    }
}

/// 激光雷达 x 朝前、y 朝左、z 朝上
pub fn calibration() -> Calibration {
    Calibration {
        p: na::Matrix3x4::new(
            10.0, 0.0, 50.0, 0.0, //
            0.0, 10.0, 25.0, 0.0, //
            0.0, 0.0, 1.0, 0.0,
        ),
        r0_rect: na::Matrix3::identity(),
        velo_to_cam: na::Matrix3x4::new(
            0.0, -1.0, 0.0, 0.0, //
            0.0, 0.0, -1.0, 0.0, //
            1.0, 0.0, 0.0, 0.0,
        ),
    }
}

pub fn rect_to_velo(point: &na::Point3<f32>) -> na::Point3<f32> {
    na::Point3::new(point.z, -point.x, -point.y)
}

/// 框内 n×n×n 个点，rot_y 须为 0
pub fn grid_points(bbox: &XYZLWHRotY, n: usize) -> Vec<na::Point3<f32>> {
    let XYZLWHRotY(x, y, z, l, w, h, _) = *bbox;
    let frac = |i: usize| (i as f32 + 0.5) / n as f32;
    (0..n)
        .flat_map(|i| (0..n).flat_map(move |j| (0..n).map(move |k| (i, j, k))))
        .map(|(i, j, k)| {
            na::Point3::new(
                x + (frac(i) - 0.5) * l,
                y - frac(j) * h,
                z + (frac(k) - 0.5) * w,
            )
        })
        .collect()
}

/// 车 125 个点，其余 27 个
pub fn grid_size(object: &Object) -> usize {
    match object.object_type {
        ObjectType::Car => 5,
        _ => 3,
    }
}

pub fn object(object_type: ObjectType, bbox_3d: XYZLWHRotY) -> Object {
    Object {
        object_type,
        truncation: 0.0,
        occlusion: 0,
        alpha: 0.0,
        bbox_2d: BBox2D {
            x1: 10.0,
            y1: 5.0,
            x2: 60.0,
            y2: 55.0,
        },
        bbox_3d,
        difficulty: Difficulty::Easy,
    }
}

pub fn car() -> Object {
    object(ObjectType::Car, XYZLWHRotY(2.0, 1.5, 12.0, 4.0, 1.6, 1.5, 0.0))
}

pub fn pedestrian() -> Object {
    object(ObjectType::Pedestrian, XYZLWHRotY(-2.0, 1.5, 8.0, 0.8, 0.6, 1.7, 0.0))
}

/// 无噪声的提议框，缩小的图像尺寸
pub fn prepare_config(num_points: usize, buffer_size: usize) -> Config {
    let mut config = Config::new("/nonexistent/kitti", "train");
    config.sampling.num_points = NonZeroUsize::new(num_points).unwrap();
    config.sampling.image_width = 40;
    config.sampling.image_height = 20;
    config.sampling.proposal_noise = ProposalNoise::zero();
    config.pipeline.buffer_size = NonZeroUsize::new(buffer_size).unwrap();
    config
}
