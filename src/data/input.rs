//! # 数据输入接口

use super::BBox2D;
use super::BBox3D;
use super::{Difficulty, ObjectType};
use crate::common::*;

/// 单个标注物体
#[derive(Clone, Debug, PartialEq)]
pub struct Object {
    /// 对象类型：车，行人，骑车人……
    pub object_type: ObjectType,
    /// 截断比例 [0, 1]
    pub truncation: f32,
    /// 遮挡等级 0~3
    pub occlusion: i32,
    /// 观测角
    pub alpha: f32,
    /// 图像上的 2d 检测框
    pub bbox_2d: BBox2D,
    /// 相机矫正坐标系下的 3d 框
    pub bbox_3d: BBox3D::XYZLWHRotY,
    pub difficulty: Difficulty,
}

/// 带反射强度的激光点
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LidarPoint {
    pub position: na::Point3<f32>,
    pub intensity: f32,
}

impl LidarPoint {
    pub fn new(x: f32, y: f32, z: f32, intensity: f32) -> Self {
        Self {
            position: na::Point3::new(x, y, z),
            intensity,
        }
    }
}

/// 单帧的标定参数
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    /// 左彩色相机的投影矩阵 P2，rect 坐标 -> 像素
    pub p: na::Matrix3x4<f32>,
    pub r0_rect: na::Matrix3<f32>,
    pub velo_to_cam: na::Matrix3x4<f32>,
}

impl Calibration {
    pub fn project_velo_to_rect(&self, point: &na::Point3<f32>) -> na::Point3<f32> {
        let cam = self.velo_to_cam * point.to_homogeneous();
        na::Point3::from(self.r0_rect * cam)
    }

    /// 深度不为正的点不能投影
    pub fn project_rect_to_image(&self, point: &na::Point3<f32>) -> Option<na::Point2<f32>> {
        project(&self.p, point)
    }
}

pub(crate) fn project(p: &na::Matrix3x4<f32>, point: &na::Point3<f32>) -> Option<na::Point2<f32>> {
    let uvw = p * point.to_homogeneous();
    (uvw.z > 0.0).then(|| na::Point2::new(uvw.x / uvw.z, uvw.y / uvw.z))
}

/// 数据来源，如 KITTI 目录
pub trait FrameProvider
where
    Self: Send + Sync + 'static,
{
    fn get_calibration(&self, frame_id: &str) -> Result<Calibration>;

    fn get_label_objects(&self, frame_id: &str) -> Result<Vec<Object>>;

    fn get_image(&self, frame_id: &str) -> Result<RgbImage>;

    /// 激光雷达坐标系下的原始点
    fn get_lidar(&self, frame_id: &str) -> Result<Vec<LidarPoint>>;
}

/// 读取完成的一帧，点云已转换到 rect 坐标系并裁剪到相机视野内
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Frame {
    pub id: String,
    #[derivative(Debug = "ignore")]
    pub points: Vec<LidarPoint>,
    #[derivative(Debug = "ignore")]
    pub image: RgbImage,
    pub calib: Calibration,
    pub objects: Vec<Object>,
}

impl Frame {
    pub fn load<P>(provider: &P, frame_id: &str, clip_distance: f32) -> Result<Self>
    where
        P: FrameProvider + ?Sized,
    {
        let calib = provider
            .get_calibration(frame_id)
            .with_context(|| format!("failed to load calibration of frame {}", frame_id))?;
        let objects = provider
            .get_label_objects(frame_id)
            .with_context(|| format!("failed to load labels of frame {}", frame_id))?;
        let image = provider
            .get_image(frame_id)
            .with_context(|| format!("failed to load image of frame {}", frame_id))?;
        let lidar = provider
            .get_lidar(frame_id)
            .with_context(|| format!("failed to load lidar of frame {}", frame_id))?;

        let (width, height) = image.dimensions();
        let (width, height) = (width as f32, height as f32);
        let num_raw = lidar.len();

        let points: Vec<_> = lidar
            .into_iter()
            .filter(|point| point.position.x > clip_distance)
            .filter_map(|point| {
                let rect = calib.project_velo_to_rect(&point.position);
                let uv = calib.project_rect_to_image(&rect)?;
                let in_fov = (0.0..width).contains(&uv.x) && (0.0..height).contains(&uv.y);
                in_fov.then(|| LidarPoint {
                    position: rect,
                    intensity: point.intensity,
                })
            })
            .collect();
        trace!(
            "frame {}: {} of {} lidar points in camera view",
            frame_id,
            points.len(),
            num_raw
        );

        Ok(Self {
            id: frame_id.to_string(),
            points,
            image,
            calib,
            objects,
        })
    }

    /// 按类型和难度白名单筛选标注，保持原有顺序
    pub fn filtered_objects(&self, types: &[ObjectType], difficulties: &[Difficulty]) -> Vec<&Object> {
        self.objects
            .iter()
            .filter(|object| {
                object.object_type.class().is_some()
                    && types.contains(&object.object_type)
                    && difficulties.contains(&object.difficulty)
            })
            .collect()
    }
}
