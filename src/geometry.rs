//! # 几何工具
//!
//! 3d 框角点、点是否在框内、点云与标注的刚体变换

use crate::{
    common::*,
    config::AugmentationConfig,
    data::{
        input::{project, Frame, LidarPoint},
        BBox3D::{CornerPoints, XYZLWHRotY},
    },
    encoding::wrap_to_pi,
};

/// 返回 (图像上的 8 个角点, rect 坐标系下的 8 个角点)
///
/// 任一角点深度小于 0.1 时不做投影
pub fn compute_box_3d(
    bbox: &XYZLWHRotY,
    projection: &na::Matrix3x4<f32>,
) -> (Option<[na::Point2<f32>; 8]>, CornerPoints) {
    let corners = bbox.to_corner_points();
    if corners.0.iter().any(|corner| corner.z < 0.1) {
        return (None, corners);
    }

    let mut image_corners = [na::Point2::origin(); 8];
    for (dst, corner) in image_corners.iter_mut().zip(corners.0.iter()) {
        match project(projection, corner) {
            Some(uv) => *dst = uv,
            None => return (None, corners),
        }
    }
    (Some(image_corners), corners)
}

/// 点是否在由 8 个角点构成的长方体内（含边界）
pub fn extract_points_in_box3d<'a, I>(positions: I, corners: &CornerPoints) -> Vec<bool>
where
    I: IntoIterator<Item = &'a na::Point3<f32>>,
{
    let [c0, c1, _, c3, c4, ..] = corners.0;
    // 以 0 号点为原点的三条棱
    let axes = [c1 - c0, c3 - c0, c4 - c0];
    let lengths = axes.map(|axis| axis.norm_squared());

    positions
        .into_iter()
        .map(|position| {
            let offset = position - c0;
            axes.iter()
                .zip(lengths.iter())
                .all(|(axis, &len)| (0.0..=len).contains(&offset.dot(axis)))
        })
        .collect()
}

/// 整个场景的镜像、旋转和平移：p' = shift + R_y(rotation) * flip(p)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneTransform {
    /// 沿 x 方向镜像
    pub flip: bool,
    /// 绕 y 轴的旋转角
    pub rotation: f32,
    pub shift: na::Vector3<f32>,
}

impl Default for SceneTransform {
    fn default() -> Self {
        Self {
            flip: false,
            rotation: 0.0,
            shift: na::Vector3::zeros(),
        }
    }
}

impl SceneTransform {
    pub fn random<R>(config: &AugmentationConfig, rng: &mut R) -> Result<Self>
    where
        R: Rng,
    {
        let AugmentationConfig {
            flip_prob,
            max_rotation,
            shift_std,
        } = *config;
        let flip = rng.gen_bool(flip_prob);
        let rotation = if max_rotation > 0.0 {
            rng.gen_range(-max_rotation..=max_rotation)
        } else {
            0.0
        };
        let normal = Normal::new(0.0, shift_std)?;
        let shift = na::Vector3::new(normal.sample(rng), normal.sample(rng), normal.sample(rng));
        Ok(Self {
            flip,
            rotation,
            shift,
        })
    }

    fn rotation(&self) -> na::Rotation3<f32> {
        na::Rotation3::from_axis_angle(&na::Vector3::y_axis(), self.rotation)
    }

    pub fn apply_point(&self, point: &na::Point3<f32>) -> na::Point3<f32> {
        let mut point = *point;
        if self.flip {
            point.x = -point.x;
        }
        self.rotation() * point + self.shift
    }

    /// 镜像后朝向变为 π - rot_y，旋转后变为 rot_y + rotation
    pub fn apply_box(&self, bbox: &XYZLWHRotY) -> XYZLWHRotY {
        let XYZLWHRotY(_, _, _, l, w, h, rot_y) = *bbox;
        let center = self.apply_point(&bbox.center());
        let rot_y = if self.flip { PI - rot_y } else { rot_y };
        let rot_y = wrap_to_pi(rot_y + self.rotation);
        XYZLWHRotY(center.x, center.y, center.z, l, w, h, rot_y)
    }

    fn inverse_homogeneous(&self) -> na::Matrix4<f32> {
        let flip = if self.flip {
            na::Matrix4::from_diagonal(&na::Vector4::new(-1.0, 1.0, 1.0, 1.0))
        } else {
            na::Matrix4::identity()
        };
        flip * self.rotation().inverse().to_homogeneous()
            * na::Translation3::from(-self.shift).to_homogeneous()
    }

    /// 变换后的场景经新投影矩阵仍落在原图像的同一像素
    pub fn apply_projection(&self, projection: &na::Matrix3x4<f32>) -> na::Matrix3x4<f32> {
        projection * self.inverse_homogeneous()
    }

    pub fn apply_points(&self, points: &mut [LidarPoint]) {
        points
            .iter_mut()
            .for_each(|point| point.position = self.apply_point(&point.position));
    }

    pub fn apply_frame(&self, frame: &mut Frame) {
        self.apply_points(&mut frame.points);
        for object in frame.objects.iter_mut() {
            object.bbox_3d = self.apply_box(&object.bbox_3d);
        }
        frame.calib.p = self.apply_projection(&frame.calib.p);
    }
}

pub fn rotate_points_along_y(points: &mut [LidarPoint], angle: f32) {
    SceneTransform {
        rotation: angle,
        ..Default::default()
    }
    .apply_points(points);
}

pub fn shift_points(points: &mut [LidarPoint], shift: &na::Vector3<f32>) {
    SceneTransform {
        shift: *shift,
        ..Default::default()
    }
    .apply_points(points);
}

pub fn flip_points_x(points: &mut [LidarPoint]) {
    SceneTransform {
        flip: true,
        ..Default::default()
    }
    .apply_points(points);
}
