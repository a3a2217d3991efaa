//! 以提议框中心为参考，将真值框编码为 区间分类 + 残差 的回归目标

use crate::{
    common::*,
    config::EncodingConfig,
    data::{BBox3D::XYZLWHRotY, Class},
};

/// 各类别的平均尺寸 (l, w, h)，下标为 class - 1
pub const MEAN_SIZES: [[f32; 3]; 3] = [
    [3.883_116_4, 1.628_567_4, 1.525_631_9],
    [0.844_225_24, 0.660_686_2, 1.762_551_2],
    [1.762_824, 0.597_063_7, 1.736_981_3],
];

pub const NUM_SIZE_CLASSES: usize = MEAN_SIZES.len();

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EncodedTarget {
    /// x、z 方向的区间编号
    pub center_cls: [i32; 2],
    /// x、y、z 方向的残差，y 方向直接为偏移量
    pub center_res: [f32; 3],
    pub angle_cls: i32,
    pub angle_res: f32,
    pub size_cls: i32,
    /// (l, w, h) 减去类别平均尺寸
    pub size_res: [f32; 3],
}

/// 角度归一化到 [-π, π)
pub fn wrap_to_pi(angle: f32) -> f32 {
    (angle + PI).rem_euclid(2.0 * PI) - PI
}

#[derive(Debug, Clone)]
pub struct TargetEncoder {
    center_search_range: f32,
    center_bin_size: f32,
    num_center_bins: usize,
    num_heading_bins: usize,
}

impl TargetEncoder {
    pub fn new(config: &EncodingConfig) -> Result<Self> {
        let EncodingConfig {
            center_search_range,
            center_bin_size,
            num_heading_bins,
        } = *config;
        ensure!(
            center_search_range > 0.0 && center_bin_size > 0.0,
            "center_search_range and center_bin_size must be positive"
        );
        let num_center_bins = (2.0 * center_search_range / center_bin_size).round() as usize;
        ensure!(
            num_center_bins > 0,
            "center_bin_size must not exceed twice the center_search_range"
        );
        ensure!(num_heading_bins > 0, "num_heading_bins must be positive");

        Ok(Self {
            center_search_range,
            center_bin_size,
            num_center_bins,
            num_heading_bins,
        })
    }

    pub fn num_center_bins(&self) -> usize {
        self.num_center_bins
    }

    pub fn num_heading_bins(&self) -> usize {
        self.num_heading_bins
    }

    fn heading_bin_width(&self) -> f32 {
        2.0 * PI / self.num_heading_bins as f32
    }

    /// 背景类没有平均尺寸，返回 None
    pub fn encode(
        &self,
        label: &XYZLWHRotY,
        class: Class,
        reference: &na::Point3<f32>,
    ) -> Option<EncodedTarget> {
        let size_cls = class.index() - 1;
        let template = MEAN_SIZES.get(usize::try_from(size_cls).ok()?)?;

        let offset = label.center() - *reference;
        let (x_cls, x_res) = self.encode_center_axis(offset.x);
        let (z_cls, z_res) = self.encode_center_axis(offset.z);
        let (angle_cls, angle_res) = self.encode_angle(label.rot_y());

        let size = label.size();
        let size_res = [
            size[0] - template[0],
            size[1] - template[1],
            size[2] - template[2],
        ];

        Some(EncodedTarget {
            center_cls: [x_cls, z_cls],
            center_res: [x_res, offset.y, z_res],
            angle_cls,
            angle_res,
            size_cls,
            size_res,
        })
    }

    pub fn decode(&self, target: &EncodedTarget, reference: &na::Point3<f32>) -> Option<XYZLWHRotY> {
        let EncodedTarget {
            center_cls,
            center_res,
            angle_cls,
            angle_res,
            size_cls,
            size_res,
        } = *target;
        let template = MEAN_SIZES.get(usize::try_from(size_cls).ok()?)?;

        let x = reference.x + self.decode_center_axis(center_cls[0], center_res[0]);
        let y = reference.y + center_res[1];
        let z = reference.z + self.decode_center_axis(center_cls[1], center_res[2]);
        let rot_y = wrap_to_pi(angle_cls as f32 * self.heading_bin_width() + angle_res);

        Some(XYZLWHRotY(
            x,
            y,
            z,
            template[0] + size_res[0],
            template[1] + size_res[1],
            template[2] + size_res[2],
            rot_y,
        ))
    }

    // 超出搜索范围的偏移落在两端的区间，残差相应变大
    fn encode_center_axis(&self, offset: f32) -> (i32, f32) {
        let shifted = offset + self.center_search_range;
        let max_bin = self.num_center_bins as i32 - 1;
        let bin = ((shifted / self.center_bin_size).floor() as i32).clamp(0, max_bin);
        let residual = shifted - (bin as f32 * self.center_bin_size + self.center_bin_size / 2.0);
        (bin, residual)
    }

    fn decode_center_axis(&self, bin: i32, residual: f32) -> f32 {
        bin as f32 * self.center_bin_size + self.center_bin_size / 2.0 + residual
            - self.center_search_range
    }

    fn encode_angle(&self, angle: f32) -> (i32, f32) {
        let width = self.heading_bin_width();
        let shifted = (angle.rem_euclid(2.0 * PI) + width / 2.0).rem_euclid(2.0 * PI);
        let max_bin = self.num_heading_bins as i32 - 1;
        let bin = ((shifted / width).floor() as i32).min(max_bin);
        let residual = shifted - (bin as f32 * width + width / 2.0);
        (bin, residual)
    }
}
