//! # 数据输出接口

use super::{BBox3D, Class};
use crate::{common::*, encoding::EncodedTarget};

/// 每个点的通道数：xyz，反射强度，是否在候选框 / 真值框内的 one-hot
pub const NUM_CHANNEL: usize = 6;

/// 单个提议框生成的训练样本
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct Sample {
    /// 按出队顺序严格递增
    pub id: u64,
    pub frame_id: String,
    pub class: Class,
    /// 相对提议框中心的点，一定非空
    #[derivative(Debug = "ignore")]
    pub pointcloud: Vec<[f32; NUM_CHANNEL]>,
    /// 缩放后的图像，同一帧的样本共享
    #[derivative(Debug = "ignore")]
    pub image: Arc<RgbImage>,
    /// 与缩放后图像匹配的投影矩阵
    pub calib: na::Matrix3x4<f32>,
    /// [x, y, z, rot_y, l, h, w]
    pub proposal_box: [f32; 7],
    pub target: EncodedTarget,
    /// 背景样本没有真值框
    pub gt_box: Option<BBox3D::CornerPoints>,
}

impl Sample {
    pub fn is_positive(&self) -> bool {
        self.class != Class::NonObject
    }
}

/// 定长批数据
#[derive(Debug, Clone)]
pub struct Batch {
    /// 样本所属的帧编号
    pub ids: Vec<String>,
    pub sample_ids: Vec<u64>,
    /// B × P × 6
    pub pointcloud: Array3<f32>,
    /// B × H × W × 3，未归一化的像素值
    pub images: Array4<f32>,
    /// B × 3 × 4
    pub calib: Array3<f32>,
    pub label: Array1<i32>,
    /// B × 7
    pub prop_box: Array2<f32>,
    pub center_x_cls: Array1<i32>,
    pub center_z_cls: Array1<i32>,
    pub center_x_res: Array1<f32>,
    pub center_y_res: Array1<f32>,
    pub center_z_res: Array1<f32>,
    pub angle_cls: Array1<i32>,
    pub size_cls: Array1<i32>,
    pub angle_res: Array1<f32>,
    /// B × 3
    pub size_res: Array2<f32>,
    /// B × 8 × 3
    pub gt_box_of_prop: Array3<f32>,
}

impl Batch {
    pub fn zeros(batch_size: usize, num_points: usize, image_height: usize, image_width: usize) -> Self {
        Self {
            ids: Vec::with_capacity(batch_size),
            sample_ids: Vec::with_capacity(batch_size),
            pointcloud: Array3::zeros((batch_size, num_points, NUM_CHANNEL)),
            images: Array4::zeros((batch_size, image_height, image_width, 3)),
            calib: Array3::zeros((batch_size, 3, 4)),
            label: Array1::zeros(batch_size),
            prop_box: Array2::zeros((batch_size, 7)),
            center_x_cls: Array1::zeros(batch_size),
            center_z_cls: Array1::zeros(batch_size),
            center_x_res: Array1::zeros(batch_size),
            center_y_res: Array1::zeros(batch_size),
            center_z_res: Array1::zeros(batch_size),
            angle_cls: Array1::zeros(batch_size),
            size_cls: Array1::zeros(batch_size),
            angle_res: Array1::zeros(batch_size),
            size_res: Array2::zeros((batch_size, 3)),
            gt_box_of_prop: Array3::zeros((batch_size, 8, 3)),
        }
    }

    pub fn len(&self) -> usize {
        self.label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 将样本写入第 index 行，choice 为重采样后的点下标
    pub fn set(&mut self, index: usize, sample: &Sample, choice: &[usize]) -> Result<()> {
        let (_, num_points, _) = self.pointcloud.dim();
        ensure!(
            choice.len() == num_points,
            "expect {} point indexes, but get {}",
            num_points,
            choice.len()
        );
        let (_, height, width, _) = self.images.dim();
        let (image_width, image_height) = sample.image.dimensions();
        ensure!(
            image_width as usize == width && image_height as usize == height,
            "sample image is {}x{}, but the batch expects {}x{}",
            image_width,
            image_height,
            width,
            height
        );

        self.ids.push(sample.frame_id.clone());
        self.sample_ids.push(sample.id);

        for (mut row, &point_index) in self
            .pointcloud
            .slice_mut(s![index, .., ..])
            .outer_iter_mut()
            .zip(choice)
        {
            let point = sample
                .pointcloud
                .get(point_index)
                .ok_or_else(|| format_err!("point index {} out of range", point_index))?;
            for (dst, &value) in row.iter_mut().zip(point.iter()) {
                *dst = value;
            }
        }

        let pixels = ArrayView3::from_shape((height, width, 3), sample.image.as_raw().as_slice())?;
        self.images
            .slice_mut(s![index, .., .., ..])
            .zip_mut_with(&pixels, |dst, &src| *dst = src as f32);

        for ((row, col), dst) in self.calib.slice_mut(s![index, .., ..]).indexed_iter_mut() {
            *dst = sample.calib[(row, col)];
        }

        self.label[index] = sample.class.index();
        for (dst, &value) in self.prop_box.slice_mut(s![index, ..]).iter_mut().zip(&sample.proposal_box) {
            *dst = value;
        }

        let EncodedTarget {
            center_cls,
            center_res,
            angle_cls,
            angle_res,
            size_cls,
            size_res,
        } = sample.target;
        self.center_x_cls[index] = center_cls[0];
        self.center_z_cls[index] = center_cls[1];
        self.center_x_res[index] = center_res[0];
        self.center_y_res[index] = center_res[1];
        self.center_z_res[index] = center_res[2];
        self.angle_cls[index] = angle_cls;
        self.angle_res[index] = angle_res;
        self.size_cls[index] = size_cls;
        for (dst, &value) in self.size_res.slice_mut(s![index, ..]).iter_mut().zip(&size_res) {
            *dst = value;
        }

        if let Some(gt_box) = &sample.gt_box {
            for (mut row, corner) in self
                .gt_box_of_prop
                .slice_mut(s![index, .., ..])
                .outer_iter_mut()
                .zip(gt_box.to_array().iter())
            {
                for (dst, &value) in row.iter_mut().zip(corner) {
                    *dst = value;
                }
            }
        }

        Ok(())
    }
}
