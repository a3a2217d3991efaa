//! 提议框与真值框匹配、点云抽取和正负样本平衡

use crate::{
    common::*,
    config::Config,
    data::{
        input::{Frame, LidarPoint, Object},
        output::{Sample, NUM_CHANNEL},
        Class, Difficulty, ObjectType, Proposal,
    },
    encoding::{EncodedTarget, TargetEncoder},
    find_match_label,
    geometry::{compute_box_3d, extract_points_in_box3d},
    proposal::ProposalGenerator,
};

/// 缩放到固定分辨率的图像及对应的投影矩阵，同一帧的样本共享
#[derive(Debug, Clone)]
pub struct ScaledView {
    pub image: Arc<RgbImage>,
    pub calib: na::Matrix3x4<f32>,
}

/// 样本编号，只由生产者线程递增
#[derive(Debug, Clone, Default)]
pub struct SampleIdCounter {
    next: u64,
}

impl SampleIdCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

#[derive(Debug, Clone)]
pub struct SampleBuilder {
    image_width: u32,
    image_height: u32,
    encoder: TargetEncoder,
}

impl SampleBuilder {
    pub fn new(image_width: u32, image_height: u32, encoder: TargetEncoder) -> Self {
        Self {
            image_width,
            image_height,
            encoder,
        }
    }

    pub fn encoder(&self) -> &TargetEncoder {
        &self.encoder
    }

    /// 图像缩放到固定分辨率，投影矩阵前两行乘以对应的缩放比例
    pub fn scale_view(&self, image: &RgbImage, calib: &na::Matrix3x4<f32>) -> ScaledView {
        let (width, height) = image.dimensions();
        let scale_x = self.image_width as f32 / width as f32;
        let scale_y = self.image_height as f32 / height as f32;

        let resized = if (width, height) == (self.image_width, self.image_height) {
            image.clone()
        } else {
            image::imageops::resize(
                image,
                self.image_width,
                self.image_height,
                FilterType::Triangle,
            )
        };

        let mut calib = *calib;
        calib.row_mut(0).scale_mut(scale_x);
        calib.row_mut(1).scale_mut(scale_y);

        ScaledView {
            image: Arc::new(resized),
            calib,
        }
    }

    /// 框内没有点时返回 None
    ///
    /// 样本编号在出队顺序确定后由 [`FrameSampler`] 赋值
    pub fn build_sample(
        &self,
        frame_id: &str,
        points: &[LidarPoint],
        view: &ScaledView,
        proposal: &Proposal,
        label: Option<&Object>,
    ) -> Option<Sample> {
        let (_, box_3d) = compute_box_3d(proposal, &view.calib);
        let mask = extract_points_in_box3d(points.iter().map(|point| &point.position), &box_3d);
        let points: Vec<&LidarPoint> = izip!(points, &mask)
            .filter(|(_, &inside)| inside)
            .map(|(point, _)| point)
            .collect();
        if points.is_empty() {
            return None;
        }

        let center = proposal.center();
        let mut pointcloud: Vec<[f32; NUM_CHANNEL]> = points
            .iter()
            .map(|point| {
                let local = point.position - center;
                [local.x, local.y, local.z, point.intensity, 1.0, 0.0]
            })
            .collect();

        let mut sample = Sample {
            id: 0,
            frame_id: frame_id.to_string(),
            class: Class::NonObject,
            pointcloud: vec![],
            image: view.image.clone(),
            calib: view.calib,
            proposal_box: proposal.to_proposal_array(),
            target: EncodedTarget::default(),
            gt_box: None,
        };

        if let Some(label) = label {
            // 筛选阶段已保证类型有对应类别
            let class = label.object_type.class()?;
            let target = self.encoder.encode(&label.bbox_3d, class, &center)?;
            let (_, gt_box_3d) = compute_box_3d(&label.bbox_3d, &view.calib);
            let gt_mask =
                extract_points_in_box3d(points.iter().map(|point| &point.position), &gt_box_3d);
            for (feature, _) in izip!(&mut pointcloud, &gt_mask).filter(|(_, &inside)| inside) {
                feature[4] = 0.0;
                feature[5] = 1.0;
            }

            sample.class = class;
            sample.target = target;
            sample.gt_box = Some(gt_box_3d);
        }

        sample.pointcloud = pointcloud;
        Some(sample)
    }
}

/// 负样本打乱后截断到正样本数量，再与正样本一起打乱
pub fn balance<R>(positives: Vec<Sample>, mut negatives: Vec<Sample>, rng: &mut R) -> Vec<Sample>
where
    R: Rng,
{
    negatives.shuffle(rng);
    negatives.truncate(positives.len());
    let mut samples = positives;
    samples.extend(negatives);
    samples.shuffle(rng);
    samples
}

/// 一帧数据的提议框生成、匹配和样本平衡
#[derive(Debug, Clone)]
pub struct FrameSampler {
    builder: SampleBuilder,
    generator: ProposalGenerator,
    iou_threshold: f32,
    types: Vec<ObjectType>,
    difficulties: Vec<Difficulty>,
}

impl FrameSampler {
    pub fn new(config: &Config) -> Result<Self> {
        let Config {
            dataset,
            sampling,
            encoding,
            ..
        } = config;
        let encoder = TargetEncoder::new(encoding)?;

        Ok(Self {
            builder: SampleBuilder::new(sampling.image_width, sampling.image_height, encoder),
            generator: ProposalGenerator::new(&sampling.proposal_noise)?,
            iou_threshold: sampling.iou_threshold,
            types: dataset.types.clone(),
            difficulties: dataset.difficulties.clone(),
        })
    }

    /// 帧内是否有通过类型和难度筛选的标注
    pub fn has_qualifying_labels(&self, frame: &Frame) -> bool {
        !frame
            .filtered_objects(&self.types, &self.difficulties)
            .is_empty()
    }

    pub fn sample_frame<R>(&self, frame: &Frame, rng: &mut R, ids: &mut SampleIdCounter) -> Vec<Sample>
    where
        R: Rng,
    {
        let labels = frame.filtered_objects(&self.types, &self.difficulties);
        if labels.is_empty() {
            trace!("frame {} has no qualifying labels", frame.id);
            return vec![];
        }

        let label_quads: Vec<_> = labels
            .iter()
            .map(|label| label.bbox_3d.to_corner_points().top_down())
            .collect();
        let proposals = self.generator.generate(&labels, rng);
        let view = self.builder.scale_view(&frame.image, &frame.calib.p);

        let (mut positives, mut negatives) = (vec![], vec![]);
        for proposal in &proposals {
            let quad = proposal.to_corner_points().top_down();
            let matched = find_match_label(&quad, &label_quads)
                .filter(|&(_, iou)| iou >= self.iou_threshold)
                .map(|(idx, _)| labels[idx]);

            let sample = self
                .builder
                .build_sample(&frame.id, &frame.points, &view, proposal, matched);
            match (sample, matched) {
                (Some(sample), Some(_)) => positives.push(sample),
                (Some(sample), None) => negatives.push(sample),
                (None, _) => {}
            }
        }

        let (num_positive, num_negative) = (positives.len(), negatives.len());
        let mut samples = balance(positives, negatives, rng);
        samples.iter_mut().for_each(|sample| sample.id = ids.next_id());

        debug!(
            "frame {}: {} proposals, {} positive, {} of {} negative samples kept",
            frame.id,
            proposals.len(),
            num_positive,
            samples.len() - num_positive,
            num_negative
        );
        samples
    }
}
