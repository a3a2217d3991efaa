//! 由真值框加噪声模拟检测器的提议框

use crate::{
    common::*,
    config::ProposalNoise,
    data::{input::Object, BBox3D::XYZLWHRotY, Proposal},
};

#[derive(Debug, Clone)]
pub struct ProposalGenerator {
    center: Normal<f32>,
    heading: Normal<f32>,
    size: Normal<f32>,
}

impl ProposalGenerator {
    pub fn new(noise: &ProposalNoise) -> Result<Self> {
        let ProposalNoise {
            center_std,
            heading_std,
            size_std,
        } = *noise;
        Ok(Self {
            center: Normal::new(0.0, center_std)?,
            heading: Normal::new(0.0, heading_std)?,
            size: Normal::new(0.0, size_std)?,
        })
    }

    /// 每个（已筛选的）真值框生成一个提议框
    ///
    /// 噪声按 中心 xyz、朝向、l、h、w 的顺序抽取
    // TODO: 与真值无关的负样本提议框
    pub fn generate<R>(&self, labels: &[&Object], rng: &mut R) -> Vec<Proposal>
    where
        R: Rng,
    {
        labels
            .iter()
            .map(|label| {
                let XYZLWHRotY(x, y, z, l, w, h, rot_y) = label.bbox_3d;
                let x = x + self.center.sample(rng);
                let y = y + self.center.sample(rng);
                let z = z + self.center.sample(rng);
                let rot_y = rot_y + self.heading.sample(rng);
                let l = l + self.size.sample(rng);
                let h = h + self.size.sample(rng);
                let w = w + self.size.sample(rng);
                XYZLWHRotY(x, y, z, l, w, h, rot_y)
            })
            .collect()
    }
}
