//! 数据管线的配置格式

use crate::{
    common::*,
    data::{Difficulty, ObjectType},
};

/// 完整配置，通常从 json5 文件读取
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub encoding: EncodingConfig,
    #[serde(default)]
    pub augmentation: AugmentationConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn new(dir: impl Into<PathBuf>, split: impl Into<String>) -> Self {
        Self {
            dataset: DatasetConfig::new(dir, split),
            sampling: Default::default(),
            encoding: Default::default(),
            augmentation: Default::default(),
            pipeline: Default::default(),
        }
    }

    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json5(&text)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_json5(text: &str) -> Result<Self> {
        let config: Self = json5::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let Self {
            dataset,
            sampling,
            encoding,
            augmentation,
            ..
        } = self;

        ensure!(!dataset.split.is_empty(), "dataset.split must not be empty");
        ensure!(!dataset.types.is_empty(), "dataset.types must not be empty");
        if let Some(object_type) = dataset.types.iter().find(|ty| ty.class().is_none()) {
            bail!("object type {} has no class index", object_type);
        }
        ensure!(
            !dataset.difficulties.is_empty(),
            "dataset.difficulties must not be empty"
        );

        ensure!(
            sampling.image_width > 0 && sampling.image_height > 0,
            "sampling image size must be positive"
        );
        ensure!(
            (0.0..=1.0).contains(&sampling.iou_threshold),
            "sampling.iou_threshold must be in range [0, 1]"
        );
        let ProposalNoise {
            center_std,
            heading_std,
            size_std,
        } = sampling.proposal_noise;
        ensure!(
            center_std >= 0.0 && heading_std >= 0.0 && size_std >= 0.0,
            "proposal noise must be non-negative"
        );

        ensure!(
            encoding.center_search_range > 0.0 && encoding.center_bin_size > 0.0,
            "encoding center range and bin size must be positive"
        );
        ensure!(
            encoding.num_heading_bins > 0,
            "encoding.num_heading_bins must be positive"
        );

        ensure!(
            (0.0..=1.0).contains(&augmentation.flip_prob),
            "augmentation.flip_prob must be in range [0, 1]"
        );
        ensure!(
            augmentation.max_rotation >= 0.0 && augmentation.shift_std >= 0.0,
            "augmentation ranges must be non-negative"
        );

        Ok(())
    }
}

/// 数据集选项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// KITTI 根目录，包含 `training/` 和 `<split>.txt`
    pub dir: PathBuf,
    pub split: String,
    #[serde(default = "default_types")]
    pub types: Vec<ObjectType>,
    #[serde(default = "default_difficulties")]
    pub difficulties: Vec<Difficulty>,
    /// 激光雷达 x 方向小于此距离的点被丢弃
    #[serde(default = "default_fov_clip_distance")]
    pub fov_clip_distance: f32,
}

impl DatasetConfig {
    pub fn new(dir: impl Into<PathBuf>, split: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            split: split.into(),
            types: default_types(),
            difficulties: default_difficulties(),
            fov_clip_distance: default_fov_clip_distance(),
        }
    }
}

/// 样本生成选项
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// 每个样本重采样后的点数
    pub num_points: NonZeroUsize,
    /// 俯视图 IOU 低于此值的提议框视为负样本
    pub iou_threshold: f32,
    pub image_width: u32,
    pub image_height: u32,
    pub proposal_noise: ProposalNoise,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            num_points: DEFAULT_NUM_POINTS,
            iou_threshold: 0.55,
            image_width: 1200,
            image_height: 360,
            proposal_noise: Default::default(),
        }
    }
}

/// 由真值框生成提议框时加入的高斯噪声标准差
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposalNoise {
    pub center_std: f32,
    pub heading_std: f32,
    pub size_std: f32,
}

impl ProposalNoise {
    pub fn zero() -> Self {
        Self {
            center_std: 0.0,
            heading_std: 0.0,
            size_std: 0.0,
        }
    }
}

impl Default for ProposalNoise {
    fn default() -> Self {
        Self {
            center_std: 0.1,
            heading_std: PI / 8.0,
            size_std: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// 中心点搜索范围（米），x 和 z 方向各为 [-range, range)
    pub center_search_range: f32,
    pub center_bin_size: f32,
    pub num_heading_bins: usize,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            center_search_range: 1.5,
            center_bin_size: 0.25,
            num_heading_bins: 12,
        }
    }
}

/// 数据增强选项，只在 `start(true)` 时生效
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// 左右镜像的概率
    pub flip_prob: f64,
    /// 绕 y 轴旋转角的范围 [-max_rotation, max_rotation]
    pub max_rotation: f32,
    /// 平移量的标准差
    pub shift_std: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            flip_prob: 0.5,
            max_rotation: PI / 18.0,
            shift_std: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 缓冲队列容量
    pub buffer_size: NonZeroUsize,
    /// 未指定时使用系统熵
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            seed: None,
        }
    }
}

const DEFAULT_NUM_POINTS: NonZeroUsize = match NonZeroUsize::new(512) {
    Some(n) => n,
    None => unreachable!(),
};

const DEFAULT_BUFFER_SIZE: NonZeroUsize = match NonZeroUsize::new(128) {
    Some(n) => n,
    None => unreachable!(),
};

fn default_types() -> Vec<ObjectType> {
    vec![ObjectType::Car, ObjectType::Pedestrian, ObjectType::Cyclist]
}

fn default_difficulties() -> Vec<Difficulty> {
    vec![Difficulty::Easy, Difficulty::Moderate, Difficulty::Hard]
}

fn default_fov_clip_distance() -> f32 {
    2.0
}
