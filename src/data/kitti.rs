//! # KITTI 目标检测数据集
//!
//! 目录结构：
//!
//! ```text
//! <dir>/<split>.txt
//! <dir>/training/calib/000000.txt
//! <dir>/training/label_2/000000.txt
//! <dir>/training/image_2/000000.png
//! <dir>/training/velodyne/000000.bin
//! ```

use super::{
    input::{Calibration, FrameProvider, LidarPoint, Object},
    BBox2D, BBox3D, Difficulty, ObjectType,
};
use crate::common::*;

/// 标注文件一行的前 15 列
const NUM_LABEL_FIELDS: usize = 15;

/// 每个激光点 x, y, z, 反射强度
const LIDAR_RECORD_SIZE: usize = 16;

#[derive(Debug, Clone)]
pub struct KittiDataset {
    dir: PathBuf,
}

impl KittiDataset {
    pub fn open<P>(dir: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let dir = dir.as_ref().join("training");
        ensure!(dir.is_dir(), "{} is not a directory", dir.display());
        Ok(Self { dir })
    }

    fn path_of(&self, kind: &str, frame_id: &str, ext: &str) -> Result<PathBuf> {
        let index: u32 = frame_id
            .parse()
            .with_context(|| format!("invalid frame id {:?}", frame_id))?;
        Ok(self.dir.join(kind).join(format!("{:06}.{}", index, ext)))
    }
}

impl FrameProvider for KittiDataset {
    fn get_calibration(&self, frame_id: &str) -> Result<Calibration> {
        let path = self.path_of("calib", frame_id, "txt")?;
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        parse_calibration(&text).with_context(|| format!("invalid calibration file {}", path.display()))
    }

    fn get_label_objects(&self, frame_id: &str) -> Result<Vec<Object>> {
        let path = self.path_of("label_2", frame_id, "txt")?;
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        parse_labels(&text).with_context(|| format!("invalid label file {}", path.display()))
    }

    fn get_image(&self, frame_id: &str) -> Result<RgbImage> {
        let path = self.path_of("image_2", frame_id, "png")?;
        let image = image::open(&path)
            .with_context(|| format!("failed to open image {}", path.display()))?;
        Ok(image.into_rgb8())
    }

    fn get_lidar(&self, frame_id: &str) -> Result<Vec<LidarPoint>> {
        let path = self.path_of("velodyne", frame_id, "bin")?;
        let bytes = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        parse_lidar(&bytes).with_context(|| format!("invalid point cloud {}", path.display()))
    }
}

/// 读取 `<dir>/<split>.txt` 中的帧编号，忽略空行
pub fn load_split_ids<P>(dir: P, split: &str) -> Result<Vec<String>>
where
    P: AsRef<Path>,
{
    let path = dir.as_ref().join(format!("{}.txt", split));
    let text = fs::read_to_string(&path)
        .with_context(|| format!("failed to read split file {}", path.display()))?;

    let ids: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| -> Result<String> {
            ensure!(
                !line.contains(char::is_whitespace),
                "malformed frame id {:?} in {}",
                line,
                path.display()
            );
            Ok(line.to_string())
        })
        .collect::<Result<_>>()?;
    ensure!(!ids.is_empty(), "split file {} is empty", path.display());
    Ok(ids)
}

pub fn parse_labels(text: &str) -> Result<Vec<Object>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            parse_label_line(line).with_context(|| format!("line {}: {:?}", index + 1, line))
        })
        .collect()
}

type LabelFields = (
    String,
    f32,
    i32,
    f32,
    f32,
    f32,
    f32,
    f32,
    f32,
    f32,
    f32,
    f32,
    f32,
    f32,
    f32,
);

fn scan_label_fields(line: &str) -> Result<LabelFields, text_io::Error> {
    let (ty, truncation, occlusion, alpha, x1, y1, x2, y2, h, w, l, x, y, z, rot_y):
        (String, f32, i32, f32, f32, f32, f32, f32, f32, f32, f32, f32, f32, f32, f32);
    text_io::try_scan!(line.bytes() => "{} {} {} {} {} {} {} {} {} {} {} {} {} {} {}", ty, truncation, occlusion, alpha, x1, y1, x2, y2, h, w, l, x, y, z, rot_y);
    Ok((ty, truncation, occlusion, alpha, x1, y1, x2, y2, h, w, l, x, y, z, rot_y))
}

fn parse_label_line(line: &str) -> Result<Object> {
    // 检测结果文件多一列置信度
    let fields = line.split_whitespace().collect_vec();
    ensure!(
        fields.len() >= NUM_LABEL_FIELDS,
        "expect at least {} fields, but get {}",
        NUM_LABEL_FIELDS,
        fields.len()
    );
    let line = fields[..NUM_LABEL_FIELDS].join(" ");

    let (ty, truncation, occlusion, alpha, x1, y1, x2, y2, h, w, l, x, y, z, rot_y) =
        scan_label_fields(&line).map_err(|err| format_err!("{:?}", err))?;
    let object_type =
        ObjectType::from_str(&ty).map_err(|_| format_err!("unknown object type {:?}", ty))?;
    let bbox_2d = BBox2D { x1, y1, x2, y2 };
    let difficulty = Difficulty::from_observation(bbox_2d.height(), occlusion, truncation);

    Ok(Object {
        object_type,
        truncation,
        occlusion,
        alpha,
        bbox_2d,
        // 文件中尺寸的顺序为 h w l
        bbox_3d: BBox3D::XYZLWHRotY(x, y, z, l, w, h, rot_y),
        difficulty,
    })
}

pub fn parse_calibration(text: &str) -> Result<Calibration> {
    let mut p2 = None;
    let mut r0_rect = None;
    let mut velo_to_cam = None;

    for line in text.lines() {
        let (key, values) = match line.split_once(':') {
            Some(pair) => pair,
            None => continue,
        };
        let parse_values = || -> Result<Vec<f32>> {
            values
                .split_whitespace()
                .map(|value| {
                    f32::from_str(value).with_context(|| format!("invalid value {:?} of {}", value, key))
                })
                .collect()
        };

        match key.trim() {
            "P2" => p2 = Some(parse_values()?),
            "R0_rect" => r0_rect = Some(parse_values()?),
            "Tr_velo_to_cam" => velo_to_cam = Some(parse_values()?),
            _ => {}
        }
    }

    let p2 = p2.ok_or_else(|| format_err!("missing P2"))?;
    let r0_rect = r0_rect.ok_or_else(|| format_err!("missing R0_rect"))?;
    let velo_to_cam = velo_to_cam.ok_or_else(|| format_err!("missing Tr_velo_to_cam"))?;
    ensure!(p2.len() == 12, "P2 expects 12 values, but get {}", p2.len());
    ensure!(r0_rect.len() == 9, "R0_rect expects 9 values, but get {}", r0_rect.len());
    ensure!(
        velo_to_cam.len() == 12,
        "Tr_velo_to_cam expects 12 values, but get {}",
        velo_to_cam.len()
    );

    Ok(Calibration {
        p: na::Matrix3x4::from_row_slice(&p2),
        r0_rect: na::Matrix3::from_row_slice(&r0_rect),
        velo_to_cam: na::Matrix3x4::from_row_slice(&velo_to_cam),
    })
}

/// 小端 f32 的 (x, y, z, intensity) 序列
pub fn parse_lidar(bytes: &[u8]) -> Result<Vec<LidarPoint>> {
    ensure!(
        bytes.len() % LIDAR_RECORD_SIZE == 0,
        "point cloud size {} is not a multiple of {}",
        bytes.len(),
        LIDAR_RECORD_SIZE
    );

    let points = bytes
        .chunks_exact(LIDAR_RECORD_SIZE)
        .map(|record| {
            let mut values = [0f32; 4];
            for (value, chunk) in values.iter_mut().zip(record.chunks_exact(4)) {
                *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
            let [x, y, z, intensity] = values;
            LidarPoint::new(x, y, z, intensity)
        })
        .collect();
    Ok(points)
}
