use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// KITTI 标注文件中出现的全部物体类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum ObjectType {
    #[strum(ascii_case_insensitive)]
    Car,
    #[strum(ascii_case_insensitive)]
    Van,
    #[strum(ascii_case_insensitive)]
    Truck,
    #[strum(ascii_case_insensitive)]
    Pedestrian,
    #[strum(serialize = "Person_sitting", ascii_case_insensitive)]
    #[serde(rename = "Person_sitting")]
    PersonSitting,
    #[strum(ascii_case_insensitive)]
    Cyclist,
    #[strum(ascii_case_insensitive)]
    Tram,
    #[strum(ascii_case_insensitive)]
    Misc,
    #[strum(ascii_case_insensitive)]
    DontCare,
}

impl ObjectType {
    /// 训练时使用的分类编号，没有对应类别的类型返回 None
    pub fn class(&self) -> Option<Class> {
        match self {
            Self::Car => Some(Class::Car),
            Self::Pedestrian => Some(Class::Pedestrian),
            Self::Cyclist => Some(Class::Cyclist),
            _ => None,
        }
    }
}

/// 样本的分类标签，0 为背景
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Display)]
#[repr(u8)]
pub enum Class {
    NonObject = 0,
    Car = 1,
    Pedestrian = 2,
    Cyclist = 3,
}

impl Class {
    pub fn index(&self) -> i32 {
        u8::from(*self) as i32
    }
}

/// KITTI 的难度等级
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, Serialize, Deserialize,
)]
pub enum Difficulty {
    #[strum(ascii_case_insensitive)]
    Easy,
    #[strum(ascii_case_insensitive)]
    Moderate,
    #[strum(ascii_case_insensitive)]
    Hard,
    #[strum(ascii_case_insensitive)]
    Unknown,
}

impl Difficulty {
    /// 由 2d 框高度（像素）、遮挡等级和截断比例判断难度
    pub fn from_observation(height: f32, occlusion: i32, truncation: f32) -> Self {
        if height >= 40.0 && occlusion <= 0 && truncation <= 0.15 {
            Self::Easy
        } else if height >= 25.0 && occlusion <= 1 && truncation <= 0.3 {
            Self::Moderate
        } else if height >= 25.0 && occlusion <= 2 && truncation <= 0.5 {
            Self::Hard
        } else {
            Self::Unknown
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BBox2D {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox2D {
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

/*
  相机矫正坐标系 (rect)

       O._________\ x
       /|         /
      / |
  z |/_ |
        |
       \|/
        y (竖直向下)

                                     (6)_________(7)
                                       /|       /|
                                      / |      / |
                                     /  |     /  |
                    ___          (5)/___|____/(4)|
                     |              |   |    |   |
                     |  ___         |(2)|____|___|(3)
                     h   /          |   /    |   /
                     |  w           |  /  C.-|-/------\ x'
                     | /            | /    /|| /      /
                    _|/          (1)|/____/_||/(0)
                                        /   |
                                    z'|/_   |
                                           \|/
                                           y'

                                    |<--l--->|

    (x, y, z) 是底面中心 C 在 O 系下的坐标，l 沿 x' 轴，w 沿 z' 轴，h 沿 -y' 方向

    rot_y 为绕 y 轴的旋转角，x' = R_y(rot_y) * x，因此 rot_y = 0 时车头朝向 x 轴
    0~3 为底面四点，4~7 为顶面四点，俯视图多边形取 0~3 的 (x, z)
*/

#[allow(non_snake_case)]
pub mod BBox3D {
    use nalgebra as na;

    use derive_more::Display;
    use geo::{polygon, Polygon};

    #[derive(Clone, Copy, Debug, PartialEq, Display)]
    #[display(fmt = "x: {}, y: {}, z: {}, l: {}, w: {}, h: {}, rot_y: {}", "_0", "_1", "_2", "_3", "_4", "_5", "_6", )]
    pub struct XYZLWHRotY(pub f32, pub f32, pub f32, pub f32, pub f32, pub f32, pub f32, );

    impl XYZLWHRotY {
        pub fn center(&self) -> na::Point3<f32> {
            na::Point3::new(self.0, self.1, self.2)
        }

        /// (l, w, h)
        pub fn size(&self) -> [f32; 3] {
            [self.3, self.4, self.5]
        }

        pub fn rot_y(&self) -> f32 {
            self.6
        }

        pub fn to_corner_points(&self) -> CornerPoints {
            let Self(x, y, z, l, w, h, rot_y) = *self;
            let iso = na::Isometry3::new(na::Vector3::new(x, y, z), na::Vector3::y() * rot_y);
            let (hl, hw) = (l / 2.0, w / 2.0);
            CornerPoints([
                // 变换矩阵 乘以 0~7 这 8 个边角点在 C-x'y'z' 下的坐标
                iso * na::Point3::new( hl,  0.0,  hw),
                iso * na::Point3::new( hl,  0.0, -hw),
                iso * na::Point3::new(-hl,  0.0, -hw),
                iso * na::Point3::new(-hl,  0.0,  hw),
                iso * na::Point3::new( hl, -h,    hw),
                iso * na::Point3::new( hl, -h,   -hw),
                iso * na::Point3::new(-hl, -h,   -hw),
                iso * na::Point3::new(-hl, -h,    hw),
            ])
        }

        /// 网络端使用的提议框排列顺序 [x, y, z, rot_y, l, h, w]
        pub fn to_proposal_array(&self) -> [f32; 7] {
            let Self(x, y, z, l, w, h, rot_y) = *self;
            [x, y, z, rot_y, l, h, w]
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq)]
    pub struct CornerPoints(pub [na::Point3<f32>; 8]);

    impl CornerPoints {
        /// 底面 0~3 点在 xz 平面上的投影
        pub fn top_down(&self) -> Polygon<f64> {
            let [b0, b1, b2, b3, ..] = &self.0;
            polygon![
                (x: b0.x as f64, y: b0.z as f64),
                (x: b1.x as f64, y: b1.z as f64),
                (x: b2.x as f64, y: b2.z as f64),
                (x: b3.x as f64, y: b3.z as f64),
            ]
        }

        pub fn to_array(&self) -> [[f32; 3]; 8] {
            let mut out = [[0f32; 3]; 8];
            for (dst, corner) in out.iter_mut().zip(self.0.iter()) {
                *dst = [corner.x, corner.y, corner.z];
            }
            out
        }
    }
}

/// 提议框与标注框使用同一种位姿表示
pub type Proposal = BBox3D::XYZLWHRotY;

pub mod input;

pub mod kitti;

pub mod output;
