//! Common imports from external crates.

pub use anyhow::{bail, ensure, format_err, Context, Error, Result};
pub use derivative::Derivative;
pub use image::{imageops::FilterType, RgbImage};
pub use itertools::{izip, Itertools};
pub use log::{debug, error, info, trace, warn};
pub use nalgebra as na;
pub use ndarray::{s, Array1, Array2, Array3, Array4, ArrayView3};
pub use ordered_float::OrderedFloat;
pub use rand::{prelude::*, rngs::StdRng, seq::SliceRandom};
pub use rand_distr::{Normal, Uniform};
pub use serde::{Deserialize, Serialize};
pub use std::{
    convert::TryFrom,
    f32::consts::{FRAC_PI_2, PI},
    fmt::Debug,
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};
