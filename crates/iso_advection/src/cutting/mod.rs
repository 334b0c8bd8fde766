// crates/iso_advection/src/cutting/mod.rs

//! 等值面切割
//!
//! - [`face`]: 多边形面的等值切割
//! - [`cell`]: 多面体单元的等值切割与体积分数反求

pub mod cell;
pub mod face;

pub use cell::{cut_cell, CellCut, CellCutter, CellStatus};
pub use face::{cut_face, cut_points, FaceCut, FaceStatus, PointList};
