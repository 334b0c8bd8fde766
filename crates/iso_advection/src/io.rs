// crates/iso_advection/src/io.rs

//! 诊断输出
//!
//! - 界面多边形写成 Wavefront OBJ，可直接在 ParaView 中打开
//! - 表面单元、有界化单元等单元集合写成 JSON

use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::AdvectionResult;

/// 把界面多边形写成 OBJ 文件，返回写出的面数
///
/// 少于三个点的多边形被跳过。
pub fn write_iso_faces_obj(path: impl AsRef<Path>, polygons: &[Vec<DVec3>]) -> AdvectionResult<usize> {
    let file = File::create(path.as_ref())?;
    let mut w = BufWriter::new(file);

    writeln!(w, "# iso-faces: {}", polygons.len())?;
    let mut next_vertex = 1usize;
    let mut faces = Vec::with_capacity(polygons.len());
    for polygon in polygons.iter().filter(|p| p.len() >= 3) {
        for p in polygon {
            writeln!(w, "v {:.12e} {:.12e} {:.12e}", p.x, p.y, p.z)?;
        }
        faces.push((next_vertex, polygon.len()));
        next_vertex += polygon.len();
    }
    for &(first, n) in &faces {
        write!(w, "f")?;
        for i in first..first + n {
            write!(w, " {i}")?;
        }
        writeln!(w)?;
    }

    w.flush()?;
    Ok(faces.len())
}

/// 命名单元集合
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSet {
    /// 集合名称
    pub name: String,
    /// 时间步序号
    pub step: usize,
    /// 单元编号（升序）
    pub cells: Vec<usize>,
}

impl CellSet {
    /// 创建集合（单元编号排序去重）
    pub fn new(name: impl Into<String>, step: usize, cells: impl IntoIterator<Item = usize>) -> Self {
        let mut cells: Vec<usize> = cells.into_iter().collect();
        cells.sort_unstable();
        cells.dedup();
        Self {
            name: name.into(),
            step,
            cells,
        }
    }

    /// 写成 JSON 文件
    pub fn save(&self, path: impl AsRef<Path>) -> AdvectionResult<()> {
        let file = File::create(path.as_ref())?;
        let mut w = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut w, self)?;
        w.flush()?;
        Ok(())
    }

    /// 读取 JSON 文件
    pub fn load(path: impl AsRef<Path>) -> AdvectionResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obj_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iso.obj");
        let polygons = vec![
            vec![DVec3::ZERO, DVec3::X, DVec3::Y],
            vec![DVec3::ZERO, DVec3::X],
            vec![DVec3::Z, DVec3::X, DVec3::ONE, DVec3::Y],
        ];
        assert_eq!(write_iso_faces_obj(&path, &polygons).unwrap(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("v ")).count(), 7);
        let faces: Vec<&str> = text.lines().filter(|l| l.starts_with('f')).collect();
        assert_eq!(faces, vec!["f 1 2 3", "f 4 5 6 7"]);
    }

    #[test]
    fn test_cell_set_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("surface.json");
        let set = CellSet::new("surfaceCells", 3, [5, 1, 5, 2]);
        assert_eq!(set.cells, vec![1, 2, 5]);
        set.save(&path).unwrap();
        assert_eq!(CellSet::load(&path).unwrap(), set);
    }
}
