// crates/iso_advection/src/fields.rs

//! 面场
//!
//! 内部面一个数组，每个边界补丁一个数组。空补丁不存储数值：读取为 0，
//! 写入被忽略。

use iso_mesh::PolyMesh;
use serde::{Deserialize, Serialize};

use crate::error::{AdvectionError, AdvectionResult};

/// 面标量场
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceField {
    internal: Vec<f64>,
    boundary: Vec<Vec<f64>>,
}

impl FaceField {
    /// 全零场
    pub fn zeros(mesh: &PolyMesh) -> Self {
        Self::from_fn(mesh, |_| 0.0)
    }

    /// 按面编号生成（空补丁上的面不调用 `f`）
    pub fn from_fn(mesh: &PolyMesh, f: impl Fn(usize) -> f64) -> Self {
        let internal = (0..mesh.n_internal_faces()).map(&f).collect();
        let boundary = mesh
            .patches()
            .iter()
            .map(|p| {
                if p.kind.is_empty() {
                    Vec::new()
                } else {
                    p.range().map(&f).collect()
                }
            })
            .collect();
        Self { internal, boundary }
    }

    /// 内部面数值
    #[inline]
    pub fn internal(&self) -> &[f64] {
        &self.internal
    }

    /// 内部面数值（可写）
    #[inline]
    pub fn internal_mut(&mut self) -> &mut [f64] {
        &mut self.internal
    }

    /// 补丁数值
    #[inline]
    pub fn patch(&self, patch: usize) -> &[f64] {
        self.boundary.get(patch).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 补丁数值（可写）
    #[inline]
    pub fn patch_mut(&mut self, patch: usize) -> &mut [f64] {
        self.boundary
            .get_mut(patch)
            .map(Vec::as_mut_slice)
            .unwrap_or(&mut [])
    }

    /// 所有数值置为 `value`
    pub fn fill(&mut self, value: f64) {
        self.internal.fill(value);
        for p in &mut self.boundary {
            p.fill(value);
        }
    }

    /// 与同布局的另一场逐面组合
    pub fn zip_with(&self, other: &FaceField, f: impl Fn(f64, f64) -> f64) -> AdvectionResult<FaceField> {
        AdvectionError::check_size("face_field.internal", self.internal.len(), other.internal.len())?;
        AdvectionError::check_size("face_field.patches", self.boundary.len(), other.boundary.len())?;
        let internal = self.internal.iter().zip(&other.internal).map(|(&a, &b)| f(a, b)).collect();
        let mut boundary = Vec::with_capacity(self.boundary.len());
        for (a, b) in self.boundary.iter().zip(&other.boundary) {
            AdvectionError::check_size("face_field.patch", a.len(), b.len())?;
            boundary.push(a.iter().zip(b).map(|(&x, &y)| f(x, y)).collect());
        }
        Ok(FaceField { internal, boundary })
    }

    /// 检查场布局与网格一致
    pub fn check_layout(&self, mesh: &PolyMesh) -> AdvectionResult<()> {
        AdvectionError::check_size("face_field.internal", mesh.n_internal_faces(), self.internal.len())?;
        AdvectionError::check_size("face_field.patches", mesh.n_patches(), self.boundary.len())?;
        for (p, values) in mesh.patches().iter().zip(&self.boundary) {
            let expected = if p.kind.is_empty() { 0 } else { p.size };
            AdvectionError::check_size("face_field.patch", expected, values.len())?;
        }
        Ok(())
    }

    /// 任意面（内部或边界）的数值
    pub fn face_value(&self, mesh: &PolyMesh, face: usize) -> AdvectionResult<f64> {
        if mesh.is_internal_face(face) {
            return self.internal.get(face).copied().ok_or_else(|| {
                AdvectionError::invalid_patch(face, mesh.n_patches(), "内部面数值缺失")
            });
        }
        let (patch, local) = self.locate(mesh, face)?;
        if mesh.patch(patch).kind.is_empty() {
            return Ok(0.0);
        }
        Ok(self.boundary[patch][local])
    }

    /// 设置任意面（内部或边界）的数值
    pub fn set_face_value(&mut self, mesh: &PolyMesh, face: usize, value: f64) -> AdvectionResult<()> {
        if mesh.is_internal_face(face) {
            let n_patches = mesh.n_patches();
            let slot = self.internal.get_mut(face).ok_or_else(|| {
                AdvectionError::invalid_patch(face, n_patches, "内部面数值缺失")
            })?;
            *slot = value;
            return Ok(());
        }
        let (patch, local) = self.locate(mesh, face)?;
        if !mesh.patch(patch).kind.is_empty() {
            self.boundary[patch][local] = value;
        }
        Ok(())
    }

    /// 边界面 → (补丁, 补丁内序号)，并检查数组长度
    fn locate(&self, mesh: &PolyMesh, face: usize) -> AdvectionResult<(usize, usize)> {
        let n_patches = mesh.n_patches();
        let patch = mesh
            .which_patch(face)
            .ok_or_else(|| AdvectionError::invalid_patch(face, n_patches, "找不到所属补丁"))?;
        let values = self.boundary.get(patch).ok_or_else(|| {
            AdvectionError::invalid_patch(
                face,
                n_patches,
                format!("面场只有 {} 个补丁", self.boundary.len()),
            )
        })?;
        let info = mesh.patch(patch);
        let local = face - info.start;
        if !info.kind.is_empty() && local >= values.len() {
            return Err(AdvectionError::invalid_patch(
                face,
                n_patches,
                format!("补丁 '{}' 面场长度 {} 小于 {}", info.name, values.len(), info.size),
            ));
        }
        Ok((patch, local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iso_mesh::generation::BlockMeshBuilder;

    #[test]
    fn test_random_access() {
        let mesh = BlockMeshBuilder::new(2, 1, 1).build().unwrap();
        let mut field = FaceField::from_fn(&mesh, |f| f as f64);
        assert!(field.check_layout(&mesh).is_ok());
        for f in 0..mesh.n_faces() {
            assert_eq!(field.face_value(&mesh, f).unwrap(), f as f64);
        }
        let last = mesh.n_faces() - 1;
        field.set_face_value(&mesh, last, -2.0).unwrap();
        assert_eq!(field.face_value(&mesh, last).unwrap(), -2.0);
    }

    #[test]
    fn test_empty_patch_reads_zero() {
        let mesh = BlockMeshBuilder::new(2, 2, 1).two_dimensional().build().unwrap();
        let zmin = mesh.find_patch("zmin").unwrap();
        let face = mesh.patch(zmin).start;
        let mut field = FaceField::from_fn(&mesh, |_| 1.0);
        assert!(field.patch(zmin).is_empty());
        assert_eq!(field.face_value(&mesh, face).unwrap(), 0.0);
        field.set_face_value(&mesh, face, 5.0).unwrap();
        assert_eq!(field.face_value(&mesh, face).unwrap(), 0.0);
    }

    #[test]
    fn test_invalid_face() {
        let mesh = BlockMeshBuilder::new(1, 1, 1).build().unwrap();
        let field = FaceField::zeros(&mesh);
        assert!(matches!(
            field.face_value(&mesh, mesh.n_faces() + 3),
            Err(AdvectionError::InvalidPatchGeometry { .. })
        ));
    }

    #[test]
    fn test_layout_mismatch() {
        let small = BlockMeshBuilder::new(1, 1, 1).build().unwrap();
        let large = BlockMeshBuilder::new(2, 1, 1).build().unwrap();
        let field = FaceField::zeros(&small);
        assert!(field.check_layout(&large).is_err());
        let boundary_face = large.n_faces() - 1;
        assert!(matches!(
            field.face_value(&large, boundary_face),
            Err(AdvectionError::InvalidPatchGeometry { .. })
        ));
    }
}
