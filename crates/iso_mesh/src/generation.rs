// crates/iso_mesh/src/generation.rs

//! 网格生成模块
//!
//! 提供简单的网格生成工具，用于测试和验证：
//!
//! - [`BlockMeshBuilder`]: 长方体结构化六面体网格，可指定各侧面补丁类型
//!   （包括处理器补丁，便于构造分区网格）
//! - [`single_cell_mesh`]: 由点和面构造单个多面体单元，面朝向自动修正
//! - [`unit_cube`]、[`tetrahedron`]、[`triangular_prism`]: 常用单元
//!
//! # 使用示例
//!
//! ```rust
//! use iso_mesh::generation::BlockMeshBuilder;
//!
//! let mesh = BlockMeshBuilder::new(4, 4, 1).build().unwrap();
//! assert_eq!(mesh.n_cells(), 16);
//! assert_eq!(mesh.n_internal_faces(), 24);
//! ```

use glam::DVec3;

use crate::error::{MeshError, MeshResult};
use crate::geometry::polygon_centre_and_area;
use crate::poly_mesh::{BoundaryPatch, PatchKind, PolyMesh};

/// 长方体的六个侧面
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockSide {
    /// x 最小侧
    XMin,
    /// x 最大侧
    XMax,
    /// y 最小侧
    YMin,
    /// y 最大侧
    YMax,
    /// z 最小侧
    ZMin,
    /// z 最大侧
    ZMax,
}

impl BlockSide {
    /// 全部侧面（补丁顺序）
    pub const ALL: [BlockSide; 6] = [
        Self::XMin,
        Self::XMax,
        Self::YMin,
        Self::YMax,
        Self::ZMin,
        Self::ZMax,
    ];

    fn default_name(self) -> &'static str {
        match self {
            Self::XMin => "xmin",
            Self::XMax => "xmax",
            Self::YMin => "ymin",
            Self::YMax => "ymax",
            Self::ZMin => "zmin",
            Self::ZMax => "zmax",
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::XMin => 0,
            Self::XMax => 1,
            Self::YMin => 2,
            Self::YMax => 3,
            Self::ZMin => 4,
            Self::ZMax => 5,
        }
    }
}

/// 长方体结构化网格生成器
///
/// 点、单元均按 x 最快、z 最慢的顺序编号；内部面按单元顺序生成，满足
/// owner < neighbour 的上三角排列。边界面按 xmin, xmax, ymin, ymax, zmin,
/// zmax 的顺序分成六个补丁，相对两侧的面在补丁内按相同顺序排列。
#[derive(Debug, Clone)]
pub struct BlockMeshBuilder {
    nx: usize,
    ny: usize,
    nz: usize,
    min: DVec3,
    max: DVec3,
    sides: [(String, PatchKind); 6],
}

impl BlockMeshBuilder {
    /// 创建单位立方体上的 `nx × ny × nz` 网格生成器，侧面默认为固壁
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        let sides = BlockSide::ALL.map(|s| (s.default_name().to_string(), PatchKind::Wall));
        Self {
            nx,
            ny,
            nz,
            min: DVec3::ZERO,
            max: DVec3::ONE,
            sides,
        }
    }

    /// 设置计算域范围
    pub fn with_bounds(mut self, min: DVec3, max: DVec3) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// 设置侧面补丁类型
    pub fn with_side(mut self, side: BlockSide, kind: PatchKind) -> Self {
        self.sides[side.slot()].1 = kind;
        self
    }

    /// 设置侧面补丁名称和类型
    pub fn with_named_side(mut self, side: BlockSide, name: impl Into<String>, kind: PatchKind) -> Self {
        self.sides[side.slot()] = (name.into(), kind);
        self
    }

    /// 二维计算：z 两侧设为空补丁
    pub fn two_dimensional(self) -> Self {
        self.with_side(BlockSide::ZMin, PatchKind::Empty)
            .with_side(BlockSide::ZMax, PatchKind::Empty)
    }

    fn point_id(&self, i: usize, j: usize, k: usize) -> usize {
        i + (self.nx + 1) * (j + (self.ny + 1) * k)
    }

    fn cell_id(&self, i: usize, j: usize, k: usize) -> usize {
        i + self.nx * (j + self.ny * k)
    }

    /// 构建网格
    pub fn build(&self) -> MeshResult<PolyMesh> {
        let (nx, ny, nz) = (self.nx, self.ny, self.nz);
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(MeshError::topology(
                "BlockMeshBuilder::build",
                format!("单元数必须为正: {nx}×{ny}×{nz}"),
            ));
        }
        let span = self.max - self.min;
        if span.min_element() <= 0.0 {
            return Err(MeshError::topology(
                "BlockMeshBuilder::build",
                format!("计算域范围无效: {:?} .. {:?}", self.min, self.max),
            ));
        }
        let d = span / DVec3::new(nx as f64, ny as f64, nz as f64);

        let mut points = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
        for k in 0..=nz {
            for j in 0..=ny {
                for i in 0..=nx {
                    points.push(self.min + d * DVec3::new(i as f64, j as f64, k as f64));
                }
            }
        }

        let p = |i, j, k| self.point_id(i, j, k);
        let x_face = |i, j, k| vec![p(i, j, k), p(i, j + 1, k), p(i, j + 1, k + 1), p(i, j, k + 1)];
        let y_face = |i, j, k| vec![p(i, j, k), p(i, j, k + 1), p(i + 1, j, k + 1), p(i + 1, j, k)];
        let z_face = |i, j, k| vec![p(i, j, k), p(i + 1, j, k), p(i + 1, j + 1, k), p(i, j + 1, k)];
        let reversed = |mut f: Vec<usize>| {
            f.reverse();
            f
        };

        let mut faces = Vec::new();
        let mut owner = Vec::new();
        let mut neighbour = Vec::new();

        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let c = self.cell_id(i, j, k);
                    if i + 1 < nx {
                        faces.push(x_face(i + 1, j, k));
                        owner.push(c);
                        neighbour.push(self.cell_id(i + 1, j, k));
                    }
                    if j + 1 < ny {
                        faces.push(y_face(i, j + 1, k));
                        owner.push(c);
                        neighbour.push(self.cell_id(i, j + 1, k));
                    }
                    if k + 1 < nz {
                        faces.push(z_face(i, j, k + 1));
                        owner.push(c);
                        neighbour.push(self.cell_id(i, j, k + 1));
                    }
                }
            }
        }

        let mut patches = Vec::with_capacity(6);
        for side in BlockSide::ALL {
            let start = faces.len();
            match side {
                BlockSide::XMin | BlockSide::XMax => {
                    let (i_pt, i_cell, flip) = match side {
                        BlockSide::XMin => (0, 0, true),
                        _ => (nx, nx - 1, false),
                    };
                    for k in 0..nz {
                        for j in 0..ny {
                            let f = x_face(i_pt, j, k);
                            faces.push(if flip { reversed(f) } else { f });
                            owner.push(self.cell_id(i_cell, j, k));
                        }
                    }
                }
                BlockSide::YMin | BlockSide::YMax => {
                    let (j_pt, j_cell, flip) = match side {
                        BlockSide::YMin => (0, 0, true),
                        _ => (ny, ny - 1, false),
                    };
                    for k in 0..nz {
                        for i in 0..nx {
                            let f = y_face(i, j_pt, k);
                            faces.push(if flip { reversed(f) } else { f });
                            owner.push(self.cell_id(i, j_cell, k));
                        }
                    }
                }
                BlockSide::ZMin | BlockSide::ZMax => {
                    let (k_pt, k_cell, flip) = match side {
                        BlockSide::ZMin => (0, 0, true),
                        _ => (nz, nz - 1, false),
                    };
                    for j in 0..ny {
                        for i in 0..nx {
                            let f = z_face(i, j, k_pt);
                            faces.push(if flip { reversed(f) } else { f });
                            owner.push(self.cell_id(i, j, k_cell));
                        }
                    }
                }
            }
            let (name, kind) = &self.sides[side.slot()];
            patches.push(BoundaryPatch::new(name.clone(), *kind, start, faces.len() - start));
        }

        PolyMesh::new(points, faces, owner, neighbour, patches)
    }
}

/// 由点和面构造单单元网格
///
/// 面顶点顺序可任意，朝向按面形心相对点均值的位置修正为向外。
/// 所有面归入名为 `walls` 的固壁补丁。要求单元为凸多面体。
pub fn single_cell_mesh(points: Vec<DVec3>, mut faces: Vec<Vec<usize>>) -> MeshResult<PolyMesh> {
    if points.is_empty() {
        return Err(MeshError::topology("single_cell_mesh", "点列表为空"));
    }
    let centre = points.iter().copied().sum::<DVec3>() / points.len() as f64;
    for face in &mut faces {
        for &p in face.iter() {
            MeshError::check_index("point", p, points.len())?;
        }
        let pts: Vec<DVec3> = face.iter().map(|&p| points[p]).collect();
        let (c, s) = polygon_centre_and_area(&pts);
        if s.dot(c - centre) < 0.0 {
            face.reverse();
        }
    }
    let n_faces = faces.len();
    PolyMesh::new(
        points,
        faces,
        vec![0; n_faces],
        Vec::new(),
        vec![BoundaryPatch::new("walls", PatchKind::Wall, 0, n_faces)],
    )
}

/// 单位立方体单元
pub fn unit_cube() -> MeshResult<PolyMesh> {
    BlockMeshBuilder::new(1, 1, 1).build()
}

/// 四面体单元
pub fn tetrahedron(a: DVec3, b: DVec3, c: DVec3, d: DVec3) -> MeshResult<PolyMesh> {
    single_cell_mesh(
        vec![a, b, c, d],
        vec![vec![0, 2, 1], vec![0, 1, 3], vec![1, 2, 3], vec![0, 3, 2]],
    )
}

/// 三棱柱单元：底面三角形 `base` 沿 `extrusion` 平移
pub fn triangular_prism(base: [DVec3; 3], extrusion: DVec3) -> MeshResult<PolyMesh> {
    let points = vec![
        base[0],
        base[1],
        base[2],
        base[0] + extrusion,
        base[1] + extrusion,
        base[2] + extrusion,
    ];
    single_cell_mesh(
        points,
        vec![
            vec![0, 2, 1],
            vec![3, 4, 5],
            vec![0, 1, 4, 3],
            vec![1, 2, 5, 4],
            vec![2, 0, 3, 5],
        ],
    )
}

/// 一般六面体单元，顶点顺序为底面 `0..4` 与顶面 `4..8`
pub fn hexahedron(points: [DVec3; 8]) -> MeshResult<PolyMesh> {
    single_cell_mesh(
        points.to_vec(),
        vec![
            vec![0, 3, 2, 1],
            vec![4, 5, 6, 7],
            vec![0, 1, 5, 4],
            vec![1, 2, 6, 5],
            vec![2, 3, 7, 6],
            vec![3, 0, 4, 7],
        ],
    )
}
