// crates/iso_mesh/tests/undoable_cutter.rs

//! 可撤销切分集成测试
//!
//! 验证切分、查询、撤销的完整流程以及撤销后网格几何的还原。

use glam::DVec3;
use iso_mesh::generation::BlockMeshBuilder;
use iso_mesh::topo::{CellCut, UndoableMeshCutter};
use iso_mesh::{MeshError, PolyMesh};

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-12
}

fn assert_same_geometry(a: &PolyMesh, b: &PolyMesh) {
    assert_eq!(a.n_cells(), b.n_cells());
    assert_eq!(a.n_faces(), b.n_faces());
    assert_eq!(a.n_points(), b.n_points());
    for c in 0..a.n_cells() {
        assert!(approx_eq(a.cell_volume(c), b.cell_volume(c)), "单元 {c} 体积不同");
        assert!((a.cell_centre(c) - b.cell_centre(c)).length() < 1e-12);
    }
}

#[test]
fn test_split_query_and_undo() {
    let mesh = BlockMeshBuilder::new(3, 2, 1).build().unwrap();
    let c = 4;
    let centre = mesh.cell_centre(c);
    let mut cutter = UndoableMeshCutter::default();

    let split = cutter
        .set_refinement(&mesh, &[CellCut::new(c, centre + DVec3::new(0.05, 0.0, 0.0), DVec3::X)])
        .unwrap();
    let d = mesh.n_cells();
    assert_eq!(split.mesh.n_cells(), d + 1);

    let added = cutter.get_added_cells().unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(added.get(&c), Some(&d));

    let faces = cutter.get_split_faces(&split.mesh).unwrap();
    assert_eq!(faces.len(), 1);
    assert_eq!(split.mesh.face_owner(faces[0]), c);
    assert_eq!(split.mesh.face_neighbour(faces[0]), Some(d));

    let merged = cutter.remove_split_faces(&split.mesh, &faces).unwrap();
    assert!(cutter.get_added_cells().unwrap().is_empty());
    assert!(cutter.tree().live_cells().next().is_none());
    assert_eq!(merged.map.reverse_cell_map[c], Some(c));
    assert_eq!(merged.map.reverse_cell_map[d], None);
    assert_same_geometry(&merged.mesh, &mesh);
}

#[test]
fn test_nested_refinement_undo_in_order() {
    let mesh = BlockMeshBuilder::new(1, 1, 1).build().unwrap();
    let mut cutter = UndoableMeshCutter::default();

    let first = cutter
        .set_refinement(&mesh, &[CellCut::new(0, DVec3::new(0.5, 0.5, 0.5), DVec3::X)])
        .unwrap();
    let second = cutter
        .set_refinement(&first.mesh, &[CellCut::new(1, DVec3::new(0.75, 0.5, 0.4), DVec3::Z)])
        .unwrap();
    assert_eq!(second.mesh.n_cells(), 3);
    assert!(approx_eq(second.mesh.total_volume(), 1.0));

    // 只有最新一级切分可以撤销
    let added = cutter.get_added_cells().unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(added.get(&1), Some(&2));
    let outer = second.mesh.shared_face(0, 1).unwrap();
    assert!(matches!(
        cutter.remove_split_faces(&second.mesh, &[outer]),
        Err(MeshError::SplitTree { .. })
    ));

    let faces = cutter.get_split_faces(&second.mesh).unwrap();
    let undone = cutter.remove_split_faces(&second.mesh, &faces).unwrap();
    assert_same_geometry(&undone.mesh, &first.mesh);
    assert_eq!(cutter.get_added_cells().unwrap().get(&0), Some(&1));

    let faces = cutter.get_split_faces(&undone.mesh).unwrap();
    let restored = cutter.remove_split_faces(&undone.mesh, &faces).unwrap();
    assert_same_geometry(&restored.mesh, &mesh);
    assert!(cutter.tree().is_empty());
}

#[test]
fn test_multiple_cells_split_and_merged_together() {
    let mesh = BlockMeshBuilder::new(2, 2, 2).build().unwrap();
    let mut cutter = UndoableMeshCutter::default();
    // 单元 0 与 3 共享一条竖直边, 切分高度需错开
    let cuts: Vec<CellCut> = [(0, 0.1), (3, -0.1), (6, 0.05)]
        .iter()
        .map(|&(c, dz)| CellCut::new(c, mesh.cell_centre(c) + DVec3::new(0.0, 0.0, dz), DVec3::Z))
        .collect();
    let split = cutter.set_refinement(&mesh, &cuts).unwrap();
    assert_eq!(split.mesh.n_cells(), 11);
    assert!(approx_eq(split.mesh.total_volume(), 1.0));
    assert_eq!(cutter.get_added_cells().unwrap().len(), 3);

    let faces = cutter.get_split_faces(&split.mesh).unwrap();
    let merged = cutter.remove_split_faces(&split.mesh, &faces).unwrap();
    assert_same_geometry(&merged.mesh, &mesh);
    assert!(cutter.tree().is_empty());
}
