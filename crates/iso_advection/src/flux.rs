// crates/iso_advection/src/flux.rs

//! 时间积分面通量
//!
//! 假设界面在一个时间步内以法向速度 `Un0` 平移，先由顶点到初始界面的
//! 有向距离求出界面到达各顶点的时刻:
//!
//! ```text
//! t_p = (x_p - x0)·n0 / Un0
//! ```
//!
//! 相邻两个到达时刻之间，湿子面面积是时间的二次函数（扫过的四边形），
//! 逐段解析积分得到 `∫_0^dt A_wet(t) dt`，再乘以 `phi / |S|` 得到该步
//! 通过面的液相体积。
//!
//! 到达时刻沿面边界改变方向超过两次（非平面面或非凸面）时，以面中心为
//! 顶点把面分成三角形分别积分。

use glam::DVec3;
use iso_foundation::tolerance::{pos0, sign0};
use iso_foundation::{SMALL, VSMALL};
use smallvec::SmallVec;

use crate::cutting::{cut_face, cut_points};
use crate::error::AdvectionResult;

/// 法向速度低于该值时界面视为静止
const STATIONARY_SPEED: f64 = 1e-12;

/// 单元内的初始界面
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsoFace {
    /// 界面中心 x0
    pub centre: DVec3,
    /// 单位法向 n0（指向液相外）
    pub normal: DVec3,
    /// 法向速度 Un0 = U(x0)·n0
    pub normal_speed: f64,
}

/// 两条界面线段之间扫过的四边形面积系数
///
/// 面积随归一化时间 `s ∈ [0, 1]` 的变化为 `A(s) = alpha s² + beta s`。
/// 只用每组的前两个点；一组只有一个点时退化为三角形。
pub fn quad_area_coeffs(pf0: &[DVec3], pf1: &[DVec3]) -> (f64, f64) {
    let (Some(&a), Some(&c)) = (pf0.first(), pf1.first()) else {
        log::warn!("界面线段为空: {} / {} 个点", pf0.len(), pf1.len());
        return (0.0, 0.0);
    };
    let b = pf0.get(1).copied().unwrap_or(a);
    let mut c = c;
    let mut d = pf1.get(1).copied().unwrap_or(c);
    if pf0.len() > 2 || pf1.len() > 2 {
        log::debug!("界面经过面顶点: {} / {} 个交点", pf0.len(), pf1.len());
    }

    // 保证 AB 与 CD 反向，ABCD 构成四边形
    if (b - a).dot(d - c) > 0.0 {
        std::mem::swap(&mut c, &mut d);
    }

    // 局部坐标: A = (0,0), B = (bx,0)
    let bx = (b - a).length();
    let xhat = if bx > 10.0 * SMALL {
        (b - a) / bx
    } else if (c - d).length() > 10.0 * SMALL {
        (c - d).normalize()
    } else {
        return (0.0, 0.0);
    };

    let mut yhat = d - a;
    yhat -= yhat.dot(xhat) * xhat;
    let len = yhat.length();
    if len <= 10.0 * SMALL {
        return (0.0, 0.0);
    }
    yhat /= len;

    let cx = (c - a).dot(xhat);
    let cy = (c - a).dot(yhat).abs();
    let dx = (d - a).dot(xhat);
    let dy = (d - a).dot(yhat).abs();

    let alpha = 0.5 * ((cx - bx) * dy - dx * cy);
    let beta = 0.5 * bx * (dy + cy);
    (alpha, beta)
}

/// 一个面在 `[0, dt]` 内湿子面面积的时间积分
///
/// `times` 为界面到达各顶点的时刻。`un0 >= 0` 时界面朝液相外推进（面逐渐
/// 被淹没），否则面逐渐变干。
pub fn time_integrated_area(
    points: &[DVec3],
    times: &[f64],
    dt: f64,
    mag_sf: f64,
    un0: f64,
) -> AdvectionResult<f64> {
    let mut order: SmallVec<[usize; 8]> = (0..times.len()).collect();
    order.sort_by(|&a, &b| times[a].total_cmp(&times[b]));
    let (Some(&first), Some(&last)) = (order.first(), order.last()) else {
        return Ok(0.0);
    };
    let first_time = times[first];
    let last_time = times[last];

    // 界面在步前已经扫过整个面
    if last_time <= 0.0 {
        return Ok(mag_sf * dt * pos0(un0));
    }
    // 本步内界面到不了这个面
    if first_time >= dt {
        return Ok(mag_sf * dt * (1.0 - pos0(un0)));
    }

    let direction = sign0(un0);
    let mut t_int = 0.0;
    let mut time;
    let mut area;
    let mut line: SmallVec<[DVec3; 8]>;

    if first_time > 0.0 {
        // [0, first_time] 内面未被切割
        time = first_time;
        area = mag_sf * (1.0 - pos0(un0));
        t_int = area * time;
        line = cut_points(points, times, time);
    } else {
        time = 0.0;
        let signed: SmallVec<[f64; 8]> = times.iter().map(|&t| -direction * t).collect();
        let cut = cut_face(points, &signed, 0.0)?;
        area = cut.sub_face_mag_area();
        line = cut.interface_points.iter().copied().collect();
    }

    let t_small = (1e-6 * dt).max(10.0 * SMALL);
    let mut prev = time;
    let mut sorted_times: SmallVec<[f64; 8]> = SmallVec::new();
    for &i in &order {
        let t = times[i];
        if t > prev + t_small && t <= dt {
            sorted_times.push(t);
            prev = t;
        }
    }

    for &new_time in &sorted_times {
        let new_line = cut_points(points, times, new_time);
        let (alpha, beta) = quad_area_coeffs(&line, &new_line);
        t_int += (new_time - time) * (area + direction * (alpha / 3.0 + 0.5 * beta));
        area += direction * (alpha + beta);
        line = new_line;
        time = new_time;
    }

    if last_time > dt {
        let new_line = cut_points(points, times, dt);
        let (alpha, beta) = quad_area_coeffs(&line, &new_line);
        t_int += (dt - time) * (area + direction * (alpha / 3.0 + 0.5 * beta));
    } else {
        // last_time 之后面全湿或全干
        t_int += mag_sf * (dt - last_time) * pos0(un0);
    }

    Ok(t_int)
}

/// 到达时刻沿面边界改变方向的次数
fn direction_shifts(times: &[f64]) -> usize {
    let n = times.len();
    (0..n)
        .filter(|&i| {
            let old = sign0(times[(i + 1) % n] - times[i]);
            let new = sign0(times[(i + 2) % n] - times[(i + 1) % n]);
            old != new
        })
        .count()
}

/// 一个时间步内通过面的液相体积
///
/// `face_centre` 只在面被分成三角形时使用。界面静止时按初始湿子面比例
/// 计算。
pub fn time_integrated_face_flux(
    points: &[DVec3],
    face_centre: DVec3,
    iso: &IsoFace,
    dt: f64,
    phi: f64,
    mag_sf: f64,
) -> AdvectionResult<f64> {
    if mag_sf < VSMALL {
        return Ok(0.0);
    }
    let un0 = iso.normal_speed;

    if un0.abs() <= STATIONARY_SPEED {
        // 湿区为界面后方 (x0 - x)·n0 > 0
        let values: SmallVec<[f64; 8]> = points.iter().map(|&p| (iso.centre - p).dot(iso.normal)).collect();
        let cut = cut_face(points, &values, 0.0)?;
        return Ok(phi * dt * cut.sub_face_mag_area() / mag_sf);
    }

    let arrival = |p: DVec3| (p - iso.centre).dot(iso.normal) / un0;
    let times: SmallVec<[f64; 8]> = points.iter().map(|&p| arrival(p)).collect();

    if direction_shifts(&times) <= 2 {
        return Ok(phi / mag_sf * time_integrated_area(points, &times, dt, mag_sf, un0)?);
    }

    let n = points.len();
    let centre_time = arrival(face_centre);
    let mut dvf = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        let tri = [face_centre, points[i], points[j]];
        let tri_times = [centre_time, times[i], times[j]];
        let mag_tri = 0.5 * (tri[2] - tri[0]).cross(tri[1] - tri[0]).length();
        if mag_tri < VSMALL {
            continue;
        }
        // phi_tri / mag_tri = phi / mag_sf
        dvf += phi / mag_sf * time_integrated_area(&tri, &tri_times, dt, mag_tri, un0)?;
    }
    Ok(dvf)
}
