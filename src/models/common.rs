use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

/// 到達判定の下限距離。これ以下の残距離は到達とみなす
pub const ARRIVAL_EPSILON: f64 = 1e-9;

/// 2次元位置（またはベクトル）を表す構造体
///
/// 値型であり、演算はすべて新しいインスタンスを返します。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64, // m
    pub y: f64, // m
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// ベクトルの長さ
    pub fn norm(&self) -> f64 {
        (self.x.powi(2) + self.y.powi(2)).sqrt()
    }

    /// 単位ベクトル化（ゼロベクトルはゼロベクトルのまま）
    pub fn normalized(&self) -> Self {
        let n = self.norm();
        if n <= ARRIVAL_EPSILON {
            Self::ZERO
        } else {
            Self::new(self.x / n, self.y / n)
        }
    }

    /// 2点間の距離
    pub fn distance(&self, other: &Vec2) -> f64 {
        (*other - *self).norm()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Vec2 {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self::new(self.x + other.x, self.y + other.y)
    }
}

impl Sub for Vec2 {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        Self::new(self.x - other.x, self.y - other.y)
    }
}

impl Mul<f64> for Vec2 {
    type Output = Self;

    fn mul(self, scalar: f64) -> Self::Output {
        Self::new(self.x * scalar, self.y * scalar)
    }
}

impl std::fmt::Display for Vec2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2})", self.x, self.y)
    }
}

/// シミュレーション領域の境界 (xmin, xmax, ymin, ymax)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

impl Bounds {
    pub fn new(xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Self {
        Self { xmin, xmax, ymin, ymax }
    }

    /// 位置を境界内にクランプ
    pub fn clamp(&self, p: Vec2) -> Vec2 {
        Vec2::new(
            math_utils::clamp(p.x, self.xmin, self.xmax),
            math_utils::clamp(p.y, self.ymin, self.ymax),
        )
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.xmin && p.x <= self.xmax && p.y >= self.ymin && p.y <= self.ymax
    }
}

/// 数学ユーティリティ関数
pub mod math_utils {
    use super::{ARRIVAL_EPSILON, Vec2};

    /// 値を [lo, hi] に制限
    pub fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
        v.min(hi).max(lo)
    }

    /// 直線ステッパー
    ///
    /// 目標点まで最大 `max_step` だけ進みます。残距離が `max_step` 以下なら
    /// 目標点へスナップし、到達フラグを立てて返します。
    ///
    /// # 戻り値
    ///
    /// (新しい位置, 到達したか)
    pub fn move_towards(pos: Vec2, target: Vec2, max_step: f64) -> (Vec2, bool) {
        let delta = target - pos;
        let dist = delta.norm();
        if dist <= max_step || dist <= ARRIVAL_EPSILON {
            return (target, true);
        }
        (pos + delta.normalized() * max_step, false)
    }

    /// 円周上の分割点を計算
    ///
    /// `index` 番目（`segments` 分割）の角度 2π·(index mod N)/N の点を返します。
    pub fn orbit_point(center: Vec2, radius: f64, index: usize, segments: usize) -> Vec2 {
        let n = segments.max(1);
        let angle = 2.0 * std::f64::consts::PI * (index % n) as f64 / n as f64;
        Vec2::new(center.x + radius * angle.cos(), center.y + radius * angle.sin())
    }
}

#[cfg(test)]
mod tests {
    use super::math_utils::*;
    use super::*;

    #[test]
    fn test_normalized_zero_vector() {
        assert_eq!(Vec2::ZERO.normalized(), Vec2::ZERO);
        let n = Vec2::new(3.0, 4.0).normalized();
        assert!((n.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_move_towards_snaps_on_arrival() {
        let (p, arrived) = move_towards(Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), 2.0);
        assert!(arrived);
        assert_eq!(p, Vec2::new(1.0, 0.0));

        let (p, arrived) = move_towards(Vec2::new(0.0, 0.0), Vec2::new(10.0, 0.0), 2.0);
        assert!(!arrived);
        assert!((p.x - 2.0).abs() < 1e-12);
        assert_eq!(p.y, 0.0);
    }

    #[test]
    fn test_bounds_clamp() {
        let b = Bounds::new(0.0, 100.0, 0.0, 50.0);
        assert_eq!(b.clamp(Vec2::new(-5.0, 70.0)), Vec2::new(0.0, 50.0));
        assert_eq!(b.clamp(Vec2::new(10.0, 10.0)), Vec2::new(10.0, 10.0));
        assert!(b.contains(Vec2::new(100.0, 50.0)));
        assert!(!b.contains(Vec2::new(100.1, 10.0)));
        assert!(!b.contains(Vec2::new(f64::NAN, 10.0)));
    }

    #[test]
    fn test_orbit_point_quadrants() {
        let c = Vec2::new(10.0, 10.0);
        let p0 = orbit_point(c, 5.0, 0, 4);
        let p1 = orbit_point(c, 5.0, 1, 4);
        assert!((p0.x - 15.0).abs() < 1e-9 && (p0.y - 10.0).abs() < 1e-9);
        assert!((p1.x - 10.0).abs() < 1e-9 && (p1.y - 15.0).abs() < 1e-9);
        assert_eq!(orbit_point(c, 5.0, 4, 4), p0);
    }
}
