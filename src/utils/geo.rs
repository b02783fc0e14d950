//! 平面近似距离计算
//!
//! 只适用于几百米量级的短距离：一度纬度固定按 111,320 米计算，
//! 一度经度按 `111,320 * |cos(第一个点的纬度)|` 米计算，
//! 然后取两个方向位移的欧氏长度。这不是大地测量公式。
//!
//! 输入中含有 NaN 或无穷大时结果同样是 NaN（或无穷大），
//! 这里不做任何修正，由调用方在边界处校验坐标。

use crate::common::Location;

/// 一度纬度对应的米数
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// 计算两点间的距离（米）
pub fn distance(loc1: &Location, loc2: &Location) -> f64 {
    let lat_to_meters = METERS_PER_DEGREE;
    // 经度随纬度收缩，参考纬度取第一个点
    let lon_to_meters = METERS_PER_DEGREE * loc1.latitude.to_radians().cos().abs();

    let lat_diff = (loc1.latitude - loc2.latitude) * lat_to_meters;
    let lon_diff = (loc1.longitude - loc2.longitude) * lon_to_meters;

    lat_diff.hypot(lon_diff)
}
