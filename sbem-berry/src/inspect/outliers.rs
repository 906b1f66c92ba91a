//! 滑动窗口离群检测.
//!
//! 序列的 key (section 编号) 允许不连续: 窗口以 **序列位置** 为单位,
//! 一个 "N 点窗口" 总是 N 个实际观测点, 与编号差值无关.

use super::{InspectRecord, InspectSession};
use crate::consts::{CHANNEL_CX, CHANNEL_CY};
use crate::{SectionNum, TileId};
use num::{Float, FromPrimitive};
use std::collections::BTreeMap;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};
    }
}

/// 离群检测参数.
///
/// 阈值策略完全由调用方给定, 本模块不内置任何默认判断.
#[derive(Debug, Copy, Clone)]
pub struct OutlierParams {
    /// 窗口中当前点之前的观测个数上限.
    pub n_before: usize,

    /// 窗口中当前点之后的观测个数上限.
    pub n_after: usize,

    /// 标准差倍数阈值.
    pub thresh: f64,
}

/// 对按 key 升序的标量序列做滑动窗口离群检测, 返回被标记的 section 编号
/// (升序).
///
/// 每个位置的窗口取其前至多 `n_before` 个、后至多 `n_after` 个观测点,
/// 不含当前点, 在序列边界处截断 (首尾点只有单侧甚至空窗口).
/// 统计量是窗口的均值与总体标准差; 满足
/// `|value - mean| > thresh * std` 时标记.
///
/// 边界约定:
///
/// 1. 窗口为空的点 (如长度为 1 的序列) 不可评估, 永不标记;
/// 2. 窗口标准差恰为 0 时, 仅当该点值与窗口均值不同才标记;
///   特别地, 常数序列在任何阈值下都不产生标记.
pub fn find_outliers<T>(
    series: &BTreeMap<SectionNum, T>,
    n_before: usize,
    n_after: usize,
    thresh: T,
) -> Vec<SectionNum>
where
    T: Float + FromPrimitive,
{
    let keys: Vec<SectionNum> = series.keys().copied().collect();
    let vals: Vec<T> = series.values().copied().collect();
    let mut flagged = Vec::new();

    for i in 0..vals.len() {
        let lo = i.saturating_sub(n_before);
        let hi = usize::min(vals.len(), i.saturating_add(1).saturating_add(n_after));
        let window: Vec<T> = vals[lo..i]
            .iter()
            .chain(&vals[i + 1..hi])
            .copied()
            .collect();
        if window.is_empty() {
            continue;
        }

        let (mean, std) = mean_std(&window);
        let dev = (vals[i] - mean).abs();
        let hit = if std == T::zero() {
            dev > T::zero()
        } else {
            dev > thresh * std
        };
        if hit {
            flagged.push(keys[i]);
        }
    }
    flagged
}

/// 窗口均值与总体标准差.
fn mean_std<T: Float + FromPrimitive>(window: &[T]) -> (T, T) {
    // !window.is_empty()
    let n = T::from_usize(window.len()).unwrap();
    let mean = window.iter().fold(T::zero(), |acc, &v| acc + v) / n;
    let var = window
        .iter()
        .fold(T::zero(), |acc, &v| acc + (v - mean) * (v - mean))
        / n;
    (mean, var.sqrt())
}

impl InspectSession {
    /// 对单个 tile 做两通道 × 两分量的离群检测, 并把每个被标记的
    /// section 还原为完整记录.
    ///
    /// 邻居还原规则与通道对应: 水平通道取 trace 位置右侧一格,
    /// 垂直通道取该 tile 的正下方邻居. 同一 section 在多个通道/分量上
    /// 被标记时, 只保留扫描顺序中最后一条记录 (每 tile 每 section 至多
    /// 一条).
    pub fn detect_tile_outliers(
        &self,
        tile_id: TileId,
        params: OutlierParams,
    ) -> BTreeMap<SectionNum, InspectRecord> {
        let mut hits = BTreeMap::new();

        for channel in [CHANNEL_CX, CHANNEL_CY] {
            let Some(trace) = self.trace(tile_id, channel) else {
                continue;
            };

            for component in 0..2 {
                let series: BTreeMap<SectionNum, f64> = trace
                    .iter()
                    .map(|(&num, (vec, _))| (num, vec[component]))
                    .collect();

                for num in find_outliers(&series, params.n_before, params.n_after, params.thresh)
                {
                    let (_, pos) = trace[&num];
                    let map = self.tile_map(num);
                    let neighbor = if channel == CHANNEL_CY {
                        map.and_then(|m| m.vertical_neighbor(tile_id))
                    } else {
                        map.and_then(|m| m.paired_neighbor(pos, CHANNEL_CX))
                    };
                    hits.insert(
                        num,
                        InspectRecord {
                            section: num,
                            channel,
                            component,
                            row: pos.0,
                            col: pos.1,
                            tile_id: Some(tile_id),
                            neighbor,
                        },
                    );
                }
            }
        }
        hits
    }

    /// 串行地对所有 tile 做离群检测. 记录按 tile 编号、section 编号排列.
    pub fn detect_all_outliers(&self, params: OutlierParams) -> Vec<InspectRecord> {
        self.tile_ids_union()
            .into_iter()
            .flat_map(|tid| self.detect_tile_outliers(tid, params).into_values())
            .collect()
    }
}

/// 并发操作部分.
#[cfg(feature = "rayon")]
impl InspectSession {
    /// 借助 `rayon`, 并行地对所有 tile 做离群检测.
    ///
    /// 逐 tile 的检测彼此完全独立, 只共享对会话缓存的只读访问;
    /// 结果收集后由调用方单线程写出, 与串行版本产生同样的记录顺序.
    pub fn par_detect_all_outliers(&self, params: OutlierParams) -> Vec<InspectRecord> {
        let ids: Vec<TileId> = self.tile_ids_union().into_iter().collect();
        ids.into_par_iter()
            .map(|tid| {
                self.detect_tile_outliers(tid, params)
                    .into_values()
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{find_outliers, OutlierParams};
    use crate::consts::{CHANNEL_CX, CHANNEL_CY};
    use crate::data::{CoarseOffsetTensor, TileIdMap};
    use crate::inspect::InspectSession;
    use ndarray::{array, Array4};
    use std::collections::BTreeMap;

    fn series(pairs: &[(u32, f64)]) -> BTreeMap<u32, f64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_single_jump_flagged() {
        let s = series(&[(1, 0.0), (2, 0.0), (3, 0.0), (4, 0.0), (5, 10.0)]);
        assert_eq!(find_outliers(&s, 2, 0, 2.0), vec![5]);
    }

    /// 常数序列: 窗口标准差为 0 且偏差为 0, 任何阈值下都不标记.
    #[test]
    fn test_constant_series_never_flags() {
        let s = series(&[(1, 3.0), (2, 3.0), (3, 3.0), (4, 3.0), (5, 3.0)]);
        assert!(find_outliers(&s, 2, 2, 0.0).is_empty());
        assert!(find_outliers(&s, 2, 2, 100.0).is_empty());
    }

    /// 零标准差窗口 + 非零偏差: 无论阈值多大都标记 (文档化的边界约定).
    #[test]
    fn test_zero_std_with_deviation_flags() {
        let s = series(&[(1, 5.0), (2, 5.0), (3, 5.0), (4, 5.1)]);
        assert_eq!(find_outliers(&s, 3, 0, 1000.0), vec![4]);
    }

    /// 长度为 1 的序列没有邻居可比, 不可评估.
    #[test]
    fn test_singleton_not_evaluable() {
        let s = series(&[(7, 123.0)]);
        assert!(find_outliers(&s, 9, 9, 0.1).is_empty());
    }

    /// 编号不连续时窗口按序列位置取点, 与编号差值无关.
    #[test]
    fn test_gaps_windowed_by_position() {
        let s = series(&[(10, 1.0), (20, 1.0), (35, 1.0), (90, 25.0)]);
        assert_eq!(find_outliers(&s, 2, 0, 3.0), vec![90]);
    }

    /// 双侧窗口: 异常点也会污染邻居的窗口, 但不应让正常点被标记.
    #[test]
    fn test_two_sided_window() {
        let s = series(&[
            (1, 0.0),
            (2, 0.1),
            (3, -0.1),
            (4, 12.0),
            (5, 0.0),
            (6, 0.1),
        ]);
        assert_eq!(find_outliers(&s, 2, 2, 3.0), vec![4]);
    }

    fn session_with_jump() -> InspectSession {
        // tile 7 固定在 (0, 0); cx 的 x 分量在 s5 突跳.
        let mut offsets = BTreeMap::new();
        for num in 1..=5u32 {
            let mut t = Array4::<f64>::zeros((2, 2, 1, 2));
            t[(CHANNEL_CX, 0, 0, 0)] = if num == 5 { 40.0 } else { 2.0 };
            t[(CHANNEL_CX, 1, 0, 0)] = -3.0;
            offsets.insert(num, CoarseOffsetTensor::new(t));
        }
        let maps: BTreeMap<_, _> = (1..=5u32)
            .map(|num| (num, TileIdMap::new(array![[7, 8]])))
            .collect();
        InspectSession::from_parts(offsets, maps)
    }

    #[test]
    fn test_detect_tile_outliers() {
        let session = session_with_jump();
        let params = OutlierParams {
            n_before: 3,
            n_after: 0,
            thresh: 2.0,
        };

        let hits = session.detect_tile_outliers(7, params);
        assert_eq!(hits.len(), 1);
        let r = &hits[&5];
        assert_eq!((r.channel, r.component), (CHANNEL_CX, 0));
        assert_eq!((r.row, r.col), (0, 0));
        assert_eq!(r.tile_id, Some(7));
        // 水平通道: 邻居是右侧的 tile 8.
        assert_eq!(r.neighbor, Some(8));

        // 没有异常的 tile 8 (它自己的 cx 全为 0): 无记录.
        assert!(session.detect_tile_outliers(8, params).is_empty());
    }

    #[test]
    fn test_detect_all_matches_serial_order() {
        let session = session_with_jump();
        let params = OutlierParams {
            n_before: 3,
            n_after: 0,
            thresh: 2.0,
        };

        let serial = session.detect_all_outliers(params);
        assert_eq!(serial.len(), 1);
        assert_eq!(serial[0].section, 5);

        #[cfg(feature = "rayon")]
        assert_eq!(session.par_detect_all_outliers(params), serial);
    }

    /// 垂直通道的邻居用正下方规则还原.
    #[test]
    fn test_vertical_neighbor_resolution() {
        let mut offsets = BTreeMap::new();
        for num in 1..=4u32 {
            let mut t = Array4::<f64>::zeros((2, 2, 2, 1));
            t[(CHANNEL_CY, 1, 0, 0)] = if num == 4 { -30.0 } else { 1.0 };
            offsets.insert(num, CoarseOffsetTensor::new(t));
        }
        let maps: BTreeMap<_, _> = (1..=4u32)
            .map(|num| (num, TileIdMap::new(array![[3], [9]])))
            .collect();
        let session = InspectSession::from_parts(offsets, maps);

        let hits = session.detect_tile_outliers(
            3,
            OutlierParams {
                n_before: 2,
                n_after: 0,
                thresh: 2.0,
            },
        );
        let r = &hits[&4];
        assert_eq!(r.channel, CHANNEL_CY);
        assert_eq!(r.neighbor, Some(9));
    }
}
