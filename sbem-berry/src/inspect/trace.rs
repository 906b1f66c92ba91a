//! trace 提取: 单个 tile 的 shift 向量跨 section 时间序列.

use super::InspectSession;
use crate::{Idx2d, SectionNum, TileId};
use std::collections::BTreeMap;

/// 一条 trace: 按 section 编号升序, 每项是该 section 中此 tile 的
/// shift 向量 `[x, y]` 及其所在网格位置 (邻居还原时需要).
pub type Trace = BTreeMap<SectionNum, ([f64; 2], Idx2d)>;

impl InspectSession {
    /// 提取 `tile_id` 在通道 `channel` 上的 trace.
    ///
    /// 逐 section 定位该 tile. tile 不在某个 section 中属于正常现象
    /// (网格边缘的 tile 会随采集进程出现/消失), 直接跳过;
    /// 该 section 缺少张量、或网格与张量形状不一致导致越界时同样跳过.
    /// 没有任何 section 含该 tile 时返回 `None`.
    pub fn trace(&self, tile_id: TileId, channel: usize) -> Option<Trace> {
        let mut trace = Trace::new();
        for (&num, map) in self.tile_maps() {
            let Some(pos) = map.locate(tile_id) else {
                continue;
            };
            let Some(tensor) = self.tensor(num) else {
                continue;
            };
            let Some(vec) = tensor.vec_at(channel, pos) else {
                continue;
            };
            trace.insert(num, (vec, pos));
        }
        (!trace.is_empty()).then_some(trace)
    }
}

#[cfg(test)]
mod tests {
    use crate::consts::CHANNEL_CX;
    use crate::data::{CoarseOffsetTensor, TileIdMap};
    use crate::inspect::InspectSession;
    use ndarray::{array, Array4};
    use std::collections::BTreeMap;

    fn tensor_with(channel: usize, pos: (usize, usize), vec: [f64; 2]) -> CoarseOffsetTensor {
        let mut t = Array4::<f64>::zeros((2, 2, 2, 2));
        t[(channel, 0, pos.0, pos.1)] = vec[0];
        t[(channel, 1, pos.0, pos.1)] = vec[1];
        CoarseOffsetTensor::new(t)
    }

    #[test]
    fn test_trace_follows_tile_across_sections() {
        // tile 7 在 s1 位于 (0, 0), 在 s3 漂到 (1, 1); s2 不含 tile 7.
        let offsets = BTreeMap::from([
            (1, tensor_with(CHANNEL_CX, (0, 0), [1.0, -1.0])),
            (2, tensor_with(CHANNEL_CX, (0, 0), [9.0, 9.0])),
            (3, tensor_with(CHANNEL_CX, (1, 1), [2.0, -2.0])),
        ]);
        let maps = BTreeMap::from([
            (1, TileIdMap::new(array![[7, 1], [2, 3]])),
            (2, TileIdMap::new(array![[4, 1], [2, 3]])),
            (3, TileIdMap::new(array![[4, 1], [2, 7]])),
        ]);
        let session = InspectSession::from_parts(offsets, maps);

        let trace = session.trace(7, CHANNEL_CX).unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace[&1], ([1.0, -1.0], (0, 0)));
        assert_eq!(trace[&3], ([2.0, -2.0], (1, 1)));

        // 任何 section 都不含的 tile: 空 trace.
        assert!(session.trace(99, CHANNEL_CX).is_none());
    }

    /// section 缺少张量时该点被跳过, 而非报错.
    #[test]
    fn test_trace_skips_missing_tensor() {
        let offsets = BTreeMap::from([(1, tensor_with(CHANNEL_CX, (0, 0), [5.0, 5.0]))]);
        let maps = BTreeMap::from([
            (1, TileIdMap::new(array![[7, 1], [2, 3]])),
            (2, TileIdMap::new(array![[7, 1], [2, 3]])),
        ]);
        let session = InspectSession::from_parts(offsets, maps);

        let trace = session.trace(7, CHANNEL_CX).unwrap();
        assert_eq!(trace.len(), 1);
        assert!(trace.contains_key(&1));
    }
}
