//! 退化值 (非有限 shift) 的定位与 tile 对还原.

use super::{InspectRecord, InspectSession};

impl InspectSession {
    /// 定位聚合张量中的所有退化值, 并借助 tile id map 还原 tile 对.
    ///
    /// 对每个坐标 `(c, z, y, x)`: `(y, x)` 处即本体 tile; 配对邻居由通道
    /// `c` 确定 (水平通道取右侧一格, 垂直通道取下方一格), 越界记为无法解析.
    /// 记录按 section 编号、坐标的行优先序排列.
    ///
    /// 这是纯诊断过程: 既不修改张量, 也不修复退化值; 下游 stitching
    /// 必须自行把这些坐标当作无效数据.
    pub fn locate_inf_vals(&self) -> Vec<InspectRecord> {
        let mut out = Vec::new();
        for (&num, tensor) in self.offsets() {
            let map = self.tile_map(num);
            for (c, z, y, x) in tensor.locate_non_finite() {
                let tile_id = map.and_then(|m| m.tile_id_at((y, x)));
                let neighbor = map.and_then(|m| m.paired_neighbor((y, x), c));
                out.push(InspectRecord {
                    section: num,
                    channel: c,
                    component: z,
                    row: y,
                    col: x,
                    tile_id,
                    neighbor,
                });
            }
        }
        out
    }
}
