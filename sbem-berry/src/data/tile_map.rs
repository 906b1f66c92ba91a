use super::LoadError;
use crate::consts::{is_tile, CHANNEL_CX, TILE_SENTINEL};
use crate::{Idx2d, TileId};
use ndarray::{Array2, ArrayView2};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::ops::Index;
use std::path::Path;

/// 单个 section 的 tile id map.
///
/// 以 (row, col) 索引的二维整数网格, 记录 tile 在该 section 拼接布局中的位置.
/// 网格值为非负 tile 编号, 或占位值 [`TILE_SENTINEL`] (该位置无 tile).
///
/// 不变式: 同一 section 内每个非占位值至多出现一次 (tile 编号逐 section 唯一).
/// 该不变式由上游解析阶段保证, 本结构不做检查.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileIdMap {
    data: Array2<TileId>,
}

impl Index<Idx2d> for TileIdMap {
    type Output = TileId;

    #[inline]
    fn index(&self, index: Idx2d) -> &Self::Output {
        &self.data[index]
    }
}

impl TileIdMap {
    /// 直接初始化.
    #[inline]
    pub fn new(data: Array2<TileId>) -> Self {
        Self { data }
    }

    /// 打开 JSON 文件格式 (array-of-arrays) 的 tile id map.
    /// `path` 为 `tile_id_map.json` 的本地路径.
    ///
    /// 非矩形网格视为坏数据, 返回 `Err(LoadError::BadShape)`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let file = File::open(path.as_ref()).map_err(LoadError::Io)?;
        let rows: Vec<Vec<TileId>> =
            serde_json::from_reader(BufReader::new(file)).map_err(LoadError::Json)?;

        let h = rows.len();
        let w = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != w) {
            return Err(LoadError::BadShape(format!(
                "非矩形 tile id map: {:?}",
                rows.iter().map(Vec::len).collect::<Vec<_>>()
            )));
        }

        let flat: Vec<TileId> = rows.into_iter().flatten().collect();
        // 形状与数据长度一致, 不会生成 `Err`.
        let data = Array2::from_shape_vec((h, w), flat).unwrap();
        Ok(Self { data })
    }

    /// 获得底层数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView2<TileId> {
        self.data.view()
    }

    /// 网格的分辨率 (行数, 列数).
    #[inline]
    pub fn shape(&self) -> Idx2d {
        let &[h, w] = self.data.shape() else {
            unreachable!()
        };
        (h, w)
    }

    /// 判断一个索引是否合法 (未越界).
    #[inline]
    pub fn check(&self, (y, x): Idx2d) -> bool {
        let (h, w) = self.shape();
        y < h && x < w
    }

    /// 获取给定位置 (row, col) 的网格值. 越界时返回 `None`.
    ///
    /// 注意: 占位值 [`TILE_SENTINEL`] 会原样返回, 由调用方自行判别.
    #[inline]
    pub fn tile_id_at(&self, pos: Idx2d) -> Option<TileId> {
        self.data.get(pos).copied()
    }

    /// 在网格中定位 `tile_id`, 返回其行优先序的首个出现位置.
    /// 不存在时返回 `None`.
    pub fn locate(&self, tile_id: TileId) -> Option<Idx2d> {
        self.data
            .indexed_iter()
            .find(|(_, &v)| v == tile_id)
            .map(|(pos, _)| pos)
    }

    /// 获取 `tile_id` 正下方一格的网格值.
    ///
    /// 当 `tile_id` 不在本网格中, 或其下一行越界时返回 `None`.
    /// 下方是空洞时返回 `Some(TILE_SENTINEL)`.
    pub fn vertical_neighbor(&self, tile_id: TileId) -> Option<TileId> {
        let (y, x) = self.locate(tile_id)?;
        self.tile_id_at((y + 1, x))
    }

    /// 获取 `tile_id` 右侧一格的网格值.
    ///
    /// 当 `tile_id` 不在本网格中, 或其右侧一列越界时返回 `None`.
    /// 右侧是空洞时返回 `Some(TILE_SENTINEL)`.
    pub fn horizontal_neighbor(&self, tile_id: TileId) -> Option<TileId> {
        let (y, x) = self.locate(tile_id)?;
        self.tile_id_at((y, x + 1))
    }

    /// 按通道规则获取 `pos` 处 tile 的配对邻居的网格值:
    /// 通道 [`CHANNEL_CX`] 取右侧一格, 否则取下方一格. 越界时返回 `None`.
    pub fn paired_neighbor(&self, (y, x): Idx2d, channel: usize) -> Option<TileId> {
        if channel == CHANNEL_CX {
            self.tile_id_at((y, x + 1))
        } else {
            self.tile_id_at((y + 1, x))
        }
    }

    /// 获取网格中所有非占位的 tile 编号.
    pub fn tile_ids(&self) -> BTreeSet<TileId> {
        self.data.iter().copied().filter(|&v| is_tile(v)).collect()
    }

    /// 该网格是否全为空洞?
    #[inline]
    pub fn is_empty_grid(&self) -> bool {
        self.data.iter().all(|&v| v == TILE_SENTINEL)
    }
}

#[cfg(test)]
mod tests {
    use super::TileIdMap;
    use crate::consts::{CHANNEL_CX, CHANNEL_CY, TILE_SENTINEL};
    use ndarray::array;

    fn spec_grid() -> TileIdMap {
        TileIdMap::new(array![[1, 2, 3], [4, 5, 6], [7, 8, 9]])
    }

    /// 不变式下每个 tile 至多出现一次, 但 `locate` 的语义仍然是
    /// 行优先首个匹配. 用人为注入的重复值验证.
    #[test]
    fn test_locate_first_match() {
        let m = TileIdMap::new(array![[7, 3], [3, 9]]);
        assert_eq!(m.locate(3), Some((0, 1)));
        assert_eq!(m.locate(9), Some((1, 1)));
        assert_eq!(m.locate(42), None);
    }

    #[test]
    fn test_vertical_neighbor() {
        let m = spec_grid();
        assert_eq!(m.vertical_neighbor(5), Some(8));
        // 最后一行没有下方邻居.
        assert_eq!(m.vertical_neighbor(9), None);
        assert_eq!(m.vertical_neighbor(42), None);
    }

    #[test]
    fn test_horizontal_neighbor() {
        let m = spec_grid();
        assert_eq!(m.horizontal_neighbor(5), Some(6));
        assert_eq!(m.horizontal_neighbor(6), None);
    }

    #[test]
    fn test_paired_neighbor() {
        let m = spec_grid();
        assert_eq!(m.paired_neighbor((1, 1), CHANNEL_CX), Some(6));
        assert_eq!(m.paired_neighbor((1, 1), CHANNEL_CY), Some(8));
        assert_eq!(m.paired_neighbor((2, 2), CHANNEL_CY), None);
    }

    #[test]
    fn test_tile_ids_excludes_sentinel() {
        let m = TileIdMap::new(array![[0, TILE_SENTINEL], [2, TILE_SENTINEL]]);
        let ids: Vec<i32> = m.tile_ids().into_iter().collect();
        assert_eq!(ids, vec![0, 2]);
        assert!(!m.is_empty_grid());
    }

    #[test]
    fn test_open_json() {
        let dir = std::env::temp_dir();
        let fp = dir.join(format!("sbem_berry_tidmap_{}.json", std::process::id()));

        std::fs::write(&fp, "[[1, 2], [-1, 3]]").unwrap();
        let m = TileIdMap::open(&fp).unwrap();
        assert_eq!(m.shape(), (2, 2));
        assert_eq!(m[(1, 0)], TILE_SENTINEL);
        assert_eq!(m.locate(3), Some((1, 1)));

        std::fs::write(&fp, "[[1, 2], [3]]").unwrap();
        assert!(matches!(
            TileIdMap::open(&fp),
            Err(super::LoadError::BadShape(_))
        ));

        std::fs::remove_file(&fp).unwrap();
    }
}
