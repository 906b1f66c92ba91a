//! 通用常量.

use crate::TileId;

/// tile id map 中 "该网格位置没有 tile" 的占位值.
pub const TILE_SENTINEL: TileId = -1;

/// 聚合张量第 0 轴上水平邻居通道 (cx) 的下标.
pub const CHANNEL_CX: usize = 0;

/// 聚合张量第 0 轴上垂直邻居通道 (cy) 的下标.
pub const CHANNEL_CY: usize = 1;

/// 单个 section 目录下 tile id map 的文件名.
pub const FN_TILE_ID_MAP: &str = "tile_id_map.json";

/// 单个 section 目录下 JSON 格式 coarse offset 的文件名.
pub const FN_CX_CY_JSON: &str = "cx_cy.json";

/// 单个 section 目录下 npz 格式 coarse offset 的文件名.
pub const FN_COARSE_NPZ: &str = "coarse.npz";

/// 实验根目录下存放所有 section 的目录名.
pub const DIR_SECTIONS: &str = "sections";

/// 实验根目录下存放质检产物的目录名.
pub const DIR_INSPECT: &str = "_inspect";

/// 聚合后 coarse offset 归档的文件名.
pub const FN_ALL_OFFSETS: &str = "all_offsets.npz";

/// 聚合后 tile id map 归档的文件名.
pub const FN_ALL_TILE_ID_MAPS: &str = "all_tile_id_maps.npz";

/// coarse offset 缺失清单的文件名.
pub const FN_MISSING_OFFSETS: &str = "all_offsets_missing_files.txt";

/// tile id map 缺失清单的文件名.
pub const FN_MISSING_TILE_ID_MAPS: &str = "all_missing_tile_id_maps.txt";

/// 退化值 (Inf) 报告的文件名.
pub const FN_INF_VALS: &str = "inf_vals.txt";

/// 离群 trace 报告的文件名.
pub const FN_OUTLIERS: &str = "coarse_offset_outliers.txt";

/// 两份质检报告共用的表头. 列名为占位性质: `C` 是通道 (0 水平, 1 垂直),
/// `Z` 是 shift 向量分量, `Y`/`X` 是网格行列.
pub const REPORT_HEADER: &str = "# Slice\tC\tZ\tY\tX\tTileID\tTileID_nn";

/// 判断 tile id 是否是占位值.
#[inline]
pub const fn is_sentinel(id: TileId) -> bool {
    id == TILE_SENTINEL
}

/// 判断 tile id 是否是真实 tile.
#[inline]
pub const fn is_tile(id: TileId) -> bool {
    id >= 0
}
