//! SBEM section 基础数据结构.
//!
//! 每个 section 由两份上游产物描述: 定位 tile 的 [`TileIdMap`],
//! 以及相邻 tile 间 shift 向量的 [`CoarseOffsetTensor`].
//! 两者均为只读实体, 由本模块从磁盘解析并做维度规范化.

mod offsets;
mod tile_map;

pub use offsets::CoarseOffsetTensor;
pub use tile_map::TileIdMap;

use std::path::PathBuf;

/// 加载单个 section 数据文件的错误.
///
/// 该错误只对出问题的那一个文件生效; 调用方应隔离并记录它,
/// 不应让它中断整批聚合.
#[derive(Debug)]
pub enum LoadError {
    /// 底层 I/O 错误.
    Io(std::io::Error),

    /// JSON 解析错误.
    Json(serde_json::Error),

    /// npz 归档读取错误.
    Npz(ndarray_npy::ReadNpzError),

    /// 文件后缀不受支持. 支持 `.npz` 和 `.json`.
    UnsupportedFormat(PathBuf),

    /// 数据形状不符合约定 (非矩形网格, 通道/分量轴长度不为 2 等).
    BadShape(String),
}
