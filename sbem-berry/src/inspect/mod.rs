//! 质检 (proof-reading): 退化值定位, trace 提取与滑动窗口离群检测.
//!
//! 所有组件都工作在 [`InspectSession`] 上: 两份聚合归档在会话建立时
//! 一次性读入内存, 此后只读共享. 会话不持有跨调用的可变状态,
//! 对同样的输入重复运行是幂等的.

mod degenerate;
mod outliers;
mod report;
mod trace;

pub use outliers::{find_outliers, OutlierParams};
pub use report::{append_outlier_report, write_inf_report, InspectRecord};
pub use trace::Trace;

use crate::data::{CoarseOffsetTensor, TileIdMap};
use crate::dataset::{
    read_offset_entry, read_tile_map_entry, Experiment, KeyedNpzArchive, OpenArchiveError,
};
use crate::{SectionNum, TileId};
use log::warn;
use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
    }
}

/// 一次质检会话: 两份聚合归档的内存只读缓存.
pub struct InspectSession {
    offsets: BTreeMap<SectionNum, CoarseOffsetTensor>,
    tile_maps: BTreeMap<SectionNum, TileIdMap>,
}

impl InspectSession {
    /// 从实验目录的两份聚合归档建立会话.
    ///
    /// coarse offset 归档不存在是整次运行级别的致命错误, 立即返回 `Err`;
    /// tile id map 归档不存在时降级运行 (退化值定位不再解析 tile 对,
    /// trace 与离群检测无事可做), 只记一条警告.
    /// 单个坏条目按单文件硬错误隔离: 记录并跳过.
    pub fn load(exp: &Experiment, workers: NonZeroUsize) -> Result<Self, OpenArchiveError> {
        let offset_arc = KeyedNpzArchive::open(workers, exp.path_offsets())?;
        let nums = offset_arc
            .section_nums()
            .map_err(OpenArchiveError::ReadNpz)?;
        let offsets = read_entries(&nums, "coarse offset", |num| {
            read_offset_entry(&offset_arc, num)
        });

        let tile_maps = match KeyedNpzArchive::open(workers, exp.path_tile_id_maps()) {
            Ok(map_arc) => {
                let nums = map_arc
                    .section_nums()
                    .map_err(OpenArchiveError::ReadNpz)?;
                read_entries(&nums, "tile id map", |num| {
                    read_tile_map_entry(&map_arc, num)
                })
            }
            Err(OpenArchiveError::ArchiveMissing(p)) => {
                warn!("tile id map 归档缺失: {}, tile 对将无法解析", p.display());
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };

        Ok(Self { offsets, tile_maps })
    }

    /// 直接从内存数据建立会话.
    #[inline]
    pub fn from_parts(
        offsets: BTreeMap<SectionNum, CoarseOffsetTensor>,
        tile_maps: BTreeMap<SectionNum, TileIdMap>,
    ) -> Self {
        Self { offsets, tile_maps }
    }

    /// 所有已缓存的 coarse offset 张量, 按 section 编号升序.
    #[inline]
    pub fn offsets(&self) -> &BTreeMap<SectionNum, CoarseOffsetTensor> {
        &self.offsets
    }

    /// 所有已缓存的 tile id map, 按 section 编号升序.
    #[inline]
    pub fn tile_maps(&self) -> &BTreeMap<SectionNum, TileIdMap> {
        &self.tile_maps
    }

    /// 获取给定 section 的张量.
    #[inline]
    pub fn tensor(&self, num: SectionNum) -> Option<&CoarseOffsetTensor> {
        self.offsets.get(&num)
    }

    /// 获取给定 section 的 tile id map.
    #[inline]
    pub fn tile_map(&self, num: SectionNum) -> Option<&TileIdMap> {
        self.tile_maps.get(&num)
    }

    /// 所有 section 中出现过的 tile 编号的并集 (不含占位值).
    pub fn tile_ids_union(&self) -> BTreeSet<TileId> {
        let mut ids = BTreeSet::new();
        for map in self.tile_maps.values() {
            ids.extend(map.tile_ids());
        }
        ids
    }
}

/// 按编号逐条目读入. 坏条目记录后跳过, 不影响其余条目.
fn read_entries<T, F>(
    nums: &[SectionNum],
    what: &str,
    read: F,
) -> BTreeMap<SectionNum, T>
where
    T: Send,
    F: Fn(SectionNum) -> Result<T, crate::data::LoadError> + Sync,
{
    let read_one = |num: SectionNum| match read(num) {
        Ok(v) => Some((num, v)),
        Err(e) => {
            warn!("{what} 归档条目 s{num} 读取失败: {e:?}");
            None
        }
    };

    #[cfg(feature = "rayon")]
    return nums.par_iter().filter_map(|&num| read_one(num)).collect();

    #[cfg(not(feature = "rayon"))]
    nums.iter().filter_map(|&num| read_one(num)).collect()
}
