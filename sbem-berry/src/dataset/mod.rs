//! 数据集操作: 实验目录约定, 逐 section 加载, 聚合与归档.

mod aggregate;
mod archive;
mod experiment;
mod section;

pub use aggregate::{
    aggregate_offsets, aggregate_tile_id_maps, backup_coarse_offsets, backup_tile_id_maps,
    save_offsets_archive, save_tile_id_maps_archive, write_missing_report, Aggregated, SaveError,
};
pub use archive::{read_offset_entry, read_tile_map_entry, KeyedNpzArchive, OpenArchiveError};
pub use experiment::Experiment;
pub use section::{
    load_coarse_offsets, load_tile_id_map, offset_loader, parse_section_dir_name,
    tile_id_map_loader, OffsetLoader, TileIdMapLoader,
};

/// 将路径统一规范化为 POSIX 风格.
///
/// 去除采集工作站写入的 Windows UNC 前缀 (替换为对应的 POSIX 挂载点),
/// 并把反斜杠统一为正斜杠. 纯函数, 无平台探测; 只应在 I/O 边界
/// ([`Experiment::new`]) 处调用一次.
pub fn cross_platform_path(path: &str) -> String {
    const UNC_PREFIX: &str = r"\\tungsten-nas.fmi.ch\tungsten";
    const POSIX_MOUNT: &str = "/tungstenfs";

    if !path.contains('\\') {
        return path.to_owned();
    }
    path.replace(UNC_PREFIX, POSIX_MOUNT).replace('\\', "/")
}
