//! 聚合: 将逐 section 的数据文件收集进按编号为 key 的压缩 npz 归档.
//!
//! 缺失文件是采集中期的常态, 只记录不失败; 损坏文件按单文件硬错误处理,
//! 记录后继续处理其余 section. 两类都会进入缺失清单, 不会被静默丢弃.

use super::section::{offset_loader, tile_id_map_loader};
use super::Experiment;
use crate::data::{CoarseOffsetTensor, TileIdMap};
use crate::SectionNum;
use itertools::Itertools;
use log::{debug, info, warn};
use ndarray_npy::{NpzWriter, WriteNpzError};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// 一次聚合的结果.
#[derive(Debug)]
pub struct Aggregated<T> {
    /// 成功加载的条目, 按 section 编号升序.
    pub entries: BTreeMap<SectionNum, T>,

    /// 无法加载 (缺失或损坏) 的 section 编号, 按输入顺序.
    pub missing: Vec<SectionNum>,
}

/// 收集所有 section 的 coarse offset 张量.
pub fn aggregate_offsets<I>(dirs: I) -> Aggregated<CoarseOffsetTensor>
where
    I: IntoIterator<Item = (SectionNum, PathBuf)>,
{
    let mut entries = BTreeMap::new();
    let mut missing = Vec::new();
    for (num, loaded) in offset_loader(dirs) {
        match loaded {
            Ok(Some(tensor)) => {
                entries.insert(num, tensor);
            }
            Ok(None) => {
                debug!("s{num} coarse-offsets 文件不存在");
                missing.push(num);
            }
            Err(e) => {
                warn!("s{num} coarse-offsets 加载失败: {e:?}");
                missing.push(num);
            }
        }
    }
    Aggregated { entries, missing }
}

/// 收集所有 section 的 tile id map.
pub fn aggregate_tile_id_maps<I>(dirs: I) -> Aggregated<TileIdMap>
where
    I: IntoIterator<Item = (SectionNum, PathBuf)>,
{
    let mut entries = BTreeMap::new();
    let mut missing = Vec::new();
    for (num, loaded) in tile_id_map_loader(dirs) {
        match loaded {
            Ok(Some(map)) => {
                entries.insert(num, map);
            }
            Ok(None) => {
                debug!("s{num} tile_id_map.json 文件不存在");
                missing.push(num);
            }
            Err(e) => {
                warn!("s{num} tile_id_map.json 加载失败: {e:?}");
                missing.push(num);
            }
        }
    }
    Aggregated { entries, missing }
}

/// 保存归档错误.
#[derive(Debug)]
pub enum SaveError {
    /// 底层 I/O 错误.
    Io(io::Error),

    /// npz 写入错误.
    Npz(WriteNpzError),
}

/// 将聚合 offset 写为压缩 npz 归档, 条目名为 numpy 惯例的
/// `"{num}.npy"` 形式. 条目按编号升序写入, 同样的输入产生同样的字节.
pub fn save_offsets_archive<P: AsRef<Path>>(
    path: P,
    entries: &BTreeMap<SectionNum, CoarseOffsetTensor>,
) -> Result<(), SaveError> {
    let file = File::create(path.as_ref()).map_err(SaveError::Io)?;
    let mut npz = NpzWriter::new_compressed(file);
    for (num, tensor) in entries {
        npz.add_array(format!("{num}.npy"), &tensor.data())
            .map_err(SaveError::Npz)?;
    }
    npz.finish().map_err(SaveError::Npz)?;
    info!("coarse offsets 已保存到: {}", path.as_ref().display());
    Ok(())
}

/// 将聚合 tile id map 写为压缩 npz 归档. 条目命名与写入顺序同
/// [`save_offsets_archive`].
pub fn save_tile_id_maps_archive<P: AsRef<Path>>(
    path: P,
    entries: &BTreeMap<SectionNum, TileIdMap>,
) -> Result<(), SaveError> {
    let file = File::create(path.as_ref()).map_err(SaveError::Io)?;
    let mut npz = NpzWriter::new_compressed(file);
    for (num, map) in entries {
        npz.add_array(format!("{num}.npy"), &map.data())
            .map_err(SaveError::Npz)?;
    }
    npz.finish().map_err(SaveError::Npz)?;
    info!("tile id maps 已保存到: {}", path.as_ref().display());
    Ok(())
}

/// 写缺失清单, 每行一个 `s{num}` 标签.
pub fn write_missing_report<P: AsRef<Path>>(path: P, missing: &[SectionNum]) -> io::Result<()> {
    let mut body = missing.iter().map(|n| format!("s{n}")).join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    fs::write(path, body)
}

/// 聚合并落盘所有 coarse offset: 归档 + 缺失清单.
///
/// 对同样的输入可重复运行, 输出被确定性地覆盖.
pub fn backup_coarse_offsets(
    exp: &Experiment,
    dirs: &[(SectionNum, PathBuf)],
) -> Result<Aggregated<CoarseOffsetTensor>, SaveError> {
    let agg = aggregate_offsets(dirs.iter().cloned());
    debug!("缺失 coarse-offsets 文件数: {}", agg.missing.len());

    fs::create_dir_all(exp.dir_inspect()).map_err(SaveError::Io)?;
    save_offsets_archive(exp.path_offsets(), &agg.entries)?;
    write_missing_report(exp.path_missing_offsets(), &agg.missing).map_err(SaveError::Io)?;
    info!(
        "缺失 coarse-offsets 清单已保存到: {}",
        exp.path_missing_offsets().display()
    );
    Ok(agg)
}

/// 聚合并落盘所有 tile id map: 归档 + 缺失清单.
///
/// 对同样的输入可重复运行, 输出被确定性地覆盖.
pub fn backup_tile_id_maps(
    exp: &Experiment,
    dirs: &[(SectionNum, PathBuf)],
) -> Result<Aggregated<TileIdMap>, SaveError> {
    let agg = aggregate_tile_id_maps(dirs.iter().cloned());
    debug!("缺失 tile_id_map.json 文件数: {}", agg.missing.len());

    fs::create_dir_all(exp.dir_inspect()).map_err(SaveError::Io)?;
    save_tile_id_maps_archive(exp.path_tile_id_maps(), &agg.entries)?;
    write_missing_report(exp.path_missing_tile_id_maps(), &agg.missing).map_err(SaveError::Io)?;
    info!(
        "缺失 tile id maps 清单已保存到: {}",
        exp.path_missing_tile_id_maps().display()
    );
    Ok(agg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{read_offset_entry, read_tile_map_entry, KeyedNpzArchive};
    use std::num::NonZeroUsize;
    use std::path::Path;

    /// 搭一个最小实验目录: s1 数据齐全, s2 两样皆缺, s3 只有 tile id map.
    fn make_exp_tree(root: &Path) {
        let sections = root.join("sections");
        for name in ["s0001_g0", "s0002_g0", "s0003_g0"] {
            std::fs::create_dir_all(sections.join(name)).unwrap();
        }
        // 含一个 Inf 的 cx_cy 数据, 形状 (2, 1, 1, 2).
        std::fs::write(
            sections.join("s0001_g0/cx_cy.json"),
            concat!(
                "{\"cx\": [[[[1.0, 2.0]]], [[[3.0, 4.0]]]],",
                " \"cy\": [[[[5.0, Infinity]]], [[[7.0, 8.0]]]]}",
            ),
        )
        .unwrap();
        std::fs::write(sections.join("s0001_g0/tile_id_map.json"), "[[10, 11]]").unwrap();
        std::fs::write(sections.join("s0003_g0/tile_id_map.json"), "[[10, 12]]").unwrap();
    }

    #[test]
    fn test_backup_round_trip_and_idempotence() {
        let root = std::env::temp_dir().join(format!("sbem_berry_agg_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        make_exp_tree(&root);

        let exp = Experiment::new(root.to_str().unwrap());
        let dirs = exp.list_section_dirs().unwrap();
        assert_eq!(
            dirs.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        let offs = backup_coarse_offsets(&exp, &dirs).unwrap();
        let maps = backup_tile_id_maps(&exp, &dirs).unwrap();
        assert_eq!(offs.missing, vec![2, 3]);
        assert_eq!(maps.missing, vec![2]);
        assert!(!offs.entries.contains_key(&2));

        // 缺失清单: 每行一个标签.
        let report = std::fs::read_to_string(exp.path_missing_offsets()).unwrap();
        assert_eq!(report, "s2\ns3\n");

        // 归档回读: 有限值逐位一致.
        let one = NonZeroUsize::new(1).unwrap();
        let arc = KeyedNpzArchive::open(one, exp.path_offsets()).unwrap();
        assert_eq!(arc.section_nums().unwrap(), vec![1]);
        let tensor = read_offset_entry(&arc, 1).unwrap();
        assert_eq!(&tensor, &offs.entries[&1]);
        assert_eq!(tensor.vec_at(1, (0, 1)), Some([f64::INFINITY, 8.0]));

        let arc = KeyedNpzArchive::open(one, exp.path_tile_id_maps()).unwrap();
        let map = read_tile_map_entry(&arc, 3).unwrap();
        assert_eq!(&map, &maps.entries[&3]);

        // 幂等: 重跑一遍, 归档与清单逐字节一致.
        let bytes_a = std::fs::read(exp.path_offsets()).unwrap();
        let report_a = std::fs::read(exp.path_missing_tile_id_maps()).unwrap();
        backup_coarse_offsets(&exp, &dirs).unwrap();
        backup_tile_id_maps(&exp, &dirs).unwrap();
        assert_eq!(std::fs::read(exp.path_offsets()).unwrap(), bytes_a);
        assert_eq!(
            std::fs::read(exp.path_missing_tile_id_maps()).unwrap(),
            report_a
        );

        std::fs::remove_dir_all(&root).unwrap();
    }
}
