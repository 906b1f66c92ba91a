//! 逐 section 的数据文件加载.
//!
//! 提供迭代器风格的加载模式: 加载器逐个产出 `(section 编号, 加载结果)`,
//! 文件缺失与文件损坏在结果类型中显式区分.

use crate::consts::{FN_COARSE_NPZ, FN_CX_CY_JSON, FN_TILE_ID_MAP};
use crate::data::{CoarseOffsetTensor, LoadError, TileIdMap};
use crate::SectionNum;
use std::path::{Path, PathBuf};

/// 从 section 目录名解析 section 编号.
///
/// 仅接受 `s<digits>_g<digits>` 形式的目录名, 其余返回 `None`.
pub fn parse_section_dir_name(name: &str) -> Option<SectionNum> {
    let rest = name.strip_prefix('s')?;
    let (num, grid) = rest.split_once("_g")?;
    if num.is_empty() || grid.is_empty() {
        return None;
    }
    if !num.bytes().all(|b| b.is_ascii_digit()) || !grid.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    num.parse().ok()
}

/// 加载 `section_dir` 下的 tile id map.
///
/// 文件不存在属于正常的数据缺失, 返回 `Ok(None)`;
/// 文件存在但解析失败返回 `Err`, 该错误只影响这一个 section.
pub fn load_tile_id_map<P: AsRef<Path>>(section_dir: P) -> Result<Option<TileIdMap>, LoadError> {
    let fp = section_dir.as_ref().join(FN_TILE_ID_MAP);
    if !fp.exists() {
        return Ok(None);
    }
    TileIdMap::open(fp).map(Some)
}

/// 加载 `section_dir` 下的 coarse offset 张量.
///
/// 依次探测 `coarse.npz` 与 `cx_cy.json`, 读取最先存在的那一个;
/// 两者皆无时返回 `Ok(None)`.
pub fn load_coarse_offsets<P: AsRef<Path>>(
    section_dir: P,
) -> Result<Option<CoarseOffsetTensor>, LoadError> {
    let dir = section_dir.as_ref();
    for name in [FN_COARSE_NPZ, FN_CX_CY_JSON] {
        let fp = dir.join(name);
        if fp.exists() {
            return CoarseOffsetTensor::open(fp).map(Some);
        }
    }
    Ok(None)
}

/// 从 `(编号, 目录)` 列表创建逐 section 的 coarse offset 加载器.
pub fn offset_loader<I: IntoIterator<Item = (SectionNum, PathBuf)>>(dirs: I) -> OffsetLoader {
    let mut dirs: Vec<_> = dirs.into_iter().collect();
    dirs.reverse();
    OffsetLoader { dirs_rev: dirs }
}

/// 逐 section 迭代加载 coarse offset 的加载器.
#[derive(Debug)]
pub struct OffsetLoader {
    dirs_rev: Vec<(SectionNum, PathBuf)>,
}

impl Iterator for OffsetLoader {
    type Item = (SectionNum, Result<Option<CoarseOffsetTensor>, LoadError>);

    fn next(&mut self) -> Option<Self::Item> {
        let (num, dir) = self.dirs_rev.pop()?;
        Some((num, load_coarse_offsets(dir)))
    }
}

impl ExactSizeIterator for OffsetLoader {
    #[inline]
    fn len(&self) -> usize {
        self.dirs_rev.len()
    }
}

/// 从 `(编号, 目录)` 列表创建逐 section 的 tile id map 加载器.
pub fn tile_id_map_loader<I: IntoIterator<Item = (SectionNum, PathBuf)>>(
    dirs: I,
) -> TileIdMapLoader {
    let mut dirs: Vec<_> = dirs.into_iter().collect();
    dirs.reverse();
    TileIdMapLoader { dirs_rev: dirs }
}

/// 逐 section 迭代加载 tile id map 的加载器.
#[derive(Debug)]
pub struct TileIdMapLoader {
    dirs_rev: Vec<(SectionNum, PathBuf)>,
}

impl Iterator for TileIdMapLoader {
    type Item = (SectionNum, Result<Option<TileIdMap>, LoadError>);

    fn next(&mut self) -> Option<Self::Item> {
        let (num, dir) = self.dirs_rev.pop()?;
        Some((num, load_tile_id_map(dir)))
    }
}

impl ExactSizeIterator for TileIdMapLoader {
    #[inline]
    fn len(&self) -> usize {
        self.dirs_rev.len()
    }
}
