use super::{cross_platform_path, section::parse_section_dir_name};
use crate::consts::{
    DIR_INSPECT, DIR_SECTIONS, FN_ALL_OFFSETS, FN_ALL_TILE_ID_MAPS, FN_INF_VALS,
    FN_MISSING_OFFSETS, FN_MISSING_TILE_ID_MAPS, FN_OUTLIERS,
};
use crate::SectionNum;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 一次 SBEM 采集实验的目录结构约定.
///
/// ```text
/// {root}/
///   sections/           逐 section 目录, 形如 s0042_g0
///   _inspect/           质检产物 (聚合归档与报告)
/// ```
#[derive(Debug, Clone)]
pub struct Experiment {
    root: PathBuf,
}

impl Experiment {
    /// 从实验根路径初始化. 路径会先做一次跨平台规范化.
    pub fn new(root: &str) -> Self {
        Self {
            root: PathBuf::from(cross_platform_path(root)),
        }
    }

    /// 实验根目录.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 存放所有 section 的目录.
    #[inline]
    pub fn dir_sections(&self) -> PathBuf {
        self.root.join(DIR_SECTIONS)
    }

    /// 存放质检产物的目录.
    #[inline]
    pub fn dir_inspect(&self) -> PathBuf {
        self.root.join(DIR_INSPECT)
    }

    /// 聚合 coarse offset 归档路径.
    #[inline]
    pub fn path_offsets(&self) -> PathBuf {
        self.dir_inspect().join(FN_ALL_OFFSETS)
    }

    /// 聚合 tile id map 归档路径.
    #[inline]
    pub fn path_tile_id_maps(&self) -> PathBuf {
        self.dir_inspect().join(FN_ALL_TILE_ID_MAPS)
    }

    /// coarse offset 缺失清单路径.
    #[inline]
    pub fn path_missing_offsets(&self) -> PathBuf {
        self.dir_inspect().join(FN_MISSING_OFFSETS)
    }

    /// tile id map 缺失清单路径.
    #[inline]
    pub fn path_missing_tile_id_maps(&self) -> PathBuf {
        self.dir_inspect().join(FN_MISSING_TILE_ID_MAPS)
    }

    /// 退化值报告路径.
    #[inline]
    pub fn path_inf_vals(&self) -> PathBuf {
        self.dir_inspect().join(FN_INF_VALS)
    }

    /// 离群 trace 报告路径.
    #[inline]
    pub fn path_outliers(&self) -> PathBuf {
        self.dir_inspect().join(FN_OUTLIERS)
    }

    /// 确保质检产物目录存在.
    #[inline]
    pub fn ensure_inspect_dir(&self) -> io::Result<()> {
        fs::create_dir_all(self.dir_inspect())
    }

    /// 列出所有合法的 section 目录, 按 section 编号升序.
    ///
    /// 只接受名字形如 `s<digits>_g<digits>` 的子目录, 其余一律忽略.
    pub fn list_section_dirs(&self) -> io::Result<Vec<(SectionNum, PathBuf)>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(self.dir_sections())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(num) = parse_section_dir_name(name) {
                out.push((num, entry.path()));
            }
        }
        out.sort_unstable_by_key(|(num, _)| *num);
        Ok(out)
    }
}
