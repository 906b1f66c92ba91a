use crate::data::{CoarseOffsetTensor, LoadError, TileIdMap};
use crate::{SectionNum, TileId};
use itertools::Itertools;
use ndarray::{Ix2, Ix4, OwnedRepr};
use ndarray_npy::{NpzReader, ReadNpzError, ReadableElement};
use std::fs::{File, OpenOptions};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// 打开聚合归档错误.
#[derive(Debug)]
pub enum OpenArchiveError {
    /// workers 太大. 最多支持 64.
    TooManyWorkers(u32),

    /// 归档文件不存在. 聚合从未运行过时属于整次运行级别的致命错误.
    ArchiveMissing(PathBuf),

    /// 打开 npz 文件错误.
    ReadNpz(ReadNpzError),

    /// 其他底层 I/O 错误.
    Io(std::io::Error),
}

/// 聚合 npz 归档 (section 编号 -> 数组) 的只读多通道读取器.
///
/// 系统会从路径 `p` 打开文件 `workers` 次, 并为每个打开通道指定一个
/// 排他入口点 (以期在并行读取时获得更高的并行度).
/// 条目名按 numpy 惯例为 `"{section 编号}.npy"`.
pub struct KeyedNpzArchive {
    entries: Vec<Mutex<NpzReader<File>>>,
    turn: AtomicUsize,
}

impl KeyedNpzArchive {
    /// 初始化. `workers` 指定底层工作通道的个数, 最大为 64.
    pub fn open<P: AsRef<Path>>(workers: NonZeroUsize, p: P) -> Result<Self, OpenArchiveError> {
        let workers = workers.get();
        if workers > 64 {
            return Err(OpenArchiveError::TooManyWorkers(64));
        }
        if !p.as_ref().exists() {
            return Err(OpenArchiveError::ArchiveMissing(p.as_ref().to_owned()));
        }
        let mut v = Vec::with_capacity(workers);
        for _ in 0..workers {
            let file = OpenOptions::new()
                .read(true)
                .open(p.as_ref())
                .map_err(OpenArchiveError::Io)?;
            v.push(Mutex::new(
                NpzReader::new(file).map_err(OpenArchiveError::ReadNpz)?,
            ));
        }
        Ok(Self {
            entries: v,
            turn: AtomicUsize::new(0),
        })
    }

    /// 获取归档内所有 section 编号, 升序. 名字不合惯例的条目被忽略.
    pub fn section_nums(&self) -> Result<Vec<SectionNum>, ReadNpzError> {
        let slot = self.next_slot();
        let names = self.entries[slot].lock().unwrap().names()?;
        Ok(names
            .iter()
            .filter_map(|n| parse_entry_name(n))
            .sorted()
            .collect())
    }

    /// 通过 section 编号读取条目.
    pub fn by_section<T, D>(
        &self,
        num: SectionNum,
    ) -> Result<ndarray::Array<T, D>, ReadNpzError>
    where
        T: ReadableElement,
        D: ndarray::Dimension,
    {
        let slot = self.next_slot();
        let mut file = self.entries[slot].lock().unwrap();
        file.by_name::<OwnedRepr<T>, D>(&format!("{num}.npy"))
    }

    /// 工作通道个数.
    #[inline]
    pub fn worker_len(&self) -> usize {
        self.entries.len()
    }

    /// 归档内条目个数.
    pub fn len(&self) -> usize {
        let slot = self.next_slot();
        self.entries[slot].lock().unwrap().len()
    }

    /// 归档是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_slot(&self) -> usize {
        self.turn.fetch_add(1, Ordering::Relaxed) % self.worker_len()
    }
}

/// 解析条目名为 section 编号. 容忍不带 `.npy` 后缀的裸名.
fn parse_entry_name(name: &str) -> Option<SectionNum> {
    let stem = name.strip_suffix(".npy").unwrap_or(name);
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// 从聚合 offset 归档读取一个 section 的张量.
pub fn read_offset_entry(
    archive: &KeyedNpzArchive,
    num: SectionNum,
) -> Result<CoarseOffsetTensor, LoadError> {
    let arr = archive
        .by_section::<f64, Ix4>(num)
        .map_err(LoadError::Npz)?;
    CoarseOffsetTensor::try_from(arr)
}

/// 从聚合 tile id map 归档读取一个 section 的网格.
pub fn read_tile_map_entry(
    archive: &KeyedNpzArchive,
    num: SectionNum,
) -> Result<TileIdMap, LoadError> {
    let arr = archive
        .by_section::<TileId, Ix2>(num)
        .map_err(LoadError::Npz)?;
    Ok(TileIdMap::new(arr))
}
