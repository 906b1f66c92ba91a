#![warn(missing_docs)] // <= 合适时移除它.

//! 核心库. 提供 SBEM (serial blockface EM) 采集中逐 section 的 coarse offset
//! 聚合与质检 (proof-reading) 功能的结构化信息和基础算法.
//!
//! 该 crate 目前仅提供 `safe` 接口. 将来可能为部分高性能场景关键路径提供
//! `unsafe` 接口.
//!
//! # 注意
//!
//! 1. 该 crate 不负责图像像素数据, 也不负责 coarse offset 本身的计算;
//!   它只消费上游 (采集解析 / stitching) 产出的 `tile_id_map.json` 和
//!   `coarse.npz` / `cx_cy.json` 文件.
//! 2. 在非期望情况下, 程序会直接 panic, 而不会导致内存错误. As what Rust promises.
//!
//! # 开发计划
//!
//! ### coarse offset 与 tile id map 的逐 section 聚合 ✅
//!
//! 将实验目录下所有 section 的 coarse offset 和 tile id map 收集进
//! 两个按 section 编号为 key 的 npz 归档, 并给出缺失文件清单.
//!
//! 实现位于 `sbem-berry/src/dataset/aggregate.rs`.
//!
//! ### 退化值 (Inf) 定位 ✅
//!
//! 在聚合张量中找出所有非有限值, 并借助 tile id map 还原出对应的
//! tile 对 (tile 本体 + 其水平/垂直邻居).
//!
//! 实现位于 `sbem-berry/src/inspect/degenerate.rs`.
//!
//! ### trace 提取 ✅
//!
//! 对给定 tile 与空间方向, 抽取其 shift 向量跨 section 的时间序列.
//!
//! 实现位于 `sbem-berry/src/inspect/trace.rs`.
//!
//! ### 滑动窗口离群检测 ✅
//!
//! 对 (可能不连续的) 标量序列做局部均值/标准差检验, 标记异常 section.
//! 窗口以 **序列位置** 而非编号差值为单位, 在边界处截断.
//!
//! 实现位于 `sbem-berry/src/inspect/outliers.rs`.
//!
//! ### 聚合归档的多通道读取 ✅
//!
//! 为 `all_offsets.npz` / `all_tile_id_maps.npz` 提供带排他入口点的
//! 只读多通道读取器, 以期在并行 sweep 时获得更高的并行度.
//!
//! 实现位于 `sbem-berry/src/dataset/archive.rs`.
//!
//! ### 完善代码文档 ⌛️
//!
//! 给每个 public API 提供文档, 并视情况给 private API 提供文档.

/// 二维网格索引 (row, col), 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 聚合张量的四维索引 (channel, component, row, col).
pub type Idx4d = (usize, usize, usize, usize);

/// section 编号. 在一次采集内唯一, 按数值排序, 允许空洞.
pub type SectionNum = u32;

/// tile 编号. 非负值为真实 tile, `-1` 为 "此处无 tile" 占位值.
pub type TileId = i32;

/// SBEM section 基础数据结构.
mod data;

pub use data::{CoarseOffsetTensor, LoadError, TileIdMap};

pub mod consts;

pub mod dataset;
pub mod inspect;
pub mod prelude;
