//! 🍒欢迎光临🍒
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx4d, SectionNum, TileId};

pub use crate::consts::{CHANNEL_CX, CHANNEL_CY, TILE_SENTINEL};

pub use crate::data::{CoarseOffsetTensor, LoadError, TileIdMap};

pub use crate::dataset::{
    backup_coarse_offsets, backup_tile_id_maps, cross_platform_path, Experiment, KeyedNpzArchive,
    OpenArchiveError,
};

pub use crate::inspect::{
    append_outlier_report, find_outliers, write_inf_report, InspectRecord, InspectSession,
    OutlierParams, Trace,
};
