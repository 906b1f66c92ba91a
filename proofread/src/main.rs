//! coarse offset 质检流水线的命令行入口.
//!
//! 三个子命令对应流水线的三种动作: `aggregate` 聚合 + 体检,
//! `inf-vals` 单独定位退化值, `outliers` 离群 trace 检测.

mod config;

use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use sbem_berry::prelude::*;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// SBEM coarse offset 聚合与质检.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// JSON 配置文件路径.
    #[arg(long, default_value = "proofread.json")]
    config: PathBuf,

    /// 输出 debug 级日志.
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 聚合所有 coarse offset 与 tile id map, 然后定位退化值.
    Aggregate,

    /// 在既有聚合归档中定位退化值.
    InfVals,

    /// 对全部或指定 tile 做离群 trace 检测.
    Outliers {
        /// 参与局部统计的前向 section 个数.
        #[arg(long, default_value_t = 9)]
        n_before: usize,

        /// 参与局部统计的后向 section 个数.
        #[arg(long, default_value_t = 9)]
        n_after: usize,

        /// 判定离群的标准差倍数.
        #[arg(long, default_value_t = 5.0)]
        thresh: f64,

        /// 只处理这些 tile (空表示全部).
        #[arg(long, num_args = 0..)]
        trace_ids: Vec<TileId>,

        /// 禁用并行, 逐 tile 串行处理并增量追加报告.
        #[arg(long)]
        serial: bool,
    },
}

/// 归档读取通道数.
fn workers() -> NonZeroUsize {
    std::thread::available_parallelism()
        .map(|n| NonZeroUsize::new(n.get().min(64)).unwrap())
        .unwrap_or(NonZeroUsize::new(1).unwrap())
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .init()
        .expect("Logger init error");

    let root = config::root_dir_from_config_env_or_home(&cli.config);
    let exp = Experiment::new(&root);
    info!("实验根目录: {}", exp.root().display());

    match cli.command {
        Command::Aggregate => run_aggregate(&exp),
        Command::InfVals => run_inf_vals(&exp),
        Command::Outliers {
            n_before,
            n_after,
            thresh,
            trace_ids,
            serial,
        } => {
            let params = OutlierParams {
                n_before,
                n_after,
                thresh,
            };
            run_outliers(&exp, params, trace_ids, serial);
        }
    }
}

fn run_aggregate(exp: &Experiment) {
    let dirs = exp.list_section_dirs().expect("Listing section dirs error");
    info!("发现 {} 个 section 目录", dirs.len());

    backup_coarse_offsets(exp, &dirs).expect("Backing up coarse offsets error");
    backup_tile_id_maps(exp, &dirs).expect("Backing up tile id maps error");

    // 聚合后立刻做一遍退化值体检.
    run_inf_vals(exp);
}

fn run_inf_vals(exp: &Experiment) {
    let session =
        InspectSession::load(exp, workers()).expect("Opening aggregated archives error");
    let records = session.locate_inf_vals();
    info!("共定位到 {} 个退化值", records.len());

    let path = exp.path_inf_vals();
    write_inf_report(&path, &records).expect("Writing inf report error");
    info!("退化值报告已保存到: {}", path.display());
}

fn run_outliers(exp: &Experiment, params: OutlierParams, trace_ids: Vec<TileId>, serial: bool) {
    let session =
        InspectSession::load(exp, workers()).expect("Opening aggregated archives error");
    let path = exp.path_outliers();

    if !trace_ids.is_empty() {
        for tid in trace_ids {
            append_tile(&session, tid, params, &path);
        }
        return;
    }

    if serial {
        for tid in session.tile_ids_union() {
            append_tile(&session, tid, params, &path);
        }
        return;
    }

    // 并行 sweep: 各 tile 的结果先收集, 再由当前线程统一追加.
    let records = session.par_detect_all_outliers(params);
    info!("共标记 {} 条离群观测", records.len());
    if !records.is_empty() {
        append_outlier_report(&path, &records).expect("Writing outlier report error");
        info!("离群报告已追加到: {}", path.display());
    }
}

fn append_tile(session: &InspectSession, tid: TileId, params: OutlierParams, path: &Path) {
    let hits = session.detect_tile_outliers(tid, params);
    if hits.is_empty() {
        return;
    }
    info!("tile {tid}: 标记 {} 个 section", hits.len());
    let records: Vec<_> = hits.into_values().collect();
    append_outlier_report(path, &records).expect("Writing outlier report error");
}
