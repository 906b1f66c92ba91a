//! 运行配置.

use serde::Deserialize;
use std::env;
use std::path::Path;

/// 质检流水线的运行配置.
#[derive(Debug, Deserialize)]
pub struct ProofreadConfig {
    /// 实验根目录 (采集解析阶段的输出目录).
    pub sbem_root_dir: String,
}

/// 配置加载错误.
#[derive(Debug)]
pub enum ConfigError {
    /// 底层 I/O 错误.
    Io(std::io::Error),

    /// JSON 解析错误.
    Json(serde_json::Error),
}

impl ProofreadConfig {
    /// 从 JSON 配置文件加载.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&text).map_err(ConfigError::Json)
    }
}

/// 获取实验根目录.
///
/// 1. 若 `config_path` 存在, 用其中的 `sbem_root_dir`;
/// 2. 否则, 若环境变量 `$SBEM_ROOT_DIR` 非空, 则返回其值;
/// 3. 否则, 退回 `$HOME/sbem`.
pub fn root_dir_from_config_env_or_home(config_path: &Path) -> String {
    if config_path.exists() {
        return ProofreadConfig::open(config_path)
            .expect("Loading pipeline config error")
            .sbem_root_dir;
    }
    if let Ok(d) = env::var("SBEM_ROOT_DIR") {
        if !d.is_empty() {
            return d;
        }
    }
    let mut home = dirs::home_dir().expect("无法确定用户主目录");
    home.push("sbem");
    home.to_string_lossy().into_owned()
}
