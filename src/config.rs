//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ARBITER__*` 覆盖（双下划线表示嵌套，如 `ARBITER__AUTHORIZATION__MODE=manual`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub arbiter: ArbiterSection,
    pub authorization: AuthorizationSection,
    pub broadcast: BroadcastSection,
}

/// [arbiter] 段：调度器的并发与时序
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArbiterSection {
    /// 节点集合相交的策略串行执行
    pub node_scoped_serialization: bool,
    /// 单次处理器调用超时（秒），0 表示不限
    pub handler_timeout_secs: u64,
    /// 同时执行的活动上限
    pub max_concurrent_activities: usize,
    /// 持有节点锁时是否等待序列最后一个活动的延迟
    pub honor_trailing_delay: bool,
}

impl Default for ArbiterSection {
    fn default() -> Self {
        Self {
            node_scoped_serialization: true,
            handler_timeout_secs: 30,
            max_concurrent_activities: 8,
            honor_trailing_delay: true,
        }
    }
}

/// 授权方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationMode {
    /// 全部自动应用
    #[default]
    Automatic,
    /// 非评估员提交的批次都要等待人工批准
    Manual,
    /// 仅 gated_reasons 中的原因需要批准
    PerReason,
}

/// 待批批次超时后的处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PendingTimeoutAction {
    #[default]
    Reject,
    Apply,
}

/// [authorization] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthorizationSection {
    pub mode: AuthorizationMode,
    pub gated_reasons: Vec<String>,
    /// 未设置时批次可以无限期等待
    pub pending_timeout_secs: Option<u64>,
    pub on_pending_timeout: PendingTimeoutAction,
    /// 会话结束时拒绝全部待批批次
    pub reject_pending_on_shutdown: bool,
    /// 超时检查间隔（秒）
    pub sweep_interval_secs: u64,
}

impl Default for AuthorizationSection {
    fn default() -> Self {
        Self {
            mode: AuthorizationMode::Automatic,
            gated_reasons: Vec::new(),
            pending_timeout_secs: None,
            on_pending_timeout: PendingTimeoutAction::Reject,
            reject_pending_on_shutdown: true,
            sweep_interval_secs: 5,
        }
    }
}

/// [broadcast] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BroadcastSection {
    /// 广播通道容量；慢订阅者超出后丢失旧事件
    pub capacity: usize,
}

impl Default for BroadcastSection {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

/// 从 config 目录加载配置，环境变量 ARBITER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ARBITER__*（双下划线表示嵌套键，gated_reasons 用逗号分隔）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ARBITER")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("authorization.gated_reasons"),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
