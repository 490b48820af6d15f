use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

/// 服务端默认监听的主机地址
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// 服务端默认监听的端口号
pub const DEFAULT_PORT: u16 = 9980;

/// 连接层服务端详细配置结构体
///
/// 所有时间类字段以秒为单位；取值为 0 表示禁用对应机制
/// （例如 `max_connections = 0` 表示不做准入限制）。
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    /// 服务绑定的主机地址
    pub host: String,
    /// 服务监听的端口号
    pub port: u16,
    /// 同时在线连接数上限（0 表示不限制）
    pub max_connections: usize,
    /// 向空闲连接发送传输层 Ping 控制帧的周期（单位：秒，0 禁用）
    pub ws_ping_period_seconds: u64,
    /// 连接在无任何活动后被判定失联并强制关闭的阈值（单位：秒，0 禁用）
    pub ws_ping_timeout_seconds: u64,
    /// 保活巡查的执行间隔（单位：秒）
    pub keepalive_check_interval_seconds: u64,
    /// 已修改状态下触发的保存是否按自动保存上报给存储后端
    pub treat_modified_save_as_autosave: bool,
}

// 为 ServerConfig 实现 Default trait
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),     // 默认监听所有网络接口
            port: DEFAULT_PORT,                 // 默认监听 9980 端口
            max_connections: 20,                // 默认最多同时 20 条连接
            ws_ping_period_seconds: 2,          // 默认每 2 秒对空闲连接发 Ping
            ws_ping_timeout_seconds: 12,        // 默认 12 秒无活动判定失联
            keepalive_check_interval_seconds: 1, // 默认每秒巡查一次
            treat_modified_save_as_autosave: true, // 默认已修改保存按自动保存上报
        }
    }
}

/// 应用的主配置结构体
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AppConfig {
    /// 连接层服务端的相关配置
    pub server: ServerConfig,
    // 在此可以添加其他配置项，例如：
    // pub storage: StorageConfig,
}

// 全局静态应用配置实例
static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// 加载或创建应用配置文件
fn load_or_create_config() -> AppConfig {
    let config_file_path = get_config_file_path();

    // 尝试读取配置文件
    match fs::read_to_string(&config_file_path) {
        Ok(content) => {
            match serde_json::from_str::<AppConfig>(&content) {
                Ok(config) => {
                    info!("[配置模块] 已成功从配置文件 {:?} 加载应用配置。", config_file_path);
                    config
                }
                Err(e) => {
                    warn!(
                        "[配置模块] 警告：从 {:?} 反序列化配置失败: {}. 文件可能已损坏。将使用默认配置并尝试覆盖。",
                        config_file_path, e
                    );
                    let default_config = AppConfig::default();
                    save_config(&default_config, &config_file_path);
                    default_config
                }
            }
        }
        Err(e) => {
            info!(
                "[配置模块] 未在 {:?} 找到配置文件或读取时发生错误 (错误: {}). 将使用默认配置并尝试创建新文件。",
                config_file_path, e
            );
            let default_config = AppConfig::default();
            save_config(&default_config, &config_file_path);
            default_config
        }
    }
}

/// 获取配置文件路径（当前工作目录下的 app_settings.json）
fn get_config_file_path() -> PathBuf {
    let current_dir = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    current_dir.join("app_settings.json")
}

/// 保存配置到文件
fn save_config(config: &AppConfig, path: &PathBuf) {
    match serde_json::to_string_pretty(config) {
        Ok(content) => {
            if let Err(e) = fs::write(path, content) {
                warn!("[配置模块] 错误：将配置写入文件 {:?} 时失败: {}", path, e);
            } else {
                info!("[配置模块] 已成功将当前配置（可能是默认配置）保存到 {:?}.", path);
            }
        }
        Err(e) => {
            warn!("[配置模块] 错误：序列化配置信息以便保存时失败: {}", e);
        }
    }
}

/// 初始化全局应用配置
pub fn init_config() {
    let loaded_config = load_or_create_config();
    if APP_CONFIG.set(loaded_config).is_err() {
        warn!("[配置模块] 全局应用配置 APP_CONFIG 已被初始化，本次 init_config 调用未覆盖已有配置。请检查初始化流程。");
    }
    info!("[配置模块] 应用配置已成功初始化完毕。");
}

/// 获取已加载的全局应用配置
pub fn get_config() -> &'static AppConfig {
    APP_CONFIG.get().expect("[配置模块] 全局应用配置尚未初始化，请先调用 init_config()")
}
