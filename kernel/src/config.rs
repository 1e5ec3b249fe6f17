//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 构建期配置
//!
//! 常量由 build.rs 根据 Kernel.toml 生成

include!(concat!(env!("OUT_DIR"), "/config.rs"));

/// 将配置中的日志级别转换为 `log::LevelFilter`
///
/// 无法识别的字符串回退到 `Info`
pub fn log_level_filter() -> log::LevelFilter {
    match LOG_LEVEL {
        "off" => log::LevelFilter::Off,
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    }
}
