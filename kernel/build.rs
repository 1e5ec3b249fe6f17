//! sv39-mm 构建脚本
//!
//! 这个脚本在编译前运行，负责：
//! 1. 解析工作空间根目录下的 Kernel.toml
//! 2. 生成配置代码到 OUT_DIR/config.rs
//! 3. 导出日志级别等环境变量

use std::env;
use std::fs;
use std::path::PathBuf;

/// 读取 `[section] key` 整数值，缺失时使用默认值
fn int_or(config: &toml::Value, section: &str, key: &str, default: i64) -> i64 {
    config
        .get(section)
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_integer())
        .unwrap_or(default)
}

/// 读取 `[section] key` 字符串值，缺失时使用默认值
fn str_or<'a>(config: &'a toml::Value, section: &str, key: &str, default: &'a str) -> &'a str {
    config
        .get(section)
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_str())
        .unwrap_or(default)
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"));
    let config_path = manifest_dir.join("../Kernel.toml");
    println!("cargo:rerun-if-changed={}", config_path.display());
    println!("cargo:rerun-if-changed=build.rs");

    // 配置文件缺失时回退到内置默认值
    let config = match fs::read_to_string(&config_path) {
        Ok(content) => toml::from_str::<toml::Value>(&content).expect("Kernel.toml 解析失败"),
        Err(_) => {
            println!("cargo:warning=Kernel.toml not found, using built-in defaults");
            toml::Value::Table(toml::map::Map::new())
        }
    };

    let log_level = str_or(&config, "debug", "log_level", "info");
    println!("cargo:rustc-env=SV39_MM_LOG_LEVEL={}", log_level);

    generate_config_code(&config);
}

fn generate_config_code(config: &toml::Value) {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));

    let code = format!(
        r#"// 此文件由 build.rs 根据 Kernel.toml 自动生成，请勿手动修改

// ============================================================
// 基本信息
// ============================================================

/// 名称
pub const KERNEL_NAME: &str = "{}";

/// 版本
pub const KERNEL_VERSION: &str = "{}";

// ============================================================
// 内存配置
// ============================================================

/// 物理内存起始地址 (KERNBASE)
pub const PHYS_MEMORY_BASE: usize = {:#x};

/// 物理内存大小（字节）
pub const PHYS_MEMORY_SIZE: usize = {:#x};

/// 内核代码段大小（字节）
pub const KERNEL_TEXT_SIZE: usize = {:#x};

/// 内核数据段大小（字节）
pub const KERNEL_DATA_SIZE: usize = {:#x};

// ============================================================
// 设备地址
// ============================================================

pub const UART0: usize = {:#x};
pub const VIRTIO0: usize = {:#x};
pub const CLINT: usize = {:#x};
pub const CLINT_SIZE: usize = {:#x};
pub const PLIC: usize = {:#x};
pub const PLIC_SIZE: usize = {:#x};

// ============================================================
// 调试配置
// ============================================================

/// 日志级别
pub const LOG_LEVEL: &str = "{}";
"#,
        str_or(config, "general", "name", "sv39-mm"),
        str_or(config, "general", "version", "0.1.0"),
        int_or(config, "memory", "phys_base", 0x8000_0000),
        int_or(config, "memory", "phys_size", 128 * 1024 * 1024),
        int_or(config, "memory", "kernel_text_size", 0x10_0000),
        int_or(config, "memory", "kernel_data_size", 0x10_0000),
        int_or(config, "devices", "uart0", 0x1000_0000),
        int_or(config, "devices", "virtio0", 0x1000_1000),
        int_or(config, "devices", "clint", 0x0200_0000),
        int_or(config, "devices", "clint_size", 0x1_0000),
        int_or(config, "devices", "plic", 0x0c00_0000),
        int_or(config, "devices", "plic_size", 0x40_0000),
        str_or(config, "debug", "log_level", "info"),
    );

    // 只有内容变化时才写入，避免每次编译都更新文件时间戳
    let config_file = out_dir.join("config.rs");
    let existing = fs::read_to_string(&config_file).unwrap_or_default();
    if existing != code {
        fs::write(&config_file, &code).expect("写入配置文件失败");
    }
}
