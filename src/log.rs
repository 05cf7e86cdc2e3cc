use chrono::Local;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Level {
    /// 从配置字符串解析日志级别，无法识别时回退到 Info
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "debug" | "trace" => Level::Debug,
            "warn" | "warning" => Level::Warn,
            "error" => Level::Error,
            _ => Level::Info,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Level::Debug,
            2 => Level::Warn,
            3 => Level::Error,
            _ => Level::Info,
        }
    }
}

static MIN_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

/// 设置全局最低输出级别 (启动时由配置调用一次)
pub fn set_level(level: Level) {
    MIN_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn enabled(level: Level) -> bool {
    level >= Level::from_u8(MIN_LEVEL.load(Ordering::Relaxed))
}

/// 统一日志输出函数
/// 格式: [Time] [LEVEL] [Target] Message
pub fn print(level: Level, target: &str, args: std::fmt::Arguments) {
    if !enabled(level) {
        return;
    }

    let now = Local::now().format("%H:%M:%S");

    let gray = "\x1b[90m";
    let reset = "\x1b[0m";
    let cyan = "\x1b[36m";

    let (color, level_str) = match level {
        Level::Info => ("\x1b[32m", "INFO"),
        Level::Warn => ("\x1b[33m", "WARN"),
        Level::Error => ("\x1b[31m", "ERRO"),
        Level::Debug => ("\x1b[34m", "DEBG"),
    };

    let line = format!(
        "{}[{}] {}[{}] {} {}[{}]{} {}",
        gray, now, color, level_str, reset, cyan, target, reset, args
    );

    // 警告与错误走 stderr，方便与宿主的标准输出区分
    if level >= Level::Warn {
        eprintln!("{}", line);
    } else {
        println!("{}", line);
    }
}

#[macro_export]
macro_rules! info {
    (target: $target:expr, $($arg:tt)+) => (
        $crate::log::print($crate::log::Level::Info, $target, format_args!($($arg)+))
    );
    ($($arg:tt)+) => (
        $crate::log::print($crate::log::Level::Info, "Agent", format_args!($($arg)+))
    );
}

#[macro_export]
macro_rules! warn {
    (target: $target:expr, $($arg:tt)+) => (
        $crate::log::print($crate::log::Level::Warn, $target, format_args!($($arg)+))
    );
    ($($arg:tt)+) => (
        $crate::log::print($crate::log::Level::Warn, "Agent", format_args!($($arg)+))
    );
}

#[macro_export]
macro_rules! error {
    (target: $target:expr, $($arg:tt)+) => (
        $crate::log::print($crate::log::Level::Error, $target, format_args!($($arg)+))
    );
    ($($arg:tt)+) => (
        $crate::log::print($crate::log::Level::Error, "Agent", format_args!($($arg)+))
    );
}

#[macro_export]
macro_rules! debug {
    (target: $target:expr, $($arg:tt)+) => (
        $crate::log::print($crate::log::Level::Debug, $target, format_args!($($arg)+))
    );
    ($($arg:tt)+) => (
        $crate::log::print($crate::log::Level::Debug, "Agent", format_args!($($arg)+))
    );
}
