//! 内核日志设施
//!
//! 日志宏将 [`Record`] 交给全局安装的 [`Log`] 实现，由后者决定输出到哪里。
//! 过滤等级在编译期由环境变量 `KERNEL_CLOG` 决定，未设置时日志全部关闭。

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod macros;
mod level;

pub use level::{Level, LevelFilter, CLOG};

use core::fmt::{self, Arguments, Write};

use anstyle::{AnsiColor, Reset};
use spin::Once;

/// 一条日志记录
#[derive(Clone, Debug)]
pub struct Record<'a> {
    level: Level,
    args: Arguments<'a>,
}

impl<'a> Record<'a> {
    #[inline]
    pub fn new(level: Level, args: Arguments<'a>) -> Self {
        Self { level, args }
    }

    /// 消息内容
    #[inline]
    pub fn args(&self) -> &Arguments<'a> {
        &self.args
    }

    /// 消息的日志等级
    #[inline]
    pub fn level(&self) -> Level {
        self.level
    }
}

/// 日志的实际输出者，由使用者在启动时安装
pub trait Log: Sync {
    fn log(&self, record: &Record<'_>);
}

pub static LOGGER: Once<&'static dyn Log> = Once::new();

pub fn init(logger: &'static dyn Log) {
    LOGGER.call_once(|| logger);
}

/// 渲染一条记录，即带颜色的日志级别如 `[ INFO]`，后跟消息本身
pub fn write_record(writer: &mut impl Write, record: &Record<'_>) -> fmt::Result {
    let color = match record.level() {
        Level::Error => AnsiColor::Red,
        Level::Warn => AnsiColor::BrightYellow,
        Level::Info => AnsiColor::Blue,
        Level::Debug => AnsiColor::Green,
        Level::Trace => AnsiColor::BrightBlack,
    };
    writeln!(
        writer,
        "{}[{:>5}]{} {}",
        color.render_fg(),
        record.level(),
        Reset.render(),
        record.args()
    )
}

/// 宏展开处已按 [`CLOG`] 过滤，这里只负责分发
#[inline]
#[doc(hidden)]
pub fn log_impl(level: Level, args: Arguments<'_>) {
    if let Some(logger) = LOGGER.get() {
        logger.log(&Record::new(level, args));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Capture {
        buf: spin::mutex::SpinMutex<String>,
    }

    impl Log for Capture {
        fn log(&self, record: &Record<'_>) {
            write_record(&mut *self.buf.lock(), record).unwrap();
        }
    }

    // `LOGGER` 只能安装一次，本模块的测试共用一个汇集点
    static SINK: Capture = Capture {
        buf: spin::mutex::SpinMutex::new(String::new()),
    };

    #[test]
    fn record_renders_padded_level_and_message() {
        let mut out = String::new();
        write_record(
            &mut out,
            &Record::new(Level::Info, format_args!("{} slots ready", 8)),
        )
        .unwrap();
        assert!(out.contains("[ INFO]"));
        assert!(out.contains("8 slots ready"));
        assert!(out.ends_with('\n'));

        out.clear();
        write_record(&mut out, &Record::new(Level::Error, format_args!("swap full"))).unwrap();
        assert!(out.contains("[ERROR]"));
    }

    #[test]
    fn dispatch_reaches_installed_logger() {
        init(&SINK);
        log_impl(Level::Warn, format_args!("one frame left"));
        assert!(SINK.buf.lock().contains("one frame left"));
    }

    #[test]
    fn macros_honor_compile_time_filter() {
        init(&SINK);
        info!("resident pages flushed");
        let logged = SINK.buf.lock().contains("resident pages flushed");
        assert_eq!(logged, Level::Info <= CLOG);
    }
}
