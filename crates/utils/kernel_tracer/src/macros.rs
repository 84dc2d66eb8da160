//! 日志宏。
//!
//! 等级过滤在宏展开处用 `CLOG` 常量完成，被滤掉的调用整个
//! 折叠掉，连 `format_args!` 都不会构造。

#[macro_export]
macro_rules! log {
    // log!(Level::Info, "swapped {} pages", n);
    ($level:expr, $($arg:tt)+) => {{
        let level = $level;
        if level <= $crate::CLOG {
            $crate::log_impl(level, ::core::format_args!($($arg)+));
        }
    }};
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => ($crate::log!($crate::Level::Error, $($arg)+))
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => ($crate::log!($crate::Level::Warn, $($arg)+))
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => ($crate::log!($crate::Level::Info, $($arg)+))
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => ($crate::log!($crate::Level::Debug, $($arg)+))
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)+) => ($crate::log!($crate::Level::Trace, $($arg)+))
}
