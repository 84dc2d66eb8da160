//! 内核各组件共享的常量与配置

#![no_std]

pub mod config;
pub mod constant;
