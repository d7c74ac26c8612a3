//! 测试支持 crate
//!
//! 提供各子系统在宿主机 `cargo test` 下使用的 Mock 实现。
//!
//! 这里的类型只提供固有方法，不实现任何内核 crate 的 trait：
//! 各 crate 在测试中用本地包装类型实现自己的 trait，从而避免循环依赖。

pub mod mock;
