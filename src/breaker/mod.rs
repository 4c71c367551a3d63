//! # 熔断器模块
//!
//! 每个后端 URL 对应一个独立的三态熔断器（CLOSED / OPEN / HALF_OPEN），
//! 在请求准入阶段过滤故障后端，并根据调用结果驱动状态转换。
//!
//! ## 状态机规则
//!
//! - **CLOSED → OPEN**: 连续失败数达到阈值，或请求数足够时错误率超标
//! - **OPEN → HALF_OPEN**: 超过 open_timeout 后的下一次准入检查触发
//! - **HALF_OPEN → CLOSED**: 连续成功达到 half_open_max_calls
//! - **HALF_OPEN → OPEN**: 任意一次失败立即回到 OPEN
//!
//! 纯阈值黑名单容易震荡；HALF_OPEN 探测阶段以有限的代价检测恢复。

pub mod circuit; // 单个熔断器状态机
pub mod fleet; // 按 URL 管理的熔断器集合

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitBreakerStats};
pub use fleet::BreakerFleet;
