//! # 限流模块
//!
//! 请求热路径上的准入控制：全局限流器加按客户端 IP 惰性创建的限流器，
//! 两者都通过才放行。白名单中的 IP 直接跳过检查。
//!
//! 支持两种可互换的算法（由配置选择）：
//!
//! - **令牌桶 (token_bucket)**: 容量 C、速率 r，每次取整秒补充令牌
//! - **滑动窗口 (sliding_window)**: 窗口 W 内最多 L 个请求
//!
//! 每个限流器内部只有一段很短的临界区；按 IP 的映射采用读写锁，
//! 读取已有限流器走共享锁，只有首次插入才拿独占锁。

pub mod limiters; // 令牌桶与滑动窗口实现
pub mod manager; // 全局 + 按 IP 的限流管理

pub use limiters::{RateLimiter, SlidingWindow, TokenBucket};
pub use manager::{RateLimitAlgorithm, RateLimitStats, RateLimiterConfig, RateLimiterManager};
