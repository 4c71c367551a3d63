//! # 反向代理模块
//!
//! 请求入口：限流 → 选择后端（存活 ∩ 熔断器放行，再按策略挑选）→
//! 转发 → 将结果上报熔断器。转发失败时在不同后端间重试。
//!
//! ## 负载均衡算法
//!
//! - **轮询 (round_robin)**: 原子计数器对候选列表取模
//! - **加权轮询 (weighted_round_robin)**: 按优化器输出的自适应权重分配
//! - **最少连接 (least_connections)**: 本版本等价于轮询
//!
//! 转发请求携带 `X-Forwarded-Host`、`X-Origin-Host`、`X-Forwarded-Proto`
//! 与 `X-Forwarded-For`；上游 5xx 既计入熔断器失败，也会在最后一次尝试
//! 时原样转发给客户端。

pub mod handler; // 请求分发与重试
pub mod selector; // 负载均衡策略
pub mod server; // HTTP 服务器与优雅停机

pub use handler::Dispatcher;
pub use selector::BackendSelector;
pub use server::ProxyServer;
