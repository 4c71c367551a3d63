//! # 后端监控模块
//!
//! 本模块负责后端注册表与健康监控，持续观测每个后端的存活状态、
//! 延迟与错误率，为路由决策提供数据来源。
//!
//! ## 健康检查功能
//!
//! - 每个周期并发探测所有后端的 `/health` 端点
//! - 延迟与错误率采用 EMA 平滑（可配置 α 因子）
//! - 存活标志严格取自最近一次探测结果，不做平滑
//! - 探测完成后通过有界通道发布指标快照（容量 10，满则丢弃）
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use drover::monitor::HealthMonitor;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let backends = vec!["http://localhost:8080".to_string()];
//! let monitor = Arc::new(HealthMonitor::new(
//!     &backends,
//!     Duration::from_secs(5),
//!     0.3,
//!     Duration::from_secs(10),
//! ));
//!
//! monitor.start_polling(CancellationToken::new());
//! let snapshot = monitor.snapshot().await;
//! println!("观测到 {} 个后端", snapshot.len());
//! # }
//! ```

pub mod health; // 健康探测循环
pub mod registry; // 后端注册表与 EMA 状态

pub use health::HealthMonitor;
pub use registry::BackendRegistry;
