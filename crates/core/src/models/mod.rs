//! # 数据模型
//!
//! 任务代理的核心数据结构：任务及其状态机、执行结果、版本化文件包、
//! 执行器暂停标志、Worker遥测事件以及延迟队列作业。
//!
//! 所有时间字段使用 `DateTime<Utc>`；状态字段使用枚举并以大写字符串落库。

pub mod deferred;
pub mod executor;
pub mod package;
pub mod task;
pub mod task_result;
pub mod worker_event;

pub use deferred::*;
pub use executor::*;
pub use package::*;
pub use task::*;
pub use task_result::*;
pub use worker_event::*;
