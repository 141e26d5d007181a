//! 运行时状态模块
//!
//! 管理应用状态、任务注册表和地址簿

pub mod address_book;
pub mod app_state;
pub mod job;
pub mod registry;

pub use address_book::AddressBook;
pub use app_state::AppState;
pub use job::Job;
pub use registry::JobRegistry;
