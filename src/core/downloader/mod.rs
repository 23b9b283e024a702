pub mod manager;
pub mod task;
pub mod throttle;

pub use manager::{ensure_free_space, DownloadManager};
pub use task::{staging_path_for, DownloadTask, PublishedPath};
pub use throttle::Throttle;
