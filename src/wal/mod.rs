mod log_manager;
mod log_record;
mod log_recovery;

pub use log_manager::*;
pub use log_record::*;
pub use log_recovery::*;
