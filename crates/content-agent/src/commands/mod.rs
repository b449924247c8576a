pub mod format;
pub mod history;
pub mod online;
pub mod plan;
pub mod run;
pub mod status;
pub mod sync;
