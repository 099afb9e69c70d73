pub mod args;
pub mod collect;
pub mod continuous;
pub mod heads;
pub mod setup;
pub mod triggers;

pub use args::{parse_runtime_args, RunMode, RuntimeArgs};
pub use collect::run_collect;
pub use continuous::run_continuous;
pub use setup::ProbeContext;
pub use triggers::TriggerMode;
