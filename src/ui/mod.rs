pub mod icons;
pub mod progress;
pub mod report;

pub use progress::PipelineUi;
pub use report::{print_lessons, print_plan, print_report, print_status};
