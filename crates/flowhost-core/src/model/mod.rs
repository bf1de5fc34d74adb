mod instance;
mod quota;
mod sample;

pub use instance::{CreateRequest, Instance, InstanceStatus};
pub use quota::{Plan, Quota};
pub use sample::ResourceSample;
