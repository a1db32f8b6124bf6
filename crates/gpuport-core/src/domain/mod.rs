mod instance;

pub use instance::{Availability, GpuInstance, GpuInstanceBuilder, FIELD_NAMES};
