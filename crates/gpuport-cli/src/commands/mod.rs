mod run;
mod validate;

pub use run::{run, ProviderReport, RunReport};
pub use validate::{validate, ValidationReport};
