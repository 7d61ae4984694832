mod build;
mod generate;

pub use build::{BuildVariant, cmd_build};
pub use generate::cmd_generate;
