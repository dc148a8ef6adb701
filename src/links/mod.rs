pub mod codegen;
pub mod registry;

pub use codegen::CodeGenerator;
pub use registry::{BatchFailure, BatchOutcome, LinkPage, LinkRegistry, ListOptions};
