//! Task lists, batch script generation and submission strategies.

pub mod descriptor;
pub mod strategy;
pub mod tasks;

pub use descriptor::{
    ArrayRange, DescriptorGenerator, ResourceError, ResourceSpec, SubmissionDescriptor,
    TaskBinding, WorkflowSpec,
};
pub use strategy::{
    ArrayStrategy, ParallelStrategy, SequentialStrategy, Strategy, SubmissionStrategy,
    SubmitError, SubmitFailure,
};
pub use tasks::{TaskError, TaskList};
