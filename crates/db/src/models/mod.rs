pub mod company;
pub mod contract;
pub mod project;
pub mod task;
