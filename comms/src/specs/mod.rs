pub mod machine_learning;
pub mod report;
pub mod worker;
