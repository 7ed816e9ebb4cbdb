pub mod batch;
pub mod client_tracking;
pub mod deadline;
pub mod dispatch;
pub mod sqs_records;
