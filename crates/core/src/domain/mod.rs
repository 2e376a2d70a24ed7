pub mod analysis;
pub mod decision;
pub mod log;
pub mod request;
pub mod worker;
