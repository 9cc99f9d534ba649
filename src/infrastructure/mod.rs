pub mod bluetooth;
pub mod exchange;
pub mod logging;
