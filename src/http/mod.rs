pub mod handler;
pub mod pool;
pub mod traced_connector;
pub mod traced_io;
