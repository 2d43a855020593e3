pub mod dispatch;
pub mod evictor;
pub mod pool;
pub mod store;
