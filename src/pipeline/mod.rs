pub mod cancel;
pub mod pool;
pub mod retry;
