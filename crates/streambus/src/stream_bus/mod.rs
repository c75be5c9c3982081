pub mod ports;

mod memory;
mod redis_impl;

pub use memory::MemoryStreamBus;
pub use redis_impl::RedisStreamBus;
