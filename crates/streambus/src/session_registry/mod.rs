pub mod ports;

mod memory;
mod redis_impl;

pub use memory::MemorySessionRegistry;
pub use redis_impl::RedisSessionRegistry;
