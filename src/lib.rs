pub mod causal_kv;
pub mod clock;
pub mod net;
pub mod server;
