pub mod discovery;
pub mod responder;
pub mod transport;

pub use discovery::{Discovery, DiscoveryClient, Host, HostResolver, PollMode, Search, Step};
pub use responder::Responder;
pub use transport::DatagramCodec;
