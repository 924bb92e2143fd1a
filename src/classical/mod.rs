//! Classical packet engine: links, buffers, fragmentation and routing.

mod connection;
mod exchange;
mod host;
mod inbox;
mod interface;
mod packet;
mod router;

pub use connection::{Connection, LinkEnd};
pub use exchange::{InternetExchange, RoutingGraph};
pub use host::{ClassicalHost, ReceivedMessage};
pub use inbox::Inbox;
pub use interface::Interfaces;
pub use packet::{ClassicDataPacket, FragmentHeader, Reassembler};
pub use router::ClassicalRouter;
