//! Network layer: routing, forwarding, and dynamic addressing.

mod addressing;
mod nodes;
mod router;
mod routing;

pub use addressing::{AddressingOutcome, DynamicAddressing};
pub use nodes::{NodeDirectory, random_address};
pub use router::{DropReason, PacketOutcome, Router};
pub use routing::{AdvertisementOutcome, RouteEntry, RouteTable};
