//! Bit-packed header codec.

pub mod bits;
mod header;

pub use header::{
    AddressHeader, DistanceVectorHeader, DynamicAddressingHeader, Header, Routing,
    TransportHeader, UpperHeader,
};
