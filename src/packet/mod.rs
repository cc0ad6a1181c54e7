//! Packets
//!
//! The connection core does not define a wire format; it only needs to know
//! that a packet has an id, a size, and can write itself into a buffer.
//! [`RawPacket`] is the opaque carrier used when the body is already bytes.
//!
//! [`PacketAsync`] is the unit of deferred delivery: a packet queued
//! together with the id it was produced for and a flag word telling the
//! sender what to do after delivering it.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Something that can be serialized into an output stream.
pub trait Packet: Send + fmt::Debug {
    /// Packet type id.
    fn id(&self) -> u16;

    /// Serialized body size in bytes.
    fn size(&self) -> usize;

    /// Appends the body to `buf`.
    fn write(&self, buf: &mut BytesMut);
}

/// A packet whose body is already serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub id: u16,
    pub body: Bytes,
}

impl RawPacket {
    pub fn new(id: u16, body: impl Into<Bytes>) -> Self {
        Self {
            id,
            body: body.into(),
        }
    }
}

impl Packet for RawPacket {
    fn id(&self) -> u16 {
        self.id
    }

    fn size(&self) -> usize {
        self.body.len()
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.body);
    }
}

bitflags! {
    /// What to do with a connection after an async packet is delivered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlag: u32 {
        const NONE = 0;
        /// Disconnect once the packet is sent
        const DISCONNECT = 1 << 0;
        /// Remove the connection from its manager once the packet is sent
        const REMOVE = 1 << 1;
    }
}

/// A packet queued for later delivery.
///
/// Dropping it releases the packet it owns.
#[derive(Debug, Default)]
pub struct PacketAsync {
    pub packet: Option<Box<dyn Packet>>,
    pub packet_id: u16,
    pub flag: PacketFlag,
}

impl PacketAsync {
    pub fn new(packet: Box<dyn Packet>, packet_id: u16, flag: PacketFlag) -> Self {
        Self {
            packet: Some(packet),
            packet_id,
            flag,
        }
    }

    /// Takes the packet out, leaving the slot empty.
    pub fn take(&mut self) -> Option<Box<dyn Packet>> {
        self.packet.take()
    }

    /// Releases the packet and resets id and flag.
    pub fn reset(&mut self) {
        self.packet = None;
        self.packet_id = 0;
        self.flag = PacketFlag::NONE;
    }

    pub fn is_empty(&self) -> bool {
        self.packet.is_none()
    }
}
