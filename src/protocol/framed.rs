//! Length-Framed Reference Protocol
//!
//! ## Packet Frame
//!
//! ```text
//! +----------+-------------+------------------+
//! | id (u16) | length (u32)| body             |
//! | BE       | BE          | `length` bytes   |
//! +----------+-------------+------------------+
//! ```
//!
//! ## Compressed Block
//!
//! When output compression is on, each frame is encrypted (if enabled),
//! compressed on its own and sent as
//!
//! ```text
//! +----------------------+-------------------------+
//! | compressed len (u32) | codec block             |
//! +----------------------+-------------------------+
//! ```
//!
//! A frame never exceeds [`COMPRESS_BUFFER_SIZE`], so a single block always
//! decompresses into the receiver's plain scratch buffer.

use crate::compression::WorkspaceManager;
use crate::config::{COMPRESSOR_HEADER_SIZE, COMPRESS_BUFFER_SIZE};
use crate::connection::Connection;
use crate::packet::{Packet, RawPacket};
use crate::protocol::{Protocol, ProtocolError};
use crate::stream::InputStream;
use bytes::{Buf, BufMut, BytesMut};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Size of the id + length header in front of every packet body
pub const FRAME_HEADER_SIZE: usize = 6;

/// Largest packet body a frame may carry
pub const MAX_PACKET_SIZE: usize = COMPRESS_BUFFER_SIZE - FRAME_HEADER_SIZE;

/// Application callback for decoded packets.
pub trait PacketHandler: Send + Sync {
    fn handle(&self, connection: &mut Connection, packet: RawPacket) -> Result<(), ProtocolError>;
}

/// Sends every packet straight back to its sender.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl PacketHandler for EchoHandler {
    fn handle(&self, connection: &mut Connection, packet: RawPacket) -> Result<(), ProtocolError> {
        trace!(
            connection = connection.id(),
            packet = packet.id,
            size = packet.body.len(),
            "Echoing packet"
        );
        connection.send(&packet).map_err(|e| ProtocolError::Handler(e.to_string()))
    }
}

/// The reference [`Protocol`].
pub struct FramedProtocol {
    handler: Arc<dyn PacketHandler>,
    workspace: Arc<WorkspaceManager>,
}

impl std::fmt::Debug for FramedProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedProtocol")
            .field("workspace", &self.workspace)
            .finish()
    }
}

impl FramedProtocol {
    pub fn new(handler: Arc<dyn PacketHandler>, workspace: Arc<WorkspaceManager>) -> Self {
        Self { handler, workspace }
    }

    pub fn workspace(&self) -> &Arc<WorkspaceManager> {
        &self.workspace
    }

    /// Serializes one packet as header + body.
    pub fn encode_frame(packet: &dyn Packet) -> Result<BytesMut, ProtocolError> {
        let size = packet.size();
        if size > MAX_PACKET_SIZE {
            return Err(ProtocolError::PacketTooLarge {
                size,
                max: MAX_PACKET_SIZE,
            });
        }
        let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + size);
        frame.put_u16(packet.id());
        frame.put_u32(size as u32);
        packet.write(&mut frame);
        Ok(frame)
    }

    /// Takes one complete frame off `stream`.
    ///
    /// Returns `Ok(None)` when the stream holds only part of a frame.
    pub fn next_frame(stream: &mut InputStream) -> Result<Option<RawPacket>, ProtocolError> {
        let Some(mut header) = stream.peek(FRAME_HEADER_SIZE) else {
            return Ok(None);
        };
        let id = header.get_u16();
        let size = header.get_u32() as usize;

        if size > MAX_PACKET_SIZE {
            return Err(ProtocolError::PacketTooLarge {
                size,
                max: MAX_PACKET_SIZE,
            });
        }
        if stream.len() < FRAME_HEADER_SIZE + size {
            return Ok(None);
        }

        stream.skip(FRAME_HEADER_SIZE);
        let body = stream.read(size).unwrap_or_default();
        Ok(Some(RawPacket { id, body }))
    }
}

impl Protocol for FramedProtocol {
    fn command(&self, connection: &mut Connection, max_ops: u8) -> Result<(), ProtocolError> {
        for _ in 0..max_ops {
            let Some(packet) = Self::next_frame(connection.istream_mut())? else {
                break;
            };
            self.handler.handle(connection, packet)?;
        }
        Ok(())
    }

    fn send(&self, connection: &mut Connection, packet: &dyn Packet) -> Result<(), ProtocolError> {
        let mut frame = Self::encode_frame(packet)?;
        let ostream = connection.ostream_mut();

        if !ostream.compressor().is_enabled() {
            ostream.write(&frame)?;
            return Ok(());
        }

        ostream.encryptor_mut().apply(&mut frame);

        let work = self.workspace.local()?;
        let compressor = ostream.compressor().clone();
        let bound = compressor.codec().max_compressed_len(frame.len());

        // Header and block are composed in place at the tail of the queue.
        let used = ostream.write_raw_with(COMPRESSOR_HEADER_SIZE + bound, |block| {
            let (header, body) = block.split_at_mut(COMPRESSOR_HEADER_SIZE);
            let written = compressor.compress(&frame, body, &work)?;
            header.copy_from_slice(&(written as u32).to_be_bytes());
            Ok::<_, ProtocolError>(COMPRESSOR_HEADER_SIZE + written)
        })?;

        self.workspace.add_uncompress_size(frame.len() as u64);
        self.workspace
            .add_compress_size((used - COMPRESSOR_HEADER_SIZE) as u64);
        Ok(())
    }

    fn compress(
        &self,
        connection: &mut Connection,
        raw: &mut [u8],
        plain: &mut [u8],
    ) -> Result<(), ProtocolError> {
        let id = connection.id();
        let Some((compressed, input)) = connection.compress_streams() else {
            return Err(ProtocolError::MissingCompressStream);
        };

        let mut blocks = 0usize;
        loop {
            let Some(mut header) = compressed.peek(COMPRESSOR_HEADER_SIZE) else {
                break;
            };
            let block_len = COMPRESSOR_HEADER_SIZE + header.get_u32() as usize;
            if block_len > raw.len() {
                warn!(
                    connection = id,
                    size = block_len,
                    max = raw.len(),
                    "Compressed block exceeds scratch buffer"
                );
                return Err(ProtocolError::BlockTooLarge {
                    size: block_len,
                    max: raw.len(),
                });
            }
            let Some(block) = compressed.peek(block_len) else {
                break;
            };

            raw[..block_len].copy_from_slice(block);
            compressed.skip(block_len);

            let n = input
                .compressor()
                .decompress(&raw[COMPRESSOR_HEADER_SIZE..block_len], plain)?;
            input.push(&plain[..n])?;

            self.workspace.add_compress_size((block_len - COMPRESSOR_HEADER_SIZE) as u64);
            self.workspace.add_uncompress_size(n as u64);
            blocks += 1;
        }

        if blocks > 0 {
            debug!(connection = id, blocks, "Decompressed input blocks");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::Deflate;
    use bytes::Bytes;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        packets: Mutex<Vec<RawPacket>>,
    }

    impl PacketHandler for Recorder {
        fn handle(&self, _connection: &mut Connection, packet: RawPacket) -> Result<(), ProtocolError> {
            self.packets.lock().unwrap().push(packet);
            Ok(())
        }
    }

    fn workspace() -> Arc<WorkspaceManager> {
        Arc::new(WorkspaceManager::new(Arc::new(Deflate::default())))
    }

    fn ready_connection(protocol: Arc<FramedProtocol>) -> Connection {
        let protocol: Arc<dyn Protocol> = protocol;
        let mut connection = Connection::new();
        connection.init(Some(protocol)).unwrap();
        connection
    }

    #[test]
    fn test_encode_frame_layout() {
        let frame = FramedProtocol::encode_frame(&RawPacket::new(0x0102, Bytes::from_static(b"abc"))).unwrap();
        assert_eq!(&frame[..], &[0x01, 0x02, 0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_encode_frame_rejects_oversized() {
        let body = Bytes::from(vec![0u8; MAX_PACKET_SIZE + 1]);
        assert!(matches!(
            FramedProtocol::encode_frame(&RawPacket::new(1, body)),
            Err(ProtocolError::PacketTooLarge { .. })
        ));
    }

    #[test]
    fn test_next_frame_waits_for_whole_frame() {
        let mut stream = InputStream::new(64, 1024);
        stream.init();
        let frame = FramedProtocol::encode_frame(&RawPacket::new(5, Bytes::from_static(b"hello"))).unwrap();

        stream.push(&frame[..4]).unwrap();
        assert!(FramedProtocol::next_frame(&mut stream).unwrap().is_none());
        stream.push(&frame[4..8]).unwrap();
        assert!(FramedProtocol::next_frame(&mut stream).unwrap().is_none());
        stream.push(&frame[8..]).unwrap();

        let packet = FramedProtocol::next_frame(&mut stream).unwrap().unwrap();
        assert_eq!(packet, RawPacket::new(5, Bytes::from_static(b"hello")));
        assert!(stream.is_empty());
    }

    #[test]
    fn test_next_frame_rejects_oversized_length() {
        let mut stream = InputStream::new(64, 1024);
        stream.init();
        stream.push(&[0, 1, 0xff, 0xff, 0xff, 0xff]).unwrap();
        assert!(matches!(
            FramedProtocol::next_frame(&mut stream),
            Err(ProtocolError::PacketTooLarge { .. })
        ));
    }

    #[test]
    fn test_command_respects_max_ops() {
        let recorder = Arc::new(Recorder::default());
        let protocol = Arc::new(FramedProtocol::new(recorder.clone(), workspace()));
        let mut connection = ready_connection(Arc::clone(&protocol));

        for i in 0..5u16 {
            let frame = FramedProtocol::encode_frame(&RawPacket::new(i, Bytes::from_static(b"x"))).unwrap();
            connection.istream_mut().push(&frame).unwrap();
        }

        protocol.command(&mut connection, 3).unwrap();
        assert_eq!(recorder.packets.lock().unwrap().len(), 3);

        protocol.command(&mut connection, 3).unwrap();
        let packets = recorder.packets.lock().unwrap();
        assert_eq!(packets.len(), 5);
        let ids: Vec<u16> = packets.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_send_plain_writes_frame() {
        let protocol = Arc::new(FramedProtocol::new(Arc::new(EchoHandler), workspace()));
        let mut connection = ready_connection(Arc::clone(&protocol));

        protocol
            .send(&mut connection, &RawPacket::new(9, Bytes::from_static(b"hi")))
            .unwrap();
        assert_eq!(connection.ostream().as_slice(), &[0, 9, 0, 0, 0, 2, b'h', b'i']);
    }

    #[test]
    fn test_send_compressed_block_is_exact() {
        let workspace = workspace();
        let protocol = Arc::new(FramedProtocol::new(Arc::new(EchoHandler), Arc::clone(&workspace)));
        let mut sender = ready_connection(Arc::clone(&protocol));
        sender.compress_set_mode(crate::compression::CompressMode::Output);

        let first = RawPacket::new(1, Bytes::from(b"first frame ".repeat(40)));
        let second = RawPacket::new(2, Bytes::from_static(b"x"));
        protocol.send(&mut sender, &first).unwrap();
        protocol.send(&mut sender, &second).unwrap();

        let wire = sender.ostream().as_slice();
        assert_eq!(
            workspace.compress_size() as usize,
            wire.len() - 2 * COMPRESSOR_HEADER_SIZE
        );

        // Two back-to-back blocks, each exactly header + declared length.
        let mut offset = 0;
        let mut frames = Vec::new();
        for _ in 0..2 {
            let len = u32::from_be_bytes(wire[offset..offset + 4].try_into().unwrap()) as usize;
            let block = &wire[offset + COMPRESSOR_HEADER_SIZE..offset + COMPRESSOR_HEADER_SIZE + len];
            let mut plain = vec![0u8; COMPRESS_BUFFER_SIZE];
            let n = workspace.decompress(block, &mut plain).unwrap();
            frames.push(plain[..n].to_vec());
            offset += COMPRESSOR_HEADER_SIZE + len;
        }
        assert_eq!(offset, wire.len());
        assert_eq!(frames[0], FramedProtocol::encode_frame(&first).unwrap().to_vec());
        assert_eq!(frames[1], FramedProtocol::encode_frame(&second).unwrap().to_vec());
    }

    #[test]
    fn test_send_compressed_then_decompress() {
        let workspace = workspace();
        let recorder = Arc::new(Recorder::default());
        let protocol = Arc::new(FramedProtocol::new(recorder.clone(), Arc::clone(&workspace)));

        let mut sender = ready_connection(Arc::clone(&protocol));
        sender.compress_set_mode(crate::compression::CompressMode::Output);
        let body = Bytes::from(b"compress me please ".repeat(100));
        protocol.send(&mut sender, &RawPacket::new(4, body.clone())).unwrap();
        let wire = sender.ostream().as_slice().to_vec();
        assert!(wire.len() < body.len());
        assert!(workspace.uncompress_size() > 0);

        let mut receiver = ready_connection(Arc::clone(&protocol));
        receiver.compress_set_mode(crate::compression::CompressMode::Input);
        receiver
            .compress_streams()
            .unwrap()
            .0
            .push(&wire)
            .unwrap();

        let mut raw = vec![0u8; crate::config::UNCOMPRESS_BUFFER_SIZE];
        let mut plain = vec![0u8; COMPRESS_BUFFER_SIZE];
        protocol.compress(&mut receiver, &mut raw, &mut plain).unwrap();
        protocol.command(&mut receiver, 1).unwrap();

        assert_eq!(
            recorder.packets.lock().unwrap().as_slice(),
            &[RawPacket::new(4, body)]
        );
    }

    #[test]
    fn test_compress_rejects_block_larger_than_scratch() {
        let protocol = Arc::new(FramedProtocol::new(Arc::new(EchoHandler), workspace()));
        let mut connection = ready_connection(Arc::clone(&protocol));
        connection.compress_set_mode(crate::compression::CompressMode::Input);
        connection
            .compress_streams()
            .unwrap()
            .0
            .push(&100u32.to_be_bytes())
            .unwrap();

        let mut raw = vec![0u8; 50];
        let mut plain = vec![0u8; 50];
        assert!(matches!(
            protocol.compress(&mut connection, &mut raw, &mut plain),
            Err(ProtocolError::BlockTooLarge { size: 104, max: 50 })
        ));
    }

    #[test]
    fn test_compress_without_stream() {
        let protocol = Arc::new(FramedProtocol::new(Arc::new(EchoHandler), workspace()));
        let mut connection = ready_connection(Arc::clone(&protocol));
        let mut raw = [0u8; 8];
        let mut plain = [0u8; 8];
        assert!(matches!(
            protocol.compress(&mut connection, &mut raw, &mut plain),
            Err(ProtocolError::MissingCompressStream)
        ));
    }
}
