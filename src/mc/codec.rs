use std::io;

use bytes::{Buf, BufMut, BytesMut};
use log::trace;
use tokio_util::codec::{Decoder, Encoder};

use super::{
    buffer::{var_int_size, MinecraftBufExt, MinecraftBufMutExt},
    proto::{Packet, PlayState},
    zlib,
};
use crate::world::{Chunk, SECTIONS_PER_CHUNK};

const MAX_PACKET_LEN: usize = 2 * 1024 * 1024;
const LIGHT_BYTES: usize = 2048;

enum DecoderState {
    Header,
    Body(usize),
}

pub struct MinecraftCodec {
    state: PlayState,
    compression_threshold: usize,
    decoder_state: DecoderState,
}

impl MinecraftCodec {
    pub fn new() -> MinecraftCodec {
        MinecraftCodec {
            state: PlayState::Handshake,
            compression_threshold: 0,
            decoder_state: DecoderState::Header,
        }
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn set_state(&mut self, state: PlayState) {
        self.state = state;
    }

    pub fn set_compression_threshold(&mut self, threshold: usize) {
        self.compression_threshold = threshold;
    }

    fn decode_packet(&self, packet_id: i32, buf: &mut BytesMut) -> io::Result<Option<Packet>> {
        match self.state {
            PlayState::Handshake => Self::decode_handshake_packet(packet_id, buf),
            PlayState::Status => Ok(None),
            PlayState::Login => Self::decode_login_packet(packet_id, buf),
            PlayState::Play => Self::decode_play_packet(packet_id, buf),
        }
    }

    fn decode_handshake_packet(packet_id: i32, buf: &mut BytesMut) -> io::Result<Option<Packet>> {
        if packet_id != 0x00 {
            return Ok(None);
        }

        let protocol_version = buf.get_var_int()?;
        let server_address = buf.get_string()?;
        let server_port = buf.get_u16_checked()?;
        let next_state = buf.get_var_int()?;
        let next_state = PlayState::from_next_state(next_state).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Invalid next state {}", next_state),
            )
        })?;

        Ok(Some(Packet::C00Handshake {
            protocol_version,
            server_address,
            server_port,
            next_state,
        }))
    }

    fn decode_login_packet(packet_id: i32, buf: &mut BytesMut) -> io::Result<Option<Packet>> {
        Ok(match packet_id {
            0x00 => Some(Packet::C00LoginStart {
                username: buf.get_string()?,
            }),
            _ => None,
        })
    }

    fn decode_play_packet(packet_id: i32, buf: &mut BytesMut) -> io::Result<Option<Packet>> {
        Ok(match packet_id {
            0x00 => Some(Packet::C00KeepAlive {
                id: buf.get_var_int()?,
            }),
            0x04 => Some(Packet::C04PlayerPos {
                x: buf.get_f64_checked()?,
                y: buf.get_f64_checked()?,
                z: buf.get_f64_checked()?,
                on_ground: buf.get_bool()?,
            }),
            0x06 => Some(Packet::C06PlayerPosRot {
                x: buf.get_f64_checked()?,
                y: buf.get_f64_checked()?,
                z: buf.get_f64_checked()?,
                yaw: buf.get_f32_checked()?,
                pitch: buf.get_f32_checked()?,
                on_ground: buf.get_bool()?,
            }),
            _ => None,
        })
    }

    fn encode_body(&self, packet: &Packet, buf: &mut BytesMut) {
        match packet {
            Packet::C00Handshake {
                protocol_version,
                server_address,
                server_port,
                next_state,
            } => {
                buf.put_var_int(*protocol_version);
                buf.put_string(server_address);
                buf.put_u16(*server_port);
                buf.put_var_int(match next_state {
                    PlayState::Status => 1,
                    _ => 2,
                });
            }
            Packet::C00LoginStart { username } => buf.put_string(username),
            Packet::S02LoginSuccess { uuid, username } => {
                buf.put_string(uuid);
                buf.put_string(username);
            }
            Packet::S03LoginCompression { threshold } => buf.put_var_int(*threshold),
            Packet::C00KeepAlive { id } | Packet::S00KeepAlive { id } => buf.put_var_int(*id),
            Packet::S01JoinGame {
                entity_id,
                game_mode,
                dimension,
                difficulty,
                max_players,
                level_type,
                reduced_debug_info,
            } => {
                buf.put_i32(*entity_id);
                buf.put_u8(*game_mode);
                buf.put_i8(dimension.id() as i8);
                buf.put_u8(*difficulty);
                buf.put_u8(*max_players);
                buf.put_string(level_type);
                buf.put_u8(*reduced_debug_info as u8);
            }
            Packet::C04PlayerPos { x, y, z, on_ground } => {
                buf.put_f64(*x);
                buf.put_f64(*y);
                buf.put_f64(*z);
                buf.put_u8(*on_ground as u8);
            }
            Packet::C06PlayerPosRot {
                x,
                y,
                z,
                yaw,
                pitch,
                on_ground,
            } => {
                buf.put_f64(*x);
                buf.put_f64(*y);
                buf.put_f64(*z);
                buf.put_f32(*yaw);
                buf.put_f32(*pitch);
                buf.put_u8(*on_ground as u8);
            }
            Packet::S07Respawn {
                dimension,
                difficulty,
                game_mode,
                level_type,
            } => {
                buf.put_i32(dimension.id());
                buf.put_u8(*difficulty);
                buf.put_u8(*game_mode);
                buf.put_string(level_type);
            }
            Packet::S08SetPlayerPosition {
                x,
                y,
                z,
                yaw,
                pitch,
                flags,
            } => {
                buf.put_f64(*x);
                buf.put_f64(*y);
                buf.put_f64(*z);
                buf.put_f32(*yaw);
                buf.put_f32(*pitch);
                buf.put_u8(*flags);
            }
            Packet::S21ChunkData {
                x,
                z,
                skylight,
                chunk,
            } => {
                buf.put_i32(*x);
                buf.put_i32(*z);
                buf.put_u8(1); // ground-up continuous
                match chunk {
                    Some(chunk) => {
                        let mask = chunk.section_mask();
                        buf.put_u16(mask);
                        let data = Self::encode_chunk_sections(chunk, mask, *skylight);
                        buf.put_var_int(data.len() as i32);
                        buf.put_slice(&data);
                    }
                    None => {
                        buf.put_u16(0);
                        buf.put_var_int(0);
                    }
                }
            }
            Packet::S22MultiBlockChange {
                chunk_x,
                chunk_z,
                records,
            } => {
                buf.put_i32(*chunk_x);
                buf.put_i32(*chunk_z);
                buf.put_var_int(records.len() as i32);
                for record in records {
                    buf.put_u8((record.x & 0x0f) << 4 | (record.z & 0x0f));
                    buf.put_u8(record.y);
                    buf.put_var_int(record.block_state as i32);
                }
            }
            Packet::S23BlockChange {
                location,
                block_state,
            } => {
                buf.put_u64(location.to_u64());
                buf.put_var_int(*block_state as i32);
            }
        }
    }

    /// Block states, then block light, then sky light (only where the
    /// dimension has a sky), then the biome map.
    fn encode_chunk_sections(chunk: &Chunk, mask: u16, skylight: bool) -> BytesMut {
        let present = (0..SECTIONS_PER_CHUNK)
            .filter(|i| mask & (1 << i) != 0)
            .collect::<Vec<usize>>();

        let mut data = BytesMut::with_capacity(present.len() * (8192 + 2 * LIGHT_BYTES) + 256);
        for &i in &present {
            for state in chunk.section(i).data.iter() {
                data.put_u16_le(*state);
            }
        }
        for _ in &present {
            data.put_bytes(0x00, LIGHT_BYTES);
        }
        if skylight {
            for _ in &present {
                data.put_bytes(0xff, LIGHT_BYTES);
            }
        }
        data.put_slice(&chunk.biomes);
        data
    }
}

impl Default for MinecraftCodec {
    fn default() -> Self {
        MinecraftCodec::new()
    }
}

impl Decoder for MinecraftCodec {
    type Item = Packet;

    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.decoder_state {
                DecoderState::Header => {
                    if !src.has_complete_var_int() {
                        return Ok(None);
                    }

                    let packet_len = src.get_var_int()?;
                    if packet_len < 0 || packet_len as usize > MAX_PACKET_LEN {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("Packet of length {} rejected.", packet_len),
                        ));
                    }

                    self.decoder_state = DecoderState::Body(packet_len as usize);
                }
                DecoderState::Body(packet_len) => {
                    if src.remaining() < packet_len {
                        src.reserve(packet_len - src.remaining());
                        return Ok(None);
                    }
                    self.decoder_state = DecoderState::Header;

                    let mut payload = src.split_to(packet_len);
                    if self.compression_threshold > 0 {
                        let size_uncompressed = payload.get_var_int()?;
                        if size_uncompressed > 0 {
                            payload = zlib::decompress(&payload, size_uncompressed as usize)?;
                        }
                    }

                    let packet_id = payload.get_var_int()?;
                    trace!("Decoding packet #{} with length {}", packet_id, packet_len);

                    if let Some(packet) = self.decode_packet(packet_id, &mut payload)? {
                        return Ok(Some(packet));
                    }
                    trace!("Skipping unhandled packet #{}", packet_id);
                }
            }
        }
    }
}

impl Encoder<Packet> for MinecraftCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut body = BytesMut::new();
        body.put_var_int(item.id());
        self.encode_body(&item, &mut body);

        if self.compression_threshold == 0 {
            dst.put_var_int(body.len() as i32);
            dst.put_slice(&body);
        } else if body.len() >= self.compression_threshold {
            let compressed = zlib::compress(&body)?;
            let data_len = body.len() as i32;
            dst.put_var_int((var_int_size(data_len) + compressed.len()) as i32);
            dst.put_var_int(data_len);
            dst.put_slice(&compressed);
        } else {
            dst.put_var_int((var_int_size(0) + body.len()) as i32);
            dst.put_var_int(0);
            dst.put_slice(&body);
        }
        Ok(())
    }
}
