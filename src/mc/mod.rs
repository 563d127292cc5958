pub mod buffer;
pub mod codec;
pub mod proto;
pub mod zlib;

pub use self::codec::MinecraftCodec;
pub use self::proto::{BlockRecord, Packet, PlayState};
