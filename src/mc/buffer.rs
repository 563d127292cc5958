use std::io;

use bytes::{Buf, BufMut, BytesMut};

const MAX_VAR_INT_LEN: usize = 5;

pub fn var_int_size(value: i32) -> usize {
    let mut value = value as u32;
    let mut size = 1;
    while value >= 0x80 {
        value >>= 7;
        size += 1;
    }
    size
}

fn truncated(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, format!("truncated {}", what))
}

pub trait MinecraftBufExt {
    fn has_complete_var_int(&self) -> bool;
    fn get_var_int(&mut self) -> io::Result<i32>;
    fn get_string(&mut self) -> io::Result<String>;
    fn get_u16_checked(&mut self) -> io::Result<u16>;
    fn get_f64_checked(&mut self) -> io::Result<f64>;
    fn get_f32_checked(&mut self) -> io::Result<f32>;
    fn get_bool(&mut self) -> io::Result<bool>;
}

impl MinecraftBufExt for BytesMut {
    fn has_complete_var_int(&self) -> bool {
        self.iter()
            .take(MAX_VAR_INT_LEN)
            .any(|byte| byte & 0x80 == 0)
    }

    fn get_var_int(&mut self) -> io::Result<i32> {
        let mut result = 0u32;
        for i in 0..MAX_VAR_INT_LEN {
            if !self.has_remaining() {
                return Err(truncated("VarInt"));
            }
            let byte = self.get_u8();
            result |= ((byte & 0x7f) as u32) << (i * 7);

            if byte & 0x80 == 0 {
                return Ok(result as i32);
            }
        }
        Err(io::Error::new(io::ErrorKind::InvalidData, "VarInt too long"))
    }

    fn get_string(&mut self) -> io::Result<String> {
        let len = self.get_var_int()?;
        if len < 0 || len as usize > self.remaining() {
            return Err(truncated("string"));
        }
        let data = self.split_to(len as usize);
        String::from_utf8(data.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn get_u16_checked(&mut self) -> io::Result<u16> {
        if self.remaining() < 2 {
            return Err(truncated("short"));
        }
        Ok(self.get_u16())
    }

    fn get_f64_checked(&mut self) -> io::Result<f64> {
        if self.remaining() < 8 {
            return Err(truncated("double"));
        }
        Ok(self.get_f64())
    }

    fn get_f32_checked(&mut self) -> io::Result<f32> {
        if self.remaining() < 4 {
            return Err(truncated("float"));
        }
        Ok(self.get_f32())
    }

    fn get_bool(&mut self) -> io::Result<bool> {
        if !self.has_remaining() {
            return Err(truncated("bool"));
        }
        Ok(self.get_u8() != 0)
    }
}

pub trait MinecraftBufMutExt {
    fn put_var_int(&mut self, value: i32);
    fn put_string(&mut self, value: &str);
}

impl<B: BufMut> MinecraftBufMutExt for B {
    fn put_var_int(&mut self, value: i32) {
        let mut value = value as u32;
        loop {
            let mut cur_byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                cur_byte |= 0x80;
            }
            self.put_u8(cur_byte);
            if value == 0 {
                break;
            }
        }
    }

    fn put_string(&mut self, value: &str) {
        self.put_var_int(value.len() as i32);
        self.put_slice(value.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_int_known_encodings() {
        let cases: [(i32, &[u8]); 5] = [
            (0, &[0x00]),
            (127, &[0x7f]),
            (128, &[0x80, 0x01]),
            (25565, &[0xdd, 0xc7, 0x01]),
            (-1, &[0xff, 0xff, 0xff, 0xff, 0x0f]),
        ];
        for (value, bytes) in cases {
            let mut buf = BytesMut::new();
            buf.put_var_int(value);
            assert_eq!(&buf[..], bytes);
            assert_eq!(var_int_size(value), bytes.len());
            assert_eq!(buf.get_var_int().unwrap(), value);
        }
    }

    #[test]
    fn truncated_reads_are_errors() {
        let mut buf = BytesMut::from(&[0x80u8][..]);
        assert!(!buf.has_complete_var_int());
        assert!(buf.get_var_int().is_err());

        let mut buf = BytesMut::new();
        buf.put_var_int(10);
        buf.put_slice(b"abc");
        assert!(buf.get_string().is_err());
    }
}
