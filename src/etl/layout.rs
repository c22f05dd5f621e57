/// Layout Module
///
/// Cursor over instruction bytes for programs with a little-endian, Borsh-style
/// binary layout. Every read checks the remaining length so a truncated or
/// malformed instruction surfaces as a `DecodeError` instead of a panic.
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;

use crate::error::DecodeError;

pub struct LayoutReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> LayoutReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::InsufficientBytes { needed: len, remaining: self.remaining() });
        }
        let bytes = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(DecodeError::InvalidEnumTag { type_name: "bool", tag }),
        }
    }

    /// 32-byte public key, rendered base58
    pub fn read_pubkey(&mut self) -> Result<String, DecodeError> {
        Ok(Pubkey::new_from_array(self.read_array::<32>()?).to_string())
    }

    /// u32 length prefix followed by UTF-8 bytes
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    /// Borsh option: a 0/1 tag followed by the value when present
    pub fn read_option<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> Result<T, DecodeError>,
    ) -> Result<Option<T>, DecodeError> {
        match self.read_u8()? {
            0 => Ok(None),
            1 => read(self).map(Some),
            tag => Err(DecodeError::InvalidEnumTag { type_name: "option", tag }),
        }
    }

    /// One-byte enum tag mapped through `variants`
    pub fn read_enum(&mut self, type_name: &'static str, variants: &[&'static str]) -> Result<Value, DecodeError> {
        let tag = self.read_u8()?;
        variants
            .get(tag as usize)
            .map(|name| Value::from(*name))
            .ok_or(DecodeError::InvalidEnumTag { type_name, tag })
    }
}
