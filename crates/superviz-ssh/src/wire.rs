//! Minimal readers for the SSH binary encoding (RFC 4251 §5)

/// Cursor over an SSH wire-format buffer
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn read_u32(&mut self) -> Option<u32> {
        let bytes = self.buf.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn read_string(&mut self) -> Option<&'a [u8]> {
        let len = self.read_u32()? as usize;
        let end = self.pos.checked_add(len)?;
        let bytes = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    pub(crate) fn read_utf8(&mut self) -> Option<&'a str> {
        std::str::from_utf8(self.read_string()?).ok()
    }

    pub(crate) fn expect_prefix(&mut self, prefix: &[u8]) -> bool {
        if self.buf.get(self.pos..self.pos + prefix.len()) == Some(prefix) {
            self.pos += prefix.len();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
pub(crate) fn encode_string(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_strings_in_order() {
        let mut buf = Vec::new();
        encode_string(&mut buf, b"ssh-ed25519");
        encode_string(&mut buf, &[1, 2, 3]);

        let mut reader = WireReader::new(&buf);
        assert_eq!(reader.read_utf8(), Some("ssh-ed25519"));
        assert_eq!(reader.read_string(), Some(&[1u8, 2, 3][..]));
        assert_eq!(reader.read_string(), None);
    }

    #[test]
    fn test_truncated_length_is_none() {
        let buf = [0u8, 0, 0, 9, b'a'];
        let mut reader = WireReader::new(&buf);
        assert_eq!(reader.read_string(), None);
    }
}
