//! Hardware address and stream identifier types

use std::fmt;
use std::str::FromStr;

/// 48-bit Ethernet address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Build from the low 48 bits of `value`, most significant byte first
    pub fn from_u64(value: u64) -> Self {
        let bytes = value.to_be_bytes();
        let mut out = [0u8; 6];
        out.copy_from_slice(&bytes[2..]);
        Self(out)
    }

    pub fn to_u64(self) -> u64 {
        self.0.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex_groups(f, &self.0)
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_groups::<6>(s).map(Self)
    }
}

/// 64-bit AVTP stream identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamId(pub [u8; 8]);

impl StreamId {
    /// Talker stream id: source address followed by the unique id
    pub fn for_talker(src: MacAddr, unique_id: u16) -> Self {
        let mut out = [0u8; 8];
        out[..6].copy_from_slice(&src.0);
        out[6..].copy_from_slice(&unique_id.to_be_bytes());
        Self(out)
    }

    pub fn from_u64(value: u64) -> Self {
        Self(value.to_be_bytes())
    }

    pub fn to_u64(self) -> u64 {
        u64::from_be_bytes(self.0)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex_groups(f, &self.0)
    }
}

impl FromStr for StreamId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_groups::<8>(s).map(Self)
    }
}

fn write_hex_groups(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            f.write_str(":")?;
        }
        write!(f, "{:02x}", b)?;
    }
    Ok(())
}

fn parse_hex_groups<const N: usize>(s: &str) -> Result<[u8; N], String> {
    let mut out = [0u8; N];
    let mut groups = s.trim().split(':');

    for slot in out.iter_mut() {
        let group = groups
            .next()
            .ok_or_else(|| format!("expected {} hex groups in '{}'", N, s))?;
        if group.is_empty() || group.len() > 2 {
            return Err(format!("bad hex group '{}' in '{}'", group, s));
        }
        *slot = u8::from_str_radix(group, 16)
            .map_err(|_| format!("bad hex group '{}' in '{}'", group, s))?;
    }

    if groups.next().is_some() {
        return Err(format!("expected {} hex groups in '{}'", N, s));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddr = "91:E0:F0:00:fe:01".parse().unwrap();
        assert_eq!(mac.0, [0x91, 0xe0, 0xf0, 0x00, 0xfe, 0x01]);
        assert_eq!(mac.to_string(), "91:e0:f0:00:fe:01");
    }

    #[test]
    fn test_mac_rejects_wrong_group_count() {
        assert!("01:02:03:04:05".parse::<MacAddr>().is_err());
        assert!("01:02:03:04:05:06:07".parse::<MacAddr>().is_err());
        assert!("01:02:03:04:05:zz".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_mac_u64_conversion() {
        let mac = MacAddr::from_u64(0x91e0_f000_fe00);
        assert_eq!(mac.to_string(), "91:e0:f0:00:fe:00");
        assert_eq!(mac.to_u64(), 0x91e0_f000_fe00);

        let next = MacAddr::from_u64(mac.to_u64() + 1);
        assert_eq!(next.to_string(), "91:e0:f0:00:fe:01");
    }

    #[test]
    fn test_talker_stream_id() {
        let src: MacAddr = "00:11:22:33:44:55".parse().unwrap();
        let id = StreamId::for_talker(src, 0x0102);
        assert_eq!(id.to_string(), "00:11:22:33:44:55:01:02");
        assert_eq!(id.to_u64(), 0x0011_2233_4455_0102);
    }
}
