/// Integer map keys used in request/response headers and bodies.
///
/// The numbering leaves gaps between header keys, integer body keys,
/// request keys and response keys; those gaps are reserved by the wire
/// format and must not be filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Key {
    Code = 0x00,
    Sync = 0x01,
    // replication header keys
    ServerId = 0x02,
    Lsn = 0x03,
    Timestamp = 0x04,
    SchemaId = 0x05,

    SpaceId = 0x10,
    IndexId = 0x11,
    Limit = 0x12,
    Offset = 0x13,
    Iterator = 0x14,
    IndexBase = 0x15,

    Key = 0x20,
    Tuple = 0x21,
    FunctionName = 0x22,
    Username = 0x23,
    // replication body keys
    ServerUuid = 0x24,
    ClusterUuid = 0x25,
    VClock = 0x26,
    Expression = 0x27,
    Ops = 0x28,

    Data = 0x30,
    Error = 0x31,
}

impl Key {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}
