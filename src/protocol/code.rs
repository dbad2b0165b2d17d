use std::fmt;

/// Request opcodes carried under the `code` header key.
///
/// `Join` and `Subscribe` belong to the replication stream; they are
/// enumerated for completeness but the driver never issues them itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Code {
    Select = 0x01,
    Insert = 0x02,
    Replace = 0x03,
    Update = 0x04,
    Delete = 0x05,
    Auth = 0x07,
    Eval = 0x08,
    Upsert = 0x09,
    Call = 0x0A,
    Ping = 0x40,
    Join = 0x41,
    Subscribe = 0x42,
}

impl Code {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Code::Select => "SELECT",
            Code::Insert => "INSERT",
            Code::Replace => "REPLACE",
            Code::Update => "UPDATE",
            Code::Delete => "DELETE",
            Code::Auth => "AUTH",
            Code::Eval => "EVAL",
            Code::Upsert => "UPSERT",
            Code::Call => "CALL",
            Code::Ping => "PING",
            Code::Join => "JOIN",
            Code::Subscribe => "SUBSCRIBE",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
