// ABOUTME: Encodes NSQ commands to their wire form
// ABOUTME: A command is `NAME[ arg1[ arg2...]]\n` optionally followed by a length-prefixed body

use bytes::{BufMut, Bytes, BytesMut};

/// A command body: either a single length-prefixed payload, or an MPUB-style
/// batch (outer length, count, then one length-prefixed payload per message).
#[derive(Debug, Clone)]
pub enum Payload {
    Single(Bytes),
    Multi(Vec<Bytes>),
}

/// Values that can be coerced into a command argument string.
///
/// Unsupported types are a compile error rather than a runtime one, since
/// argument lists are known statically at every call site.
pub trait IntoArg {
    fn into_arg(self) -> String;
}

impl IntoArg for &str {
    fn into_arg(self) -> String {
        self.to_string()
    }
}

impl IntoArg for String {
    fn into_arg(self) -> String {
        self
    }
}

impl IntoArg for &String {
    fn into_arg(self) -> String {
        self.clone()
    }
}

macro_rules! impl_into_arg_display {
    ($($ty:ty),*) => {
        $(
            impl IntoArg for $ty {
                fn into_arg(self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

impl_into_arg_display!(u8, u16, u32, u64, i32, i64, usize);

/// An NSQ text command: a name, zero or more whitespace-separated arguments,
/// and an optional body.
#[derive(Debug, Clone)]
pub struct Command {
    pub name: &'static str,
    pub args: Vec<String>,
    pub payload: Option<Payload>,
}

impl Command {
    pub fn new(name: &'static str) -> Self {
        Command {
            name,
            args: Vec::new(),
            payload: None,
        }
    }

    pub fn arg(mut self, value: impl IntoArg) -> Self {
        self.args.push(value.into_arg());
        self
    }

    pub fn body(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Encode this command into `buf` in nsqd's wire format.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(self.name.as_bytes());
        for arg in &self.args {
            buf.put_u8(b' ');
            buf.put_slice(arg.as_bytes());
        }
        buf.put_u8(b'\n');

        match &self.payload {
            None => {}
            Some(Payload::Single(data)) => {
                buf.put_u32(data.len() as u32);
                buf.put_slice(data);
            }
            Some(Payload::Multi(messages)) => {
                let inner_len: usize = messages
                    .iter()
                    .map(|m| 4 + m.len())
                    .sum::<usize>()
                    + 4; // + count field
                buf.put_u32(inner_len as u32);
                buf.put_u32(messages.len() as u32);
                for message in messages {
                    buf.put_u32(message.len() as u32);
                    buf.put_slice(message);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_bare_command() {
        let cmd = Command::new("NOP");
        assert_eq!(cmd.to_bytes().as_ref(), b"NOP\n");
    }

    #[test]
    fn encodes_command_with_args() {
        let cmd = Command::new("SUB").arg("topic").arg("channel");
        assert_eq!(cmd.to_bytes().as_ref(), b"SUB topic channel\n");
    }

    #[test]
    fn encodes_command_with_single_body() {
        let cmd = Command::new("PUB")
            .arg("topic")
            .body(Payload::Single(Bytes::from_static(b"hello")));
        let encoded = cmd.to_bytes();
        assert_eq!(&encoded[..11], b"PUB topic\n\0");
        assert_eq!(&encoded[10..14], &5u32.to_be_bytes());
        assert_eq!(&encoded[14..], b"hello");
    }

    #[test]
    fn encodes_mpub_body() {
        let cmd = Command::new("MPUB").arg("topic").body(Payload::Multi(vec![
            Bytes::from_static(b"one"),
            Bytes::from_static(b"two"),
        ]));
        let encoded = cmd.to_bytes();
        let header_len = b"MPUB topic\n".len();
        let outer_len = u32::from_be_bytes(encoded[header_len..header_len + 4].try_into().unwrap());
        // count field (4) + per-message (4 + len) each
        assert_eq!(outer_len as usize, 4 + (4 + 3) + (4 + 3));
    }

    #[test]
    fn rdy_zero_is_a_plain_integer_arg() {
        let cmd = Command::new("RDY").arg(0u32);
        assert_eq!(cmd.to_bytes().as_ref(), b"RDY 0\n");
    }
}
