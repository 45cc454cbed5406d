//! The wire frame and its byte layout.
//!
//! All integers are little-endian:
//!
//! ```text
//! message_id        u32
//! method_len        u16
//! method_name       [u8; method_len]   UTF-8, absent when method_len == 0
//! argument_count    u8                 0xFF marks a fault frame
//! arguments         argument_count x { len: u16, payload: [u8; len] }
//! ```
//!
//! A frame with a method name is a call. Without one it is either a result
//! (zero or one argument) or, with the `0xFF` sentinel, a fault.

use bytes::{BufMut, Bytes, BytesMut};

use crate::FrameError;

/// Message ID used for fire-and-forget calls. Replies to it are discarded.
pub const FIRE_AND_FORGET_ID: u32 = 0;

/// Argument count byte marking a fault frame.
pub const FAULT_SENTINEL: u8 = 0xFF;

/// Largest number of arguments a frame can carry.
pub const MAX_ARGUMENTS: usize = 254;

/// Bytes before the method name: message id + method name length.
pub const HEADER_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Call,
    Result,
    Fault,
}

/// One self-delimited unit on the wire.
///
/// Frames are only built through validating constructors, so any `Frame`
/// value can be encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    message_id: u32,
    method_name: Option<String>,
    fault: bool,
    arguments: Vec<Bytes>,
}

impl Frame {
    /// A request to run `method_name` on the remote side.
    pub fn call(
        message_id: u32,
        method_name: impl Into<String>,
        arguments: Vec<Bytes>,
    ) -> Result<Self, FrameError> {
        let method_name = method_name.into();
        if method_name.is_empty() {
            return Err(FrameError::EmptyMethodName);
        }
        if method_name.len() > u16::MAX as usize {
            return Err(FrameError::MethodNameTooLong {
                len: method_name.len(),
            });
        }
        check_arguments(&arguments)?;
        Ok(Self {
            message_id,
            method_name: Some(method_name),
            fault: false,
            arguments,
        })
    }

    /// A successful reply, carrying the return value if there is one.
    pub fn result(message_id: u32, value: Option<Bytes>) -> Result<Self, FrameError> {
        let arguments: Vec<Bytes> = value.into_iter().collect();
        check_arguments(&arguments)?;
        Ok(Self {
            message_id,
            method_name: None,
            fault: false,
            arguments,
        })
    }

    /// A reply signalling that call `message_id` failed.
    pub fn fault(message_id: u32) -> Self {
        Self {
            message_id,
            method_name: None,
            fault: true,
            arguments: Vec::new(),
        }
    }

    pub fn message_id(&self) -> u32 {
        self.message_id
    }

    pub fn method_name(&self) -> Option<&str> {
        self.method_name.as_deref()
    }

    pub fn arguments(&self) -> &[Bytes] {
        &self.arguments
    }

    pub fn into_arguments(self) -> Vec<Bytes> {
        self.arguments
    }

    pub fn kind(&self) -> FrameKind {
        if self.method_name.is_some() {
            FrameKind::Call
        } else if self.fault {
            FrameKind::Fault
        } else {
            FrameKind::Result
        }
    }

    /// Number of bytes [`encode`](Self::encode) will append.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN
            + self.method_name.as_ref().map_or(0, String::len)
            + 1
            + self.arguments.iter().map(|a| 2 + a.len()).sum::<usize>()
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u32_le(self.message_id);
        match &self.method_name {
            Some(name) => {
                dst.put_u16_le(name.len() as u16);
                dst.put_slice(name.as_bytes());
            }
            None => dst.put_u16_le(0),
        }
        if self.fault {
            dst.put_u8(FAULT_SENTINEL);
            return;
        }
        dst.put_u8(self.arguments.len() as u8);
        for argument in &self.arguments {
            dst.put_u16_le(argument.len() as u16);
            dst.put_slice(argument);
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode one frame from the front of `src`.
    ///
    /// Returns the frame and the number of bytes it occupied.
    pub fn decode(src: &[u8]) -> Result<(Self, usize), FrameError> {
        let mut cursor = Cursor { src, pos: 0 };

        let message_id = u32::from_le_bytes(cursor.take_array()?);
        let method_len = u16::from_le_bytes(cursor.take_array()?) as usize;
        let method_name = if method_len > 0 {
            Some(parse_method_name(cursor.take(method_len)?.to_vec())?)
        } else {
            None
        };

        let [count] = cursor.take_array()?;
        let fault = count == FAULT_SENTINEL;
        let count = if fault { 0 } else { count as usize };

        let mut arguments = Vec::with_capacity(count);
        for _ in 0..count {
            let len = u16::from_le_bytes(cursor.take_array()?) as usize;
            if len == 0 {
                return Err(FrameError::EmptyArgument);
            }
            arguments.push(Bytes::copy_from_slice(cursor.take(len)?));
        }

        let frame = Self::from_parts(message_id, method_name, fault, arguments);
        Ok((frame, cursor.pos))
    }

    /// Assemble a frame whose fields were already validated while reading.
    pub(crate) fn from_parts(
        message_id: u32,
        method_name: Option<String>,
        fault: bool,
        arguments: Vec<Bytes>,
    ) -> Self {
        Self {
            message_id,
            method_name,
            fault,
            arguments,
        }
    }
}

pub(crate) fn parse_method_name(raw: Vec<u8>) -> Result<String, FrameError> {
    String::from_utf8(raw).map_err(|_| FrameError::InvalidMethodName)
}

fn check_arguments(arguments: &[Bytes]) -> Result<(), FrameError> {
    if arguments.len() > MAX_ARGUMENTS {
        return Err(FrameError::TooManyArguments {
            count: arguments.len(),
        });
    }
    for (index, argument) in arguments.iter().enumerate() {
        if argument.is_empty() {
            return Err(FrameError::EmptyArgument);
        }
        if argument.len() > u16::MAX as usize {
            return Err(FrameError::ArgumentTooLarge {
                index,
                len: argument.len(),
            });
        }
    }
    Ok(())
}

struct Cursor<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], FrameError> {
        let end = self.pos.checked_add(len).ok_or(FrameError::Incomplete)?;
        let slice = self.src.get(self.pos..end).ok_or(FrameError::Incomplete)?;
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], FrameError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}
