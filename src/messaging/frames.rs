//! The simulator's datagram formats. All numbers are little endian; every tagged frame
//!  starts with a four byte ASCII tag followed by a zero byte, so the payload starts at
//!  offset 5. The only exception is `QUIT`, which is the bare tag.
//!
//! ```ascii
//! RREF request   tag, i32 frequency (0 = stop), i32 id, path\0         zero padded to 413 bytes
//! RREF response  tag, (i32 id, f32 value)*                             variable
//! DREF (float)   tag, f32 value, path\0                                zero padded to 509 bytes
//! DREF (string)  tag, value\0, path\0                                  zero padded to 509 bytes
//! CMND           tag, command\0                                        variable
//! QUIT           tag (4 bytes, no terminator)
//! FAIL / RECO    tag, decimal system id\0                              variable
//! BECN           tag, u8 major, u8 minor, u32 host id, u32 version,    variable, multicast
//!                 u32 role, u16 port, computer name
//! ```

use std::fmt::{Debug, Formatter};

use bytes::{Buf, BufMut, BytesMut};

use crate::error::XPlaneError;
use crate::util::buf::{pad_to, put_c_string, try_get_c_string};

pub const TAG_LEN: usize = 4;
pub const PAYLOAD_OFFSET: usize = 5;

pub const DATAREF_REQUEST_LEN: usize = 413;
pub const SET_DATAREF_LEN: usize = 509;

const VALUE_PAIR_LEN: usize = 8;
const BEACON_FIXED_LEN: usize = PAYLOAD_OFFSET + 16;


#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct FrameTag(pub [u8; TAG_LEN]);

impl FrameTag {
    pub const RREF: FrameTag = FrameTag(*b"RREF");
    pub const DREF: FrameTag = FrameTag(*b"DREF");
    pub const CMND: FrameTag = FrameTag(*b"CMND");
    pub const QUIT: FrameTag = FrameTag(*b"QUIT");
    pub const FAIL: FrameTag = FrameTag(*b"FAIL");
    pub const RECO: FrameTag = FrameTag(*b"RECO");
    pub const BECN: FrameTag = FrameTag(*b"BECN");

    /// The tag of a received datagram, or `None` if it is too short to have one.
    pub fn peek(datagram: &[u8]) -> Option<FrameTag> {
        datagram.get(..TAG_LEN)
            .and_then(|t| t.try_into().ok())
            .map(FrameTag)
    }

    pub fn name(&self) -> &'static str {
        match *self {
            FrameTag::RREF => "RREF",
            FrameTag::DREF => "DREF",
            FrameTag::CMND => "CMND",
            FrameTag::QUIT => "QUIT",
            FrameTag::FAIL => "FAIL",
            FrameTag::RECO => "RECO",
            FrameTag::BECN => "BECN",
            _ => "????",
        }
    }

    fn ser_with_terminator(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
        buf.put_u8(0);
    }

    /// Checks the tag and skips to the payload offset.
    fn try_skip_header(&self, buf: &mut impl Buf) -> anyhow::Result<()> {
        if buf.remaining() < PAYLOAD_OFFSET {
            return Err(self.malformed(format!("{} bytes are too short for a header", buf.remaining())));
        }
        let mut actual = [0u8; TAG_LEN];
        buf.copy_to_slice(&mut actual);
        if actual != self.0 {
            return Err(self.malformed(format!("unexpected tag {:?}", FrameTag(actual))));
        }
        buf.advance(PAYLOAD_OFFSET - TAG_LEN);
        Ok(())
    }

    fn malformed(&self, reason: String) -> anyhow::Error {
        XPlaneError::MalformedFrame { tag: self.name(), reason }.into()
    }
}

impl Debug for FrameTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.chars().all(|c| c.is_ascii_graphic()) => write!(f, "{}", s),
            _ => write!(f, "{:02x?}", self.0),
        }
    }
}


/// Everything this crate sends to the simulator.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Start (frequency > 0) or stop (frequency == 0) streaming a dataref under the given id
    DataRefRequest(DataRefRequest),
    SetDataRef { path: String, value: f32 },
    SetDataRefString { path: String, value: String },
    Command { command: String },
    Quit,
    Fail { system: i32 },
    Recover { system: i32 },
}

impl Frame {
    pub fn tag(&self) -> FrameTag {
        match self {
            Frame::DataRefRequest(_) => FrameTag::RREF,
            Frame::SetDataRef { .. } | Frame::SetDataRefString { .. } => FrameTag::DREF,
            Frame::Command { .. } => FrameTag::CMND,
            Frame::Quit => FrameTag::QUIT,
            Frame::Fail { .. } => FrameTag::FAIL,
            Frame::Recover { .. } => FrameTag::RECO,
        }
    }

    /// Encodes the complete datagram. Strings that contain zero bytes or do not fit the
    ///  frame's fixed length are rejected rather than truncated.
    pub fn ser(&self) -> anyhow::Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(SET_DATAREF_LEN);
        match self {
            Frame::DataRefRequest(request) => {
                request.ser(&mut buf)?;
            }
            Frame::SetDataRef { path, value } => {
                check_c_string("dataref path", path)?;
                check_fits(path.len() + 1, SET_DATAREF_LEN - PAYLOAD_OFFSET - 4, "dataref path")?;
                FrameTag::DREF.ser_with_terminator(&mut buf);
                buf.put_f32_le(*value);
                put_c_string(&mut buf, path);
                pad_to(&mut buf, SET_DATAREF_LEN);
            }
            Frame::SetDataRefString { path, value } => {
                check_c_string("dataref path", path)?;
                check_c_string("string value", value)?;
                check_fits(value.len() + 1 + path.len() + 1, SET_DATAREF_LEN - PAYLOAD_OFFSET, "string value and dataref path")?;
                FrameTag::DREF.ser_with_terminator(&mut buf);
                put_c_string(&mut buf, value);
                put_c_string(&mut buf, path);
                pad_to(&mut buf, SET_DATAREF_LEN);
            }
            Frame::Command { command } => {
                check_c_string("command", command)?;
                FrameTag::CMND.ser_with_terminator(&mut buf);
                put_c_string(&mut buf, command);
            }
            Frame::Quit => {
                buf.put_slice(&FrameTag::QUIT.0);
            }
            Frame::Fail { system } => {
                FrameTag::FAIL.ser_with_terminator(&mut buf);
                put_c_string(&mut buf, &system.to_string());
            }
            Frame::Recover { system } => {
                FrameTag::RECO.ser_with_terminator(&mut buf);
                put_c_string(&mut buf, &system.to_string());
            }
        }
        Ok(buf)
    }
}

fn check_c_string(what: &str, s: &str) -> anyhow::Result<()> {
    if s.is_empty() {
        return Err(XPlaneError::invalid_argument(format!("{} must not be empty", what)).into());
    }
    if s.as_bytes().contains(&0) {
        return Err(XPlaneError::invalid_argument(format!("{} must not contain zero bytes: {:?}", what, s)).into());
    }
    Ok(())
}

fn check_fits(len: usize, max_len: usize, what: &str) -> anyhow::Result<()> {
    if len > max_len {
        return Err(XPlaneError::invalid_argument(format!("{} needs {} bytes, only {} fit into the frame", what, len, max_len)).into());
    }
    Ok(())
}


#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataRefRequest {
    pub frequency: i32,
    pub id: i32,
    pub path: String,
}

impl DataRefRequest {
    /// The longest path (without its terminating NUL) that fits an `RREF` request
    pub const MAX_PATH_LEN: usize = DATAREF_REQUEST_LEN - PAYLOAD_OFFSET - 8 - 1;

    /// Fails with [XPlaneError::InvalidArgument] for a path that can not be put on the wire
    pub fn check_path(path: &str) -> anyhow::Result<()> {
        check_c_string("dataref path", path)?;
        check_fits(path.len() + 1, DATAREF_REQUEST_LEN - PAYLOAD_OFFSET - 8, "dataref path")
    }

    pub fn ser(&self, buf: &mut BytesMut) -> anyhow::Result<()> {
        DataRefRequest::check_path(&self.path)?;

        FrameTag::RREF.ser_with_terminator(buf);
        buf.put_i32_le(self.frequency);
        buf.put_i32_le(self.id);
        put_c_string(buf, &self.path);
        pad_to(buf, DATAREF_REQUEST_LEN);
        Ok(())
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<DataRefRequest> {
        FrameTag::RREF.try_skip_header(buf)?;
        let frequency = buf.try_get_i32_le()?;
        let id = buf.try_get_i32_le()?;
        let path = try_get_c_string(buf)?;
        Ok(DataRefRequest {
            frequency,
            id,
            path,
        })
    }
}


/// The (id, value) pairs of an `RREF` response, in wire order.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueResponse {
    pub values: Vec<(i32, f32)>,
}

impl ValueResponse {
    /// A trailing partial pair makes the whole frame invalid: no pair of a frame with a
    ///  corrupt length is trusted.
    pub fn try_deser(mut buf: &[u8]) -> anyhow::Result<ValueResponse> {
        FrameTag::RREF.try_skip_header(&mut buf)?;

        if buf.len() % VALUE_PAIR_LEN != 0 {
            return Err(FrameTag::RREF.malformed(format!("payload of {} bytes is not a sequence of (id, value) pairs", buf.len())));
        }

        let mut values = Vec::with_capacity(buf.len() / VALUE_PAIR_LEN);
        while buf.has_remaining() {
            let id = buf.try_get_i32_le()?;
            let value = buf.try_get_f32_le()?;
            values.push((id, value));
        }
        Ok(ValueResponse { values })
    }

    #[cfg(test)]
    pub fn ser(values: &[(i32, f32)]) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameTag::RREF.ser_with_terminator(&mut buf);
        for &(id, value) in values {
            buf.put_i32_le(id);
            buf.put_f32_le(value);
        }
        buf
    }
}


/// The multicast announcement of a running simulator instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Beacon {
    pub major_version: u8,
    pub minor_version: u8,
    pub host_id: u32,
    pub version: u32,
    pub role: u32,
    /// the port the simulator listens on for `RREF`, `DREF` etc.
    pub port: u16,
    pub computer_name: String,
}

impl Beacon {
    pub fn try_deser(mut buf: &[u8]) -> anyhow::Result<Beacon> {
        if buf.len() < BEACON_FIXED_LEN {
            return Err(FrameTag::BECN.malformed(format!("{} bytes are too short for a beacon", buf.len())));
        }
        FrameTag::BECN.try_skip_header(&mut buf)?;

        let major_version = buf.try_get_u8()?;
        let minor_version = buf.try_get_u8()?;
        let host_id = buf.try_get_u32_le()?;
        let version = buf.try_get_u32_le()?;
        let role = buf.try_get_u32_le()?;
        let port = buf.try_get_u16_le()?;

        let name_len = buf.iter()
            .position(|&b| b == 0)
            .unwrap_or(buf.len());
        let computer_name = String::from_utf8_lossy(&buf[..name_len]).into_owned();

        Ok(Beacon {
            major_version,
            minor_version,
            host_id,
            version,
            role,
            port,
            computer_name,
        })
    }

    #[cfg(test)]
    pub fn ser(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        FrameTag::BECN.ser_with_terminator(&mut buf);
        buf.put_u8(self.major_version);
        buf.put_u8(self.minor_version);
        buf.put_u32_le(self.host_id);
        buf.put_u32_le(self.version);
        buf.put_u32_le(self.role);
        buf.put_u16_le(self.port);
        put_c_string(&mut buf, &self.computer_name);
        buf
    }
}
