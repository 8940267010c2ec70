//! The request boundary of the engine: a message format for file requests
//! and a dispatcher that maps typed results onto reply codes.
//!
//! Replies are a single `i32`: non-negative values carry the result (a
//! descriptor, a byte count, a position), negative values are error codes.
//! Payloads (read data, stat records, digests) travel back in the message
//! buffer.

use log::warn;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::error::{FsError, Result};
use crate::fs::{FlatFs, ProcId, Whence, O_CREAT, O_RDWR};
use crate::storage::SectorDevice;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u32)]
pub enum OpCode {
    Create = 1,
    Open = 2,
    Close = 3,
    Read = 4,
    Write = 5,
    Seek = 6,
    Unlink = 7,
    Stat = 8,
    GetChecksum = 9,
    ComputeChecksum = 10,
    VerifyChecksum = 11,
    RefreshChecksums = 12,
}

/// One file request. Not every field is meaningful for every opcode; unused
/// fields are zero.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub op: OpCode,
    /// The requesting process.
    pub source: ProcId,
    pub path: Vec<u8>,
    pub flags: u32,
    pub fd: i32,
    /// Byte count for reads, seek offset for seeks.
    pub count: i64,
    pub whence: i32,
    /// Write payload on the way in; read data, stat records, and digests on
    /// the way out.
    pub buf: Vec<u8>,
}

impl Message {
    fn new(op: OpCode, source: ProcId) -> Message {
        Message {
            op,
            source,
            path: Vec::new(),
            flags: 0,
            fd: -1,
            count: 0,
            whence: 0,
            buf: Vec::new(),
        }
    }

    pub fn create(source: ProcId, path: &[u8]) -> Message {
        Message {
            path: path.to_vec(),
            ..Message::new(OpCode::Create, source)
        }
    }

    pub fn open(source: ProcId, path: &[u8], flags: u32) -> Message {
        Message {
            path: path.to_vec(),
            flags,
            ..Message::new(OpCode::Open, source)
        }
    }

    pub fn close(source: ProcId, fd: i32) -> Message {
        Message {
            fd,
            ..Message::new(OpCode::Close, source)
        }
    }

    pub fn read(source: ProcId, fd: i32, count: i64) -> Message {
        Message {
            fd,
            count,
            ..Message::new(OpCode::Read, source)
        }
    }

    pub fn write(source: ProcId, fd: i32, data: &[u8]) -> Message {
        Message {
            fd,
            buf: data.to_vec(),
            ..Message::new(OpCode::Write, source)
        }
    }

    pub fn seek(source: ProcId, fd: i32, offset: i64, whence: i32) -> Message {
        Message {
            fd,
            count: offset,
            whence,
            ..Message::new(OpCode::Seek, source)
        }
    }

    pub fn unlink(source: ProcId, path: &[u8]) -> Message {
        Message {
            path: path.to_vec(),
            ..Message::new(OpCode::Unlink, source)
        }
    }

    pub fn stat(source: ProcId, path: &[u8]) -> Message {
        Message {
            path: path.to_vec(),
            ..Message::new(OpCode::Stat, source)
        }
    }

    pub fn checksum(op: OpCode, source: ProcId, path: &[u8]) -> Message {
        Message {
            path: path.to_vec(),
            ..Message::new(op, source)
        }
    }

    pub fn refresh_checksums(source: ProcId) -> Message {
        Message::new(OpCode::RefreshChecksums, source)
    }
}

/// Handles one request against the engine and returns its reply code,
/// writing any reply payload into the message buffer.
pub fn dispatch<S: SectorDevice>(fs: &mut FlatFs<S>, msg: &mut Message) -> i32 {
    match handle(fs, msg) {
        Ok(reply) => reply,
        Err(err) => {
            warn!("{:?} from proc {} failed: {err}", msg.op, msg.source);
            err.code()
        }
    }
}

fn handle<S: SectorDevice>(fs: &mut FlatFs<S>, msg: &mut Message) -> Result<i32> {
    match msg.op {
        OpCode::Create => {
            let fd = fs.open(msg.source, &msg.path, msg.flags | O_CREAT | O_RDWR)?;
            Ok(fd as i32)
        }
        OpCode::Open => {
            let fd = fs.open(msg.source, &msg.path, msg.flags)?;
            Ok(fd as i32)
        }
        OpCode::Close => {
            fs.close(msg.source, descriptor(msg.fd)?)?;
            Ok(0)
        }
        OpCode::Read => {
            if msg.count < 0 {
                return Err(FsError::InvalidArgument(format!("count: {}", msg.count)));
            }

            let data = fs.read(msg.source, descriptor(msg.fd)?, msg.count as usize)?;
            let len = data.len();
            msg.buf = data;

            Ok(len as i32)
        }
        OpCode::Write => {
            let payload = std::mem::take(&mut msg.buf);
            let written = fs.write(msg.source, descriptor(msg.fd)?, &payload)?;
            msg.buf = payload;

            Ok(written as i32)
        }
        OpCode::Seek => {
            let whence = Whence::try_from(msg.whence)?;
            let pos = fs.seek(msg.source, descriptor(msg.fd)?, msg.count, whence)?;

            Ok(pos as i32)
        }
        OpCode::Unlink => {
            fs.unlink(&msg.path)?;
            Ok(0)
        }
        OpCode::Stat => {
            let stat = fs.stat(&msg.path)?;
            msg.buf = bincode::serialize(&stat)
                .map_err(|err| FsError::InvalidArgument(format!("unencodable stat: {err}")))?;

            Ok(0)
        }
        OpCode::GetChecksum => {
            msg.buf = fs.stored_digest(&msg.path)?.to_vec();
            Ok(0)
        }
        OpCode::ComputeChecksum => {
            msg.buf = fs.compute_digest(&msg.path)?.to_vec();
            Ok(0)
        }
        OpCode::VerifyChecksum => {
            if fs.verify_digest(&msg.path)? {
                Ok(0)
            } else {
                Ok(FsError::VerifyMismatch.code())
            }
        }
        OpCode::RefreshChecksums => {
            let refreshed = fs.refresh_digests(msg.source)?;
            Ok(refreshed as i32)
        }
    }
}

fn descriptor(fd: i32) -> Result<usize> {
    usize::try_from(fd).map_err(|_| FsError::BadDescriptor(format!("fd {fd}")))
}
