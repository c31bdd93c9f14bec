//! Control-channel command frames.
//!
//! ```text
//! Quit                [0x01]
//! DownloadRequest     [0x02][client ipv4 (4)][client port (2)][name len (4)][name]
//! DownloadResponse    [0x03][server ipv4 (4)][server udp port (2)][session id (4)]
//!                     [file size (4)][name len (4)][name]
//! ListFilesRequest    [0x04]
//! ListFilesResponse   [0x05][file count (2)][list bytes (4)]{[name len (4)][name]}*
//! DownloadError       [0x30]
//! ```
//!
//! Frames carry no outer length prefix; a frame's length follows from its
//! command id and the length fields inside it.

use std::net::SocketAddrV4;

use bytes::{BufMut, Bytes, BytesMut};

use crate::cursor::FrameCursor;
use crate::error::DecodeError;

/// Longest filename accepted in any frame.
pub const MAX_FILENAME_LEN: usize = 4096;

/// Largest `totalListBytes` a list response may declare.
pub const MAX_LIST_BYTES: usize = 4 * 1024 * 1024;

/// Command identifiers, one byte on the wire.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    Unknown = 0x00,
    Quit = 0x01,
    DownloadRequest = 0x02,
    DownloadResponse = 0x03,
    ListFilesRequest = 0x04,
    ListFilesResponse = 0x05,
    DownloadError = 0x30,
}

impl From<u8> for CommandId {
    fn from(byte: u8) -> Self {
        match byte {
            0x01 => Self::Quit,
            0x02 => Self::DownloadRequest,
            0x03 => Self::DownloadResponse,
            0x04 => Self::ListFilesRequest,
            0x05 => Self::ListFilesResponse,
            0x30 => Self::DownloadError,
            _ => Self::Unknown,
        }
    }
}

/// Client asks the server to push `filename` to `client_addr` over UDP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub client_addr: SocketAddrV4,
    pub filename: String,
}

/// Server accepted a download and will send it from `server_addr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResponse {
    pub server_addr: SocketAddrV4,
    pub session_id: u32,
    pub file_size: u32,
    pub filename: String,
}

/// A decoded control-channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    ListFilesRequest,
    ListFilesResponse { names: Vec<String> },
    DownloadRequest(DownloadRequest),
    DownloadResponse(DownloadResponse),
    DownloadError,
}

/// Value of the `totalListBytes` field for a set of names.
pub fn list_bytes<S: AsRef<str>>(names: &[S]) -> usize {
    names.iter().map(|n| 4 + n.as_ref().len()).sum()
}

/// Trim `names` to the longest prefix one list response can carry: at most
/// `u16::MAX` names and `MAX_LIST_BYTES` of list bytes. Returns how many
/// names were dropped.
pub fn fit_listing(names: &mut Vec<String>) -> usize {
    let mut total = 0;
    let mut keep = 0;
    for name in names.iter().take(u16::MAX as usize) {
        let size = 4 + name.len();
        if total + size > MAX_LIST_BYTES {
            break;
        }
        total += size;
        keep += 1;
    }
    let dropped = names.len() - keep;
    names.truncate(keep);
    dropped
}

/// True if `name` names a file directly inside a directory: non-empty, no
/// path separators, and not `.` or `..`.
pub fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains(['/', '\\', '\0'])
        && !name.contains("..")
}

impl Command {
    pub fn id(&self) -> CommandId {
        match self {
            Self::Quit => CommandId::Quit,
            Self::ListFilesRequest => CommandId::ListFilesRequest,
            Self::ListFilesResponse { .. } => CommandId::ListFilesResponse,
            Self::DownloadRequest(_) => CommandId::DownloadRequest,
            Self::DownloadResponse(_) => CommandId::DownloadResponse,
            Self::DownloadError => CommandId::DownloadError,
        }
    }

    /// Append the wire form of this command to `buf`.
    ///
    /// # Panics
    /// Panics if a list response carries more than `u16::MAX` names. Pass
    /// server listings through [`fit_listing`] first.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.id() as u8);
        match self {
            Self::Quit | Self::ListFilesRequest | Self::DownloadError => {}
            Self::ListFilesResponse { names } => {
                assert!(names.len() <= u16::MAX as usize);
                buf.put_u16(names.len() as u16);
                buf.put_u32(list_bytes(names) as u32);
                for name in names {
                    put_string(buf, name);
                }
            }
            Self::DownloadRequest(req) => {
                buf.put_u32(u32::from(*req.client_addr.ip()));
                buf.put_u16(req.client_addr.port());
                put_string(buf, &req.filename);
            }
            Self::DownloadResponse(rsp) => {
                buf.put_u32(u32::from(*rsp.server_addr.ip()));
                buf.put_u16(rsp.server_addr.port());
                buf.put_u32(rsp.session_id);
                buf.put_u32(rsp.file_size);
                put_string(buf, &rsp.filename);
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode one command from the front of `buf`.
    ///
    /// Returns the command and the number of bytes it occupied. Bytes past
    /// the end of the frame are left for the next call.
    pub fn decode(buf: &[u8]) -> Result<(Command, usize), DecodeError> {
        let mut cur = FrameCursor::new(buf);
        let raw_id = cur.u8()?;

        let command = match CommandId::from(raw_id) {
            CommandId::Quit => Command::Quit,
            CommandId::ListFilesRequest => Command::ListFilesRequest,
            CommandId::DownloadError => Command::DownloadError,
            CommandId::ListFilesResponse => decode_list(&mut cur)?,
            CommandId::DownloadRequest => {
                let ip = cur.ipv4()?;
                let port = cur.u16()?;
                let filename = cur.string(MAX_FILENAME_LEN)?;
                Command::DownloadRequest(DownloadRequest {
                    client_addr: SocketAddrV4::new(ip, port),
                    filename,
                })
            }
            CommandId::DownloadResponse => {
                let ip = cur.ipv4()?;
                let port = cur.u16()?;
                let session_id = cur.u32()?;
                let file_size = cur.u32()?;
                let filename = cur.string(MAX_FILENAME_LEN)?;
                Command::DownloadResponse(DownloadResponse {
                    server_addr: SocketAddrV4::new(ip, port),
                    session_id,
                    file_size,
                    filename,
                })
            }
            CommandId::Unknown => return Err(DecodeError::UnknownCommand(raw_id)),
        };

        Ok((command, cur.position()))
    }
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn decode_list(cur: &mut FrameCursor<'_>) -> Result<Command, DecodeError> {
    let count = cur.u16()? as usize;
    let total = cur.u32()? as usize;
    if total > MAX_LIST_BYTES {
        return Err(DecodeError::MalformedFrame("file list exceeds limit"));
    }
    // The whole list must be present before any name is parsed.
    cur.need(total)?;

    let start = cur.position();
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        names.push(cur.string(MAX_FILENAME_LEN)?);
    }
    if cur.position() - start != total {
        return Err(DecodeError::MalformedFrame("file list length mismatch"));
    }
    Ok(Command::ListFilesResponse { names })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn list_response_layout() {
        let cmd = Command::ListFilesResponse {
            names: vec!["a.txt".into(), "bb.dat".into()],
        };
        let bytes = cmd.to_bytes();

        assert_eq!(bytes[0], 0x05);
        assert_eq!(&bytes[1..3], &2u16.to_be_bytes());
        assert_eq!(&bytes[3..7], &19u32.to_be_bytes());
        assert_eq!(&bytes[7..11], &5u32.to_be_bytes());
        assert_eq!(&bytes[11..16], b"a.txt");
        assert_eq!(&bytes[16..20], &6u32.to_be_bytes());
        assert_eq!(&bytes[20..26], b"bb.dat");
        assert_eq!(bytes.len(), 26);

        let (decoded, used) = Command::decode(&bytes).unwrap();
        assert_eq!(decoded, cmd);
        assert_eq!(used, 26);
    }

    #[test]
    fn download_request_layout() {
        let cmd = Command::DownloadRequest(DownloadRequest {
            client_addr: SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 7), 4000),
            filename: "x.bin".into(),
        });
        let bytes = cmd.to_bytes();
        assert_eq!(
            &bytes[..],
            &[0x02, 10, 0, 0, 7, 0x0f, 0xa0, 0, 0, 0, 5, b'x', b'.', b'b', b'i', b'n']
        );
    }

    #[test]
    fn download_response_layout() {
        let cmd = Command::DownloadResponse(DownloadResponse {
            server_addr: SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 2), 9001),
            session_id: 7,
            file_size: 2500,
            filename: "f".into(),
        });
        let bytes = cmd.to_bytes();
        assert_eq!(bytes.len(), 1 + 4 + 2 + 4 + 4 + 4 + 1);
        assert_eq!(bytes[0], 0x03);
        assert_eq!(&bytes[7..11], &7u32.to_be_bytes());
        assert_eq!(&bytes[11..15], &2500u32.to_be_bytes());
        assert_eq!(Command::decode(&bytes).unwrap().0, cmd);
    }

    #[test]
    fn single_byte_commands() {
        assert_eq!(&Command::Quit.to_bytes()[..], &[0x01]);
        assert_eq!(&Command::ListFilesRequest.to_bytes()[..], &[0x04]);
        assert_eq!(&Command::DownloadError.to_bytes()[..], &[0x30]);
    }

    #[test]
    fn decode_leaves_following_frame() {
        let mut buf = BytesMut::new();
        Command::ListFilesRequest.encode(&mut buf);
        Command::Quit.encode(&mut buf);
        let (first, used) = Command::decode(&buf).unwrap();
        assert_eq!(first, Command::ListFilesRequest);
        assert_eq!(used, 1);
        assert_eq!(Command::decode(&buf[used..]).unwrap().0, Command::Quit);
    }

    #[test]
    fn unknown_and_zero_ids_are_rejected() {
        assert_eq!(Command::decode(&[0x00]), Err(DecodeError::UnknownCommand(0x00)));
        assert_eq!(Command::decode(&[0x20]), Err(DecodeError::UnknownCommand(0x20)));
    }

    #[test]
    fn empty_buffer_is_truncated() {
        assert_eq!(
            Command::decode(&[]),
            Err(DecodeError::TruncatedFrame { needed: 1, available: 0 })
        );
    }

    #[test]
    fn filename_past_end_is_truncated() {
        // Declares a 9-byte name but carries 3.
        let buf = [0x02, 127, 0, 0, 1, 0, 80, 0, 0, 0, 9, b'a', b'b', b'c'];
        assert!(matches!(
            Command::decode(&buf),
            Err(DecodeError::TruncatedFrame { needed: 20, .. })
        ));
    }

    #[test]
    fn list_with_wrong_total_is_malformed() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x05);
        buf.put_u16(1);
        buf.put_u32(12); // one 5-byte name needs 9
        buf.put_u32(5);
        buf.put_slice(b"a.txt");
        buf.put_slice(&[0, 0, 0]);
        assert_eq!(
            Command::decode(&buf),
            Err(DecodeError::MalformedFrame("file list length mismatch"))
        );
    }

    #[test]
    fn empty_list() {
        let bytes = Command::ListFilesResponse { names: vec![] }.to_bytes();
        assert_eq!(&bytes[..], &[0x05, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            Command::decode(&bytes).unwrap().0,
            Command::ListFilesResponse { names: vec![] }
        );
    }

    #[test]
    fn oversized_listing_is_trimmed_to_fit() {
        let mut names: Vec<String> = (0..65_536).map(|i| format!("f{:05}", i)).collect();
        assert_eq!(fit_listing(&mut names), 1);
        assert_eq!(names.len(), u16::MAX as usize);

        let bytes = Command::ListFilesResponse { names: names.clone() }.to_bytes();
        let (decoded, used) = Command::decode(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(decoded, Command::ListFilesResponse { names });

        let long = "x".repeat(MAX_FILENAME_LEN);
        let mut big: Vec<String> = vec![long; 2000];
        let dropped = fit_listing(&mut big);
        assert!(dropped > 0);
        assert!(list_bytes(&big) <= MAX_LIST_BYTES);

        let mut small = vec!["a".to_string(), "b".to_string()];
        assert_eq!(fit_listing(&mut small), 0);
        assert_eq!(small.len(), 2);
    }

    #[test]
    fn plain_filenames() {
        assert!(is_plain_filename("a.txt"));
        assert!(is_plain_filename(".hidden"));
        assert!(!is_plain_filename(""));
        assert!(!is_plain_filename("."));
        assert!(!is_plain_filename(".."));
        assert!(!is_plain_filename("../etc/passwd"));
        assert!(!is_plain_filename("dir/file"));
        assert!(!is_plain_filename("dir\\file"));
    }
}
