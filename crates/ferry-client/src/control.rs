//! Client end of the control channel.

use std::net::{Shutdown, SocketAddr, SocketAddrV4, TcpStream};

use tracing::debug;

use ferry_protocol::{Command, CommandReader, DownloadRequest, DownloadResponse, write_command};

use crate::error::ClientError;

/// The server's answer to an accepted download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOffer {
    /// Datagram endpoint the chunks will come from.
    pub server_addr: SocketAddr,
    pub session_id: u32,
    pub file_size: u32,
    pub filename: String,
}

impl From<DownloadResponse> for DownloadOffer {
    fn from(r: DownloadResponse) -> Self {
        Self {
            server_addr: SocketAddr::V4(r.server_addr),
            session_id: r.session_id,
            file_size: r.file_size,
            filename: r.filename,
        }
    }
}

pub struct ControlClient {
    reader: CommandReader<TcpStream>,
    writer: TcpStream,
    peer: SocketAddr,
}

impl ControlClient {
    pub fn connect(server: SocketAddr) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(server)?;
        stream.set_nodelay(true)?;
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self, ClientError> {
        let peer = stream.peer_addr()?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: CommandReader::new(stream),
            writer,
            peer,
        })
    }

    /// Address of the server's control endpoint.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.writer.local_addr()?)
    }

    /// Names the server offers, in the server's order.
    pub fn list_files(&mut self) -> Result<Vec<String>, ClientError> {
        match self.round_trip(&Command::ListFilesRequest)? {
            Command::ListFilesResponse { names } => Ok(names),
            other => Err(ClientError::UnexpectedReply(other.id())),
        }
    }

    /// Ask the server to send `filename` to the datagram endpoint `endpoint`.
    pub fn request_download(
        &mut self,
        filename: &str,
        endpoint: SocketAddrV4,
    ) -> Result<DownloadOffer, ClientError> {
        let request = Command::DownloadRequest(DownloadRequest {
            client_addr: endpoint,
            filename: filename.to_string(),
        });
        match self.round_trip(&request)? {
            Command::DownloadResponse(response) => Ok(response.into()),
            Command::DownloadError => Err(ClientError::FileNotFound(filename.to_string())),
            other => Err(ClientError::UnexpectedReply(other.id())),
        }
    }

    /// Tell the server the session is over and close the write side.
    pub fn quit(mut self) -> Result<(), ClientError> {
        write_command(&mut self.writer, &Command::Quit)?;
        self.writer.shutdown(Shutdown::Write)?;
        Ok(())
    }

    fn round_trip(&mut self, command: &Command) -> Result<Command, ClientError> {
        debug!(peer = %self.peer, id = ?command.id(), "sending command");
        write_command(&mut self.writer, command)?;
        match self.reader.read_command()? {
            Some(reply) => Ok(reply),
            None => Err(ClientError::Disconnected),
        }
    }
}
