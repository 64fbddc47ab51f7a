//! DAP transport abstraction layer.
//! Supports stdio (embedded mode), TCP (server mode) and in-memory channels.
//!
//! Reading and writing are separate halves: requests are read by the dispatch loop while
//! events are written from engine threads at any time.

use anyhow::anyhow;
use serde_json::Value;
use std::io::{BufRead, BufReader, Stdin, Stdout, Write};
use std::net::TcpStream;
use std::sync::mpsc;

/// Reading half of a DAP connection.
pub trait MessageReader: Send {
    /// Read a single DAP message (with Content-Length framing).
    fn read_message(&mut self) -> anyhow::Result<Value>;
}

/// Writing half of a DAP connection.
pub trait MessageWriter: Send {
    /// Write a single DAP message (with Content-Length framing).
    fn write_message(&mut self, message: &Value) -> anyhow::Result<()>;
}

/// Read one Content-Length framed JSON message.
pub fn read_framed(reader: &mut impl BufRead) -> anyhow::Result<Value> {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        let read_n = reader.read_line(&mut line)?;
        if read_n == 0 {
            return Err(anyhow!("DAP connection closed"));
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if let Some(v) = line.strip_prefix("Content-Length:") {
            content_length = Some(v.trim().parse()?);
        }
    }

    let len = content_length.ok_or_else(|| anyhow!("Missing Content-Length header"))?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(serde_json::from_slice(&buf)?)
}

/// Write one Content-Length framed JSON message.
pub fn write_framed(writer: &mut impl Write, message: &Value) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(message)?;
    write!(writer, "Content-Length: {}\r\n\r\n", payload.len())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

pub struct StdioReader(BufReader<Stdin>);

pub struct StdioWriter(Stdout);

/// Stdio transport halves.
pub fn stdio() -> (StdioReader, StdioWriter) {
    (
        StdioReader(BufReader::new(std::io::stdin())),
        StdioWriter(std::io::stdout()),
    )
}

impl MessageReader for StdioReader {
    fn read_message(&mut self) -> anyhow::Result<Value> {
        read_framed(&mut self.0)
    }
}

impl MessageWriter for StdioWriter {
    fn write_message(&mut self, message: &Value) -> anyhow::Result<()> {
        write_framed(&mut self.0.lock(), message)
    }
}

pub struct TcpReader(BufReader<TcpStream>);

pub struct TcpWriter(TcpStream);

/// TCP transport halves over one accepted stream.
pub fn tcp(stream: TcpStream) -> anyhow::Result<(TcpReader, TcpWriter)> {
    stream.set_nodelay(true)?;
    let reader = BufReader::new(stream.try_clone()?);
    Ok((TcpReader(reader), TcpWriter(stream)))
}

impl MessageReader for TcpReader {
    fn read_message(&mut self) -> anyhow::Result<Value> {
        read_framed(&mut self.0)
    }
}

impl MessageWriter for TcpWriter {
    fn write_message(&mut self, message: &Value) -> anyhow::Result<()> {
        write_framed(&mut self.0, message)
    }
}

/// In-memory reading half, fed through a channel.
pub struct ChannelReader(mpsc::Receiver<Value>);

/// In-memory writing half, drained through a channel.
pub struct ChannelWriter(mpsc::Sender<Value>);

/// Two in-memory endpoints, for embedding without a byte stream.
/// Returns the adapter side halves and the client side sender/receiver.
pub fn channel() -> (
    (ChannelReader, ChannelWriter),
    (mpsc::Sender<Value>, mpsc::Receiver<Value>),
) {
    let (req_tx, req_rx) = mpsc::channel();
    let (out_tx, out_rx) = mpsc::channel();
    ((ChannelReader(req_rx), ChannelWriter(out_tx)), (req_tx, out_rx))
}

impl MessageReader for ChannelReader {
    fn read_message(&mut self) -> anyhow::Result<Value> {
        self.0.recv().map_err(|_| anyhow!("DAP connection closed"))
    }
}

impl MessageWriter for ChannelWriter {
    fn write_message(&mut self, message: &Value) -> anyhow::Result<()> {
        self.0
            .send(message.clone())
            .map_err(|_| anyhow!("DAP connection closed"))
    }
}
