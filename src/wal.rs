use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::limits::MAX_FRAME_LEN;
use crate::model::Event;

/// File magic + format version, written once at offset 0.
const HEADER: [u8; 8] = *b"ASSETD\x00\x01";

/// Encode a single event as `[u32 len][bincode payload][u32 crc32(payload)]`.
fn encode_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "event too large"));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Bytes taken by a frame holding `len` payload bytes.
fn frame_size(len: usize) -> u64 {
    (4 + len + 4) as u64
}

enum Frame {
    /// A good event and its payload length.
    Event(Event, usize),
    /// Short read, bad checksum, or undecodable payload. Everything from here on is dropped.
    Torn,
    End,
}

/// Read exactly `buf.len()` bytes; `Ok(false)` on EOF before the buffer is full.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let mut len_buf = [0u8; 4];
    let mut first = [0u8; 1];
    // Distinguish a clean end (no bytes at all) from a torn length prefix.
    if reader.read(&mut first)? == 0 {
        return Ok(Frame::End);
    }
    len_buf[0] = first[0];
    if !read_full(reader, &mut len_buf[1..])? {
        return Ok(Frame::Torn);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Ok(Frame::Torn);
    }

    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(Frame::Torn);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(Frame::Torn);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Frame::Torn);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Frame::Event(event, len)),
        Err(_) => Ok(Frame::Torn),
    }
}

/// What replay recovered from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// True when a partial or corrupt trailing frame was discarded (crash mid-append).
    pub torn_tail: bool,
    /// Byte length of the intact prefix: the header plus every good frame.
    pub valid_len: u64,
}

/// Append-only event log backing one inventory.
///
/// Layout: an 8-byte header followed by frames of
/// `[u32: len][bincode: Event][u32: crc32]`. A torn final frame is discarded
/// on replay; nothing after the first bad frame is trusted.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length and append count as of the last successful `flush_sync`.
    committed_len: u64,
    committed_appends: u64,
}

impl Wal {
    /// Open (or create) the log at `path`, writing the header into an empty file.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        if writer.get_ref().metadata()?.len() == 0 {
            writer.write_all(&HEADER)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        let committed_len = writer.get_ref().metadata()?.len();
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            appends_since_compact: 0,
            committed_len,
            committed_appends: 0,
        })
    }

    /// Cut the log at `len`, dropping a torn tail so new frames follow the
    /// last good one.
    pub fn truncate(path: &Path, len: u64) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(len)?;
        file.sync_all()
    }

    /// Buffer one event. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_frame(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush buffered frames and fsync.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.committed_len = self.writer.get_ref().metadata()?.len();
        self.committed_appends = self.appends_since_compact;
        Ok(())
    }

    /// Throw away everything since the last successful `flush_sync`: buffered
    /// frames are discarded and any bytes already written are cut off.
    pub fn rollback(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // `into_parts` hands back the buffer without writing it.
        drop(stale.into_parts());
        self.appends_since_compact = self.committed_appends;
        Self::truncate(&self.path, self.committed_len)
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.compact")
    }

    /// Write a snapshot log next to the live one. Slow; does not touch the live file.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        writer.write_all(&HEADER)?;
        for event in events {
            encode_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the live log and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.committed_appends = 0;
        Ok(())
    }

    /// Read every intact event. A missing file replays as empty; a file with a
    /// foreign header is an error rather than silently ignored.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        if file.metadata()?.len() == 0 {
            return Ok(Replay::default());
        }
        let mut reader = BufReader::new(file);
        let mut header = [0u8; HEADER.len()];
        if !read_full(&mut reader, &mut header)? || header != HEADER {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not an assetd journal", path.display()),
            ));
        }

        let mut replay = Replay {
            valid_len: HEADER.len() as u64,
            ..Replay::default()
        };
        loop {
            match read_frame(&mut reader)? {
                Frame::Event(event, len) => {
                    replay.events.push(event);
                    replay.valid_len += frame_size(len);
                }
                Frame::Torn => {
                    replay.torn_tail = true;
                    break;
                }
                Frame::End => break,
            }
        }
        Ok(replay)
    }
}
