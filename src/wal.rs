use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Txn;

/// Frames larger than this are treated as garbage rather than allocated.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Write one `[u32 len][bincode Txn][u32 crc32]` frame and return its size.
fn write_frame(out: &mut impl Write, txn: &Txn) -> io::Result<u64> {
    let body =
        bincode::serialize(txn).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(body.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "transaction too large"))?;
    out.write_all(&len.to_le_bytes())?;
    out.write_all(&body)?;
    out.write_all(&crc32fast::hash(&body).to_le_bytes())?;
    Ok(body.len() as u64 + 8)
}

/// Fill `buf`, or report `false` if the file ends first.
fn read_full(input: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match input.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact frame and its size on disk, or `None` at end of file or at
/// the first torn or corrupt frame.
fn read_frame(input: &mut impl Read) -> io::Result<Option<(Txn, u64)>> {
    let mut word = [0u8; 4];
    if !read_full(input, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_FRAME_LEN {
        return Ok(None);
    }
    let mut body = vec![0u8; len];
    if !read_full(input, &mut body)? || !read_full(input, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&body) {
        return Ok(None);
    }
    Ok(bincode::deserialize(&body).ok().map(|txn| (txn, len as u64 + 8)))
}

/// Intact prefix of a log: its transactions and where the last one ends.
struct Scan {
    txns: Vec<Txn>,
    valid_len: u64,
}

fn scan(path: &Path) -> io::Result<Scan> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(Scan {
                txns: Vec::new(),
                valid_len: 0,
            });
        }
        Err(e) => return Err(e),
    };
    let mut input = BufReader::new(file);
    let mut txns = Vec::new();
    let mut valid_len = 0;
    while let Some((txn, size)) = read_frame(&mut input)? {
        txns.push(txn);
        valid_len += size;
    }
    Ok(Scan { txns, valid_len })
}

/// Append-only write-ahead log of committed transactions.
///
/// One frame per `Txn`. A crash mid-write leaves a torn last frame, which
/// replay drops whole, so a transaction is never half applied.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// File length covered by the last successful `flush_sync`.
    durable_len: u64,
    /// Bytes handed to `writer` since then.
    pending_len: u64,
    pending_appends: u64,
    appends_since_compact: u64,
    /// Set while the file may hold frames nobody was told about.
    broken: bool,
    #[cfg(test)]
    pub(crate) fail_after_appends: Option<u64>,
}

impl Wal {
    /// Open the log at `path`, cut any torn or corrupt tail, and return the
    /// intact transactions along with a writer positioned after them.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Txn>)> {
        let Scan { txns, valid_len } = scan(path)?;
        let file = Self::open_append(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > valid_len {
            tracing::warn!(
                "wal {}: dropping {} bytes of torn tail",
                path.display(),
                on_disk - valid_len
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok((Self::with_file(path, file, valid_len), txns))
    }

    fn with_file(path: &Path, file: File, durable_len: u64) -> Self {
        Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            durable_len,
            pending_len: 0,
            pending_appends: 0,
            appends_since_compact: 0,
            broken: false,
            #[cfg(test)]
            fail_after_appends: None,
        }
    }

    fn open_append(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    fn staging_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Append and fsync one transaction. The engine batches through
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, txn: &Txn) -> io::Result<()> {
        self.append_buffered(txn)?;
        self.flush_sync()
    }

    /// Buffer a transaction. Not durable until the next `flush_sync`.
    pub fn append_buffered(&mut self, txn: &Txn) -> io::Result<()> {
        if self.broken {
            return Err(io::Error::other("wal is unusable after a failed rollback"));
        }
        #[cfg(test)]
        if let Some(left) = self.fail_after_appends.as_mut() {
            if *left == 0 {
                return Err(io::Error::other("injected append failure"));
            }
            *left -= 1;
        }
        self.pending_len += write_frame(&mut self.writer, txn)?;
        self.pending_appends += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.durable_len += self.pending_len;
        self.appends_since_compact += self.pending_appends;
        self.pending_len = 0;
        self.pending_appends = 0;
        Ok(())
    }

    /// Throw away everything since the last `flush_sync`: the unwritten
    /// buffer and any bytes that already reached the file.
    pub fn discard_unflushed(&mut self) -> io::Result<()> {
        self.broken = true;
        let file = self.writer.get_ref().try_clone()?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // `into_parts` hands back the file without flushing the buffer.
        let (file, _unwritten) = stale.into_parts();
        file.set_len(self.durable_len)?;
        file.sync_all()?;
        self.pending_len = 0;
        self.pending_appends = 0;
        self.broken = false;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write the compacted log next to `path` and fsync it. The live log is
    /// untouched until `swap_compact_file`.
    pub fn write_compact_file(path: &Path, txns: &[Txn]) -> io::Result<()> {
        let mut staged = BufWriter::new(File::create(Self::staging_path(path))?);
        for txn in txns {
            write_frame(&mut staged, txn)?;
        }
        staged.flush()?;
        staged.get_ref().sync_all()
    }

    /// Rename the staged log over the live one and continue appending to it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::staging_path(&self.path), &self.path)?;
        let path = self.path.clone();
        let file = Self::open_append(&path)?;
        let len = file.metadata()?.len();
        *self = Self::with_file(&path, file, len);
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, txns: &[Txn]) -> io::Result<()> {
        Self::write_compact_file(&self.path, txns)?;
        self.swap_compact_file()
    }

    /// Every intact transaction in order. A missing file is an empty log;
    /// anything after the first bad frame is ignored.
    #[cfg(test)]
    pub fn replay(path: &Path) -> io::Result<Vec<Txn>> {
        Ok(scan(path)?.txns)
    }
}
