//! Size-capped log file with numbered archives.
//!
//! `<name>.log` takes the writes. When a write would push it past the cap it
//! is renamed to `<name>.<seq>.log`, one above the newest archive, and
//! archives beyond the retention count are deleted oldest first.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub(crate) struct RotatingFile {
    dir: PathBuf,
    name: String,
    max_size: u64,
    max_archives: usize,
    file: File,
    written: u64,
}

impl RotatingFile {
    pub(crate) fn open(
        dir: &Path,
        name: &str,
        max_size: u64,
        max_archives: usize,
    ) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.log", name));
        let (file, written) = open_append(&path)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            max_size,
            max_archives,
            file,
            written,
        })
    }

    pub(crate) fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.name))
    }

    fn archive_path(&self, seq: u64) -> PathBuf {
        self.dir.join(format!("{}.{}.log", self.name, seq))
    }

    fn archive_seq(&self, file_name: &str) -> Option<u64> {
        file_name
            .strip_prefix(self.name.as_str())?
            .strip_prefix('.')?
            .strip_suffix(".log")?
            .parse()
            .ok()
    }

    /// Sequence numbers of existing archives, oldest first.
    fn archives(&self) -> io::Result<Vec<u64>> {
        let mut seqs = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(seq) = entry.file_name().to_str().and_then(|n| self.archive_seq(n)) {
                seqs.push(seq);
            }
        }
        seqs.sort_unstable();
        Ok(seqs)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let mut seqs = self.archives()?;
        let next = seqs.last().map_or(1, |seq| seq + 1);
        fs::rename(self.path(), self.archive_path(next))?;
        seqs.push(next);

        let excess = seqs.len().saturating_sub(self.max_archives);
        for seq in &seqs[..excess] {
            fs::remove_file(self.archive_path(*seq))?;
        }

        let (file, written) = open_append(&self.path())?;
        self.file = file;
        self.written = written;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // A single oversized event still lands in an empty file
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<(File, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let size = file.metadata()?.len();
    Ok((file, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read(dir: &TempDir, name: &str) -> String {
        fs::read_to_string(dir.path().join(name)).unwrap()
    }

    #[test]
    fn test_rotation_keeps_newest_archives() {
        let dir = TempDir::new().unwrap();
        let mut file = RotatingFile::open(dir.path(), "pipe", 16, 2).unwrap();

        for i in 0..10 {
            file.write_all(format!("line-{:02}-abcdef\n", i).as_bytes())
                .unwrap();
        }
        file.flush().unwrap();

        assert_eq!(read(&dir, "pipe.log"), "line-09-abcdef\n");
        assert_eq!(read(&dir, "pipe.9.log"), "line-08-abcdef\n");
        assert_eq!(read(&dir, "pipe.8.log"), "line-07-abcdef\n");
        assert!(!dir.path().join("pipe.7.log").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 3);
    }

    #[test]
    fn test_reopen_appends_and_continues_numbering() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pipe.log"), "old\n").unwrap();
        fs::write(dir.path().join("pipe.4.log"), "older\n").unwrap();
        // Another app's archive in the same directory is left alone
        fs::write(dir.path().join("pipe_2.7.log"), "other\n").unwrap();

        let mut file = RotatingFile::open(dir.path(), "pipe", 6, 3).unwrap();
        file.write_all(b"new\n").unwrap();
        file.flush().unwrap();

        assert_eq!(read(&dir, "pipe.log"), "new\n");
        assert_eq!(read(&dir, "pipe.5.log"), "old\n");
        assert_eq!(read(&dir, "pipe.4.log"), "older\n");
        assert_eq!(read(&dir, "pipe_2.7.log"), "other\n");
    }

    #[test]
    fn test_small_writes_share_a_file() {
        let dir = TempDir::new().unwrap();
        let mut file = RotatingFile::open(dir.path(), "pipe", 1024, 1).unwrap();
        file.write_all(b"a\n").unwrap();
        file.write_all(b"b\n").unwrap();
        file.flush().unwrap();
        assert_eq!(read(&dir, "pipe.log"), "a\nb\n");
        assert_eq!(file.path(), dir.path().join("pipe.log"));
    }
}
