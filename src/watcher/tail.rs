use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Incremental reader for one append-only log.
///
/// Tracks the byte offset already consumed and holds back a trailing line
/// that has not been terminated yet, so a writer caught mid-line never yields
/// half a JSON object.
#[derive(Debug, Clone)]
pub struct LogTail {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
}

impl LogTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            partial: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Bytes of an unterminated trailing line held back so far.
    pub fn pending(&self) -> &[u8] {
        &self.partial
    }

    /// Read complete lines appended since the last call.
    ///
    /// Lines are decoded only once their newline has arrived, so a read that
    /// stops inside a multi-byte character loses nothing. If the file shrank
    /// below the stored offset it was truncated or replaced: the offset and
    /// any held-back fragment are discarded and the file is read from the
    /// start.
    pub fn read_new_lines(&mut self) -> io::Result<Vec<String>> {
        let mut file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();

        if file_len < self.offset {
            self.reset();
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let read = file.read_to_end(&mut self.partial)?;
        if read == 0 {
            return Ok(Vec::new());
        }
        self.offset += read as u64;

        let Some(last_newline) = self.partial.iter().rposition(|&b| b == b'\n') else {
            return Ok(Vec::new());
        };
        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);

        Ok(complete
            .split(|&b| b == b'\n')
            .map(|line| String::from_utf8_lossy(line).trim_end_matches('\r').to_string())
            .filter(|line| !line.trim().is_empty())
            .collect())
    }

    /// Hand out the held-back fragment, for a log that will not grow further.
    pub fn flush_partial(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&std::mem::take(&mut self.partial)).into_owned();
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    /// Forget everything read so far.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.partial.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_initial_read_returns_all_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Line 1").unwrap();
        writeln!(file, "Line 2").unwrap();

        let mut tail = LogTail::new(file.path());
        assert_eq!(tail.read_new_lines().unwrap(), vec!["Line 1", "Line 2"]);
        assert_eq!(tail.offset(), "Line 1\nLine 2\n".len() as u64);
    }

    #[test]
    fn test_incremental_reads_return_only_new_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Line 1").unwrap();

        let mut tail = LogTail::new(file.path());
        tail.read_new_lines().unwrap();

        writeln!(file, "Line 2").unwrap();
        assert_eq!(tail.read_new_lines().unwrap(), vec!["Line 2"]);
        assert!(tail.read_new_lines().unwrap().is_empty());
    }

    #[test]
    fn test_partial_line_is_held_until_terminated() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{\"type\":").unwrap();
        file.flush().unwrap();

        let mut tail = LogTail::new(file.path());
        assert!(tail.read_new_lines().unwrap().is_empty());
        assert_eq!(tail.pending(), b"{\"type\":".as_slice());

        writeln!(file, "\"system\"}}").unwrap();
        assert_eq!(tail.read_new_lines().unwrap(), vec![r#"{"type":"system"}"#]);
        assert!(tail.pending().is_empty());
    }

    #[test]
    fn test_multibyte_character_split_across_reads_survives() {
        let mut file = NamedTempFile::new().unwrap();
        let line = "{\"t\":\"é\"}\n".as_bytes();
        let split = line.iter().position(|&b| b >= 0x80).unwrap() + 1;

        file.write_all(&line[..split]).unwrap();
        file.flush().unwrap();
        let mut tail = LogTail::new(file.path());
        assert!(tail.read_new_lines().unwrap().is_empty());

        file.write_all(&line[split..]).unwrap();
        file.flush().unwrap();
        assert_eq!(tail.read_new_lines().unwrap(), vec!["{\"t\":\"é\"}"]);
    }

    #[test]
    fn test_flush_partial_returns_unterminated_tail() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "a\nb").unwrap();
        file.flush().unwrap();

        let mut tail = LogTail::new(file.path());
        assert_eq!(tail.read_new_lines().unwrap(), vec!["a"]);
        assert_eq!(tail.flush_partial().as_deref(), Some("b"));
        assert_eq!(tail.flush_partial(), None);
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "a\n\n  \r\nb\r\n").unwrap();
        file.flush().unwrap();

        let mut tail = LogTail::new(file.path());
        assert_eq!(tail.read_new_lines().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_nonexistent_file_is_an_error() {
        let mut tail = LogTail::new("/nonexistent/file.jsonl");
        assert!(tail.read_new_lines().is_err());
    }

    #[test]
    fn test_truncation_rereads_from_start() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Original line 1").unwrap();
        writeln!(file, "Original line 2").unwrap();

        let mut tail = LogTail::new(file.path());
        tail.read_new_lines().unwrap();
        let before = tail.offset();

        let path = file.path().to_path_buf();
        let mut replaced = File::create(&path).unwrap();
        writeln!(replaced, "New").unwrap();
        drop(replaced);

        assert_eq!(tail.read_new_lines().unwrap(), vec!["New"]);
        assert!(tail.offset() < before);
    }

    #[test]
    fn test_reset_then_read_returns_everything() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Line 1").unwrap();

        let mut tail = LogTail::new(file.path());
        tail.read_new_lines().unwrap();
        writeln!(file, "Line 2").unwrap();

        tail.reset();
        assert_eq!(tail.read_new_lines().unwrap(), vec!["Line 1", "Line 2"]);
    }
}
