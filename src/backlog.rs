//! Reading the last few lines of a file without scanning it from the start.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Upper bound on the bytes read per backward step.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Returns up to `n` of the last non-blank lines of `path`, oldest first.
///
/// The file is read backwards from its end in chunks of at most
/// [`CHUNK_SIZE`] bytes, so the cost depends on the size of the tail rather
/// than the size of the file. A missing or empty file yields an empty vec, as
/// does any read failure (which is logged). Invalid UTF-8 sequences are
/// dropped from the returned lines.
///
/// This blocks on filesystem I/O. From async code use [`read_backlog`].
pub fn last_lines(path: impl AsRef<Path>, n: usize) -> Vec<String> {
    let path = path.as_ref();

    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to open file for backlog");
            return Vec::new();
        }
    };

    match scan_backwards(&mut file, n, CHUNK_SIZE) {
        Ok(lines) => lines,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read backlog");
            Vec::new()
        }
    }
}

/// Runs [`last_lines`] on the blocking thread pool so a slow or very large
/// file cannot stall other tasks.
pub async fn read_backlog(path: impl Into<PathBuf>, n: usize) -> Vec<String> {
    let path = path.into();

    match tokio::task::spawn_blocking(move || last_lines(path, n)).await {
        Ok(lines) => lines,
        Err(e) => {
            tracing::warn!(error = %e, "Backlog task did not complete");
            Vec::new()
        }
    }
}

fn scan_backwards<R: Read + Seek>(
    reader: &mut R,
    n: usize,
    chunk_size: usize,
) -> io::Result<Vec<String>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let mut lines = VecDeque::new();

    let mut pos = reader.seek(SeekFrom::End(0))?;
    // Bytes in front of the earliest newline seen so far. They may continue
    // into the next (earlier) chunk.
    let mut carry: Vec<u8> = Vec::new();

    while pos > 0 && lines.len() < n {
        let read_size = pos.min(chunk_size as u64) as usize;
        pos -= read_size as u64;

        reader.seek(SeekFrom::Start(pos))?;
        let mut buf = vec![0; read_size + carry.len()];
        reader.read_exact(&mut buf[..read_size])?;
        buf[read_size..].copy_from_slice(&carry);

        let mut fragments = buf.split(|&b| b == b'\n');
        let head = fragments.next().unwrap_or_default();
        let complete: Vec<&[u8]> = fragments.collect();

        for fragment in complete.into_iter().rev() {
            if lines.len() == n {
                break;
            }
            push_front_nonblank(&mut lines, fragment);
        }

        if pos == 0 {
            if lines.len() < n {
                push_front_nonblank(&mut lines, head);
            }
        } else {
            carry = head.to_vec();
        }
    }

    Ok(lines.into())
}

fn push_front_nonblank(lines: &mut VecDeque<String>, raw: &[u8]) {
    let line = decode_line(raw);
    if !line.trim().is_empty() {
        lines.push_front(line);
    }
}

/// Decodes one line of log output, dropping its terminator and any byte
/// sequences that are not valid UTF-8.
pub(crate) fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

    let mut line = String::with_capacity(raw.len());
    for chunk in raw.utf8_chunks() {
        line.push_str(chunk.valid());
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::tempdir;

    fn scan(content: &[u8], n: usize, chunk_size: usize) -> Vec<String> {
        scan_backwards(&mut Cursor::new(content), n, chunk_size).unwrap()
    }

    #[test]
    fn test_last_two_of_three() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("abc.log");
        std::fs::write(&path, "a\nb\nc\n").unwrap();

        assert_eq!(last_lines(&path, 2), vec!["b", "c"]);
    }

    #[test]
    fn test_missing_and_empty_files() {
        let tmp_dir = tempdir().unwrap();
        let missing = tmp_dir.path().join("missing.log");
        let empty = tmp_dir.path().join("empty.log");
        File::create(&empty).unwrap();

        assert!(last_lines(&missing, 5).is_empty());
        assert!(last_lines(&empty, 5).is_empty());
    }

    #[test]
    fn test_fewer_lines_than_requested() {
        assert_eq!(scan(b"one\n\n  \ntwo\n", 10, CHUNK_SIZE), vec!["one", "two"]);
        assert_eq!(scan(b"only", 3, CHUNK_SIZE), vec!["only"]);
        assert!(scan(b"\n\n \t\n", 3, CHUNK_SIZE).is_empty());
    }

    #[test]
    fn test_zero_requested() {
        assert!(scan(b"a\nb\n", 0, CHUNK_SIZE).is_empty());
    }

    #[test]
    fn test_lines_straddle_chunks() {
        let content: String = (0..200).map(|i| format!("line number {}\n", i)).collect();
        let expected: Vec<String> = (190..200).map(|i| format!("line number {}", i)).collect();

        // Chunk sizes that never line up with a line boundary.
        for chunk_size in [1, 3, 7, 13, 64, 1000] {
            assert_eq!(
                scan(content.as_bytes(), 10, chunk_size),
                expected,
                "chunk size {}",
                chunk_size
            );
        }
    }

    #[test]
    fn test_first_line_found_at_start_of_file() {
        let content = b"first\nsecond\nthird";
        for chunk_size in [2, 5, 6, 100] {
            assert_eq!(
                scan(content, 5, chunk_size),
                vec!["first", "second", "third"]
            );
        }
    }

    #[test]
    fn test_blank_lines_do_not_count() {
        let content = b"a\nb\n\n\n   \nc\n\r\n";
        assert_eq!(scan(content, 2, 4), vec!["b", "c"]);
    }

    #[test]
    fn test_crlf_and_invalid_utf8() {
        let content = b"alpha\r\nbe\xfft\xc3\xa4\r\n";
        assert_eq!(scan(content, 5, 3), vec!["alpha", "bet\u{e4}"]);
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let content = "\u{1f600}\u{1f600}\n\u{e9}t\u{e9}\n".as_bytes();
        for chunk_size in 1..content.len() {
            assert_eq!(
                scan(content, 2, chunk_size),
                vec!["\u{1f600}\u{1f600}", "\u{e9}t\u{e9}"]
            );
        }
    }

    #[test]
    fn test_large_file_reads_only_the_tail() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("big.log");
        let mut file = File::create(&path).unwrap();
        for i in 0..20_000 {
            writeln!(file, "entry {:05} {}", i, "x".repeat(40)).unwrap();
        }
        drop(file);

        let lines = last_lines(&path, 3);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("entry 19997 "));
        assert!(lines[2].starts_with("entry 19999 "));
    }

    #[tokio::test]
    async fn test_read_backlog_off_thread() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("async.log");
        std::fs::write(&path, "x\ny\nz\n").unwrap();

        assert_eq!(read_backlog(&path, 5).await, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line(b"text\r\n"), "text");
        assert_eq!(decode_line(b"text\n"), "text");
        assert_eq!(decode_line(b"\xfe\xffok"), "ok");
    }
}
