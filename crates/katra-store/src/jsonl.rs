//! Newline-delimited JSON primitives shared by both tiers.
//!
//! Callers serialise access to a file with their own lock; nothing here
//! takes one.

use std::{
  fs::{self, File, OpenOptions},
  io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write},
  ops::ControlFlow,
  path::Path,
};

use serde::{Serialize, de::DeserializeOwned};

use crate::{Error, Result};

/// Append `value` as one line and return the byte offset the line starts at.
///
/// The line and its terminator go out in a single write, followed by a
/// data sync. A file left ending in a torn line gets a terminator first, so
/// the new line always starts on a line boundary.
pub fn append<T: Serialize>(path: &Path, value: &T) -> Result<u64> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(Error::io(parent))?;
  }

  let mut file = OpenOptions::new()
    .create(true)
    .read(true)
    .append(true)
    .open(path)
    .map_err(Error::io(path))?;
  let len = file.metadata().map_err(Error::io(path))?.len();

  let mut line = Vec::new();
  if len > 0 && !ends_with_newline(&mut file).map_err(Error::io(path))? {
    tracing::warn!(path = %path.display(), offset = len, "terminating torn trailing line");
    line.push(b'\n');
  }
  let offset = len + line.len() as u64;
  serde_json::to_writer(&mut line, value)?;
  line.push(b'\n');

  file.write_all(&line).map_err(Error::io(path))?;
  file.sync_data().map_err(Error::io(path))?;
  Ok(offset)
}

fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
  let mut last = [0u8; 1];
  file.seek(SeekFrom::End(-1))?;
  file.read_exact(&mut last)?;
  Ok(last[0] == b'\n')
}

/// Size of `path` in bytes, or zero when it does not exist yet.
pub fn file_len(path: &Path) -> Result<u64> {
  match fs::metadata(path) {
    Ok(meta) => Ok(meta.len()),
    Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
    Err(e) => Err(Error::io(path)(e)),
  }
}

/// Visit every well-formed line of `path` with its starting offset.
///
/// Lines that fail to parse, and a trailing line with no terminator, are
/// skipped and counted; the count is returned. Blank lines are ignored. A
/// missing file has no lines.
pub fn scan<T, F>(path: &Path, mut visit: F) -> Result<usize>
where
  T: DeserializeOwned,
  F: FnMut(u64, T) -> ControlFlow<()>,
{
  let file = match File::open(path) {
    Ok(file) => file,
    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
    Err(e) => return Err(Error::io(path)(e)),
  };

  let mut reader = BufReader::new(file);
  let mut buf = Vec::new();
  let mut offset = 0u64;
  let mut skipped = 0;

  loop {
    buf.clear();
    let read = reader.read_until(b'\n', &mut buf).map_err(Error::io(path))?;
    if read == 0 {
      break;
    }
    let start = offset;
    offset += read as u64;

    let Some(body) = buf.strip_suffix(b"\n") else {
      tracing::warn!(path = %path.display(), offset = start, "skipping partial trailing line");
      skipped += 1;
      break;
    };
    if body.iter().all(u8::is_ascii_whitespace) {
      continue;
    }

    match serde_json::from_slice::<T>(body) {
      Ok(value) => {
        if visit(start, value).is_break() {
          break;
        }
      }
      Err(e) => {
        tracing::warn!(path = %path.display(), offset = start, error = %e, "skipping malformed line");
        skipped += 1;
      }
    }
  }

  Ok(skipped)
}

/// Parse exactly one line starting at `offset`.
pub fn read_at<T: DeserializeOwned>(path: &Path, offset: u64) -> Result<T> {
  let mut file = File::open(path).map_err(Error::io(path))?;
  file.seek(SeekFrom::Start(offset)).map_err(Error::io(path))?;

  let mut buf = Vec::new();
  BufReader::new(file)
    .read_until(b'\n', &mut buf)
    .map_err(Error::io(path))?;

  let malformed = || Error::MalformedLine {
    path: path.to_path_buf(),
    offset,
  };
  let body = buf.strip_suffix(b"\n").ok_or_else(malformed)?;
  serde_json::from_slice(body).map_err(|_| malformed())
}

/// Write `chunks` verbatim to `path`, replacing it through a sibling temp
/// file and a rename so readers never see a half-written file.
pub fn write_atomic(path: &Path, chunks: &[Vec<u8>]) -> Result<()> {
  let tmp = path.with_extension("jsonl.tmp");
  {
    let mut file = File::create(&tmp).map_err(Error::io(&tmp))?;
    for chunk in chunks {
      file.write_all(chunk).map_err(Error::io(&tmp))?;
    }
    file.sync_all().map_err(Error::io(&tmp))?;
  }
  fs::rename(&tmp, path).map_err(Error::io(path))
}

#[cfg(test)]
mod tests {
  use serde::Deserialize;

  use super::*;

  #[derive(Debug, PartialEq, Serialize, Deserialize)]
  struct Line {
    n: u32,
  }

  fn collect(path: &Path) -> (Vec<(u64, Line)>, usize) {
    let mut seen = Vec::new();
    let skipped = scan(path, |offset, line: Line| {
      seen.push((offset, line));
      ControlFlow::Continue(())
    })
    .unwrap();
    (seen, skipped)
  }

  #[test]
  fn append_reports_line_start_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("a.jsonl");

    let first = append(&path, &Line { n: 1 }).unwrap();
    let second = append(&path, &Line { n: 22 }).unwrap();
    assert_eq!(first, 0);
    assert_eq!(second, "{\"n\":1}\n".len() as u64);

    assert_eq!(read_at::<Line>(&path, second).unwrap(), Line { n: 22 });
  }

  #[test]
  fn append_after_torn_tail_starts_a_fresh_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.jsonl");
    fs::write(&path, "{\"n\":1}\n{\"n\":").unwrap();

    let offset = append(&path, &Line { n: 2 }).unwrap();
    assert_eq!(offset, "{\"n\":1}\n{\"n\":\n".len() as u64);
    assert_eq!(read_at::<Line>(&path, offset).unwrap(), Line { n: 2 });

    let (seen, skipped) = collect(&path);
    assert_eq!(seen.iter().map(|(_, l)| l.n).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(seen[1].0, offset);
    assert_eq!(skipped, 1);
  }

  #[test]
  fn scan_skips_garbage_and_partial_tail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.jsonl");
    fs::write(&path, "{\"n\":1}\nnot json\n\n{\"n\":2}\n{\"n\":3").unwrap();

    let (seen, skipped) = collect(&path);
    assert_eq!(seen.iter().map(|(_, l)| l.n).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(skipped, 2);
    assert_eq!(seen[1].0, "{\"n\":1}\nnot json\n\n".len() as u64);
  }

  #[test]
  fn scan_of_missing_file_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let (seen, skipped) = collect(&dir.path().join("absent.jsonl"));
    assert!(seen.is_empty());
    assert_eq!(skipped, 0);
  }

  #[test]
  fn read_at_rejects_offsets_mid_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.jsonl");
    append(&path, &Line { n: 1 }).unwrap();
    assert!(matches!(
      read_at::<Line>(&path, 3),
      Err(Error::MalformedLine { offset: 3, .. })
    ));
  }
}
