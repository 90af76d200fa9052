//! Line based prefix file format.
//!
//! ```text
//! ## repository-prefixes/2.0
//! # comments start with a hash
//! /org/apache
//! /org/sonatype
//! ```
//!
//! A file holding the `@ unsupported` line is a "noscrape" marker: it exists, but
//! tells consumers not to use (or scrape) the repository. Any file violating the
//! configured bounds is rejected as a whole, never truncated.

use crate::config::Config;
use crate::prefix::{PrefixSet, normalize_path};
use bytes::Bytes;
use flate2::read::GzDecoder;
use std::io::Read;
use thiserror::Error;

pub const MAGIC: &str = "## repository-prefixes/2.0";
pub const UNSUPPORTED_MARKER: &str = "@ unsupported";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const HEADER_COMMENTS: [&str; 2] = [
    "# Prefix file generated by autorouting",
    "# Do not edit, changes will be overwritten!",
];

#[derive(Error, Debug, PartialEq)]
pub enum CodecError {
    #[error("prefix file exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("prefix file has more than {limit} entries")]
    TooManyEntries { limit: usize },

    #[error("line {line} of prefix file exceeds {limit} characters")]
    LineTooLong { line: usize, limit: usize },

    #[error("prefix file does not start with the expected header")]
    MissingMagic,

    #[error("invalid entry on line {line}: {entry:?}")]
    InvalidEntry { line: usize, entry: String },

    #[error("prefix file is not valid UTF-8")]
    InvalidEncoding,

    #[error("could not inflate gzip content: {0}")]
    Gzip(String),
}

/// Parsed content of a prefix file.
#[derive(Clone, Debug, PartialEq)]
pub enum PrefixFile {
    Supported(PrefixSet),
    Unsupported,
}

#[derive(Clone, Debug)]
pub struct PrefixCodec {
    max_entries: usize,
    max_line_length: usize,
    max_size: usize,
}

impl PrefixCodec {
    pub fn new(config: &Config) -> Self {
        PrefixCodec {
            max_entries: config.prefix_file_max_entries_count,
            max_line_length: config.prefix_file_max_line_length,
            max_size: config.prefix_file_max_size,
        }
    }

    pub fn read(&self, content: &[u8]) -> Result<PrefixFile, CodecError> {
        let inflated;
        let content = if content.starts_with(&GZIP_MAGIC) {
            inflated = self.inflate(content)?;
            &inflated[..]
        } else {
            content
        };
        if content.len() > self.max_size {
            return Err(CodecError::TooLarge {
                limit: self.max_size,
            });
        }
        let text = std::str::from_utf8(content).map_err(|_| CodecError::InvalidEncoding)?;

        let mut seen_magic = false;
        let mut unsupported = false;
        let mut entries = PrefixSet::new();
        let mut entry_lines = 0;
        for (idx, raw_line) in text.lines().enumerate() {
            let line_number = idx + 1;
            if raw_line.len() > self.max_line_length {
                return Err(CodecError::LineTooLong {
                    line: line_number,
                    limit: self.max_line_length,
                });
            }
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            if !seen_magic {
                if line != MAGIC {
                    return Err(CodecError::MissingMagic);
                }
                seen_magic = true;
                continue;
            }
            if line.starts_with('#') {
                continue;
            }
            if line == UNSUPPORTED_MARKER {
                unsupported = true;
                continue;
            }
            if !line.starts_with('/') {
                return Err(CodecError::InvalidEntry {
                    line: line_number,
                    entry: line.to_string(),
                });
            }
            entry_lines += 1;
            if entry_lines > self.max_entries {
                return Err(CodecError::TooManyEntries {
                    limit: self.max_entries,
                });
            }
            entries.insert(line);
        }

        if !seen_magic {
            return Err(CodecError::MissingMagic);
        }
        if unsupported {
            return Ok(PrefixFile::Unsupported);
        }
        Ok(PrefixFile::Supported(entries))
    }

    pub fn write(&self, entries: &PrefixSet) -> Result<Bytes, CodecError> {
        if entries.len() > self.max_entries {
            return Err(CodecError::TooManyEntries {
                limit: self.max_entries,
            });
        }
        let mut out = self.header();
        for (idx, entry) in entries.iter().enumerate() {
            let entry = normalize_path(entry);
            if entry.len() > self.max_line_length {
                return Err(CodecError::LineTooLong {
                    line: idx + 1 + 1 + HEADER_COMMENTS.len(),
                    limit: self.max_line_length,
                });
            }
            out.push_str(&entry);
            out.push('\n');
        }
        if out.len() > self.max_size {
            return Err(CodecError::TooLarge {
                limit: self.max_size,
            });
        }
        Ok(Bytes::from(out))
    }

    pub fn write_unsupported(&self) -> Bytes {
        let mut out = self.header();
        out.push_str(UNSUPPORTED_MARKER);
        out.push('\n');
        Bytes::from(out)
    }

    fn header(&self) -> String {
        let mut out = String::with_capacity(128);
        out.push_str(MAGIC);
        out.push('\n');
        for comment in HEADER_COMMENTS {
            out.push_str(comment);
            out.push('\n');
        }
        out
    }

    fn inflate(&self, content: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut inflated = Vec::new();
        GzDecoder::new(content)
            .take(self.max_size as u64 + 1)
            .read_to_end(&mut inflated)
            .map_err(|e| CodecError::Gzip(e.to_string()))?;
        Ok(inflated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn codec(max_entries: usize, max_line_length: usize, max_size: usize) -> PrefixCodec {
        PrefixCodec::new(&Config {
            prefix_file_max_entries_count: max_entries,
            prefix_file_max_line_length: max_line_length,
            prefix_file_max_size: max_size,
            ..Config::default()
        })
    }

    fn prefix_file(with_comments: bool) -> String {
        let mut lines = vec![MAGIC];
        if with_comments {
            lines.push("# This is mighty prefix file!");
        }
        lines.push("/org/apache/maven");
        lines.push("/org/sonatype");
        if with_comments {
            lines.push(" # Added later");
        }
        lines.push("/eu/flatwhite");
        lines.join("\n") + "\n"
    }

    #[test]
    fn test_read_with_comments() {
        let codec = PrefixCodec::new(&Config::default());
        for with_comments in [true, false] {
            let parsed = codec.read(prefix_file(with_comments).as_bytes()).unwrap();
            assert_eq!(
                parsed,
                PrefixFile::Supported(PrefixSet::from_entries([
                    "/org/apache/maven",
                    "/org/sonatype",
                    "/eu/flatwhite"
                ]))
            );
        }
    }

    #[test]
    fn test_read_gzip() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(prefix_file(true).as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let parsed = PrefixCodec::new(&Config::default()).read(&compressed).unwrap();
        let PrefixFile::Supported(entries) = parsed else {
            panic!("expected supported file");
        };
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn test_read_unsupported_marker() {
        let codec = PrefixCodec::new(&Config::default());
        let content = codec.write_unsupported();
        assert_eq!(codec.read(&content).unwrap(), PrefixFile::Unsupported);
    }

    #[test]
    fn test_bounds_reject_whole_file() {
        let content = prefix_file(false);

        // 3 entries, but only 2 allowed
        assert_eq!(
            codec(2, 250, 1024).read(content.as_bytes()),
            Err(CodecError::TooManyEntries { limit: 2 })
        );
        // "/org/apache/maven" is 17 characters
        assert!(matches!(
            codec(100, 16, 1024).read(content.as_bytes()),
            Err(CodecError::LineTooLong { .. })
        ));
        assert_eq!(
            codec(100, 250, 20).read(content.as_bytes()),
            Err(CodecError::TooLarge { limit: 20 })
        );

        // repeated lines count against the bound too
        let repeated = format!("{MAGIC}\n/org\n/org\n/org\n");
        assert_eq!(
            codec(2, 250, 1024).read(repeated.as_bytes()),
            Err(CodecError::TooManyEntries { limit: 2 })
        );
    }

    #[test]
    fn test_gzip_size_bound_applies_to_inflated_content() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
        let mut content = String::from(MAGIC);
        content.push('\n');
        content.push_str(&"# padding\n".repeat(500));
        encoder.write_all(content.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();
        assert!(compressed.len() < 1024);

        assert_eq!(
            codec(100, 250, 1024).read(&compressed),
            Err(CodecError::TooLarge { limit: 1024 })
        );
    }

    #[test]
    fn test_read_rejects_malformed() {
        let codec = PrefixCodec::new(&Config::default());
        assert_eq!(
            codec.read(b"/org/apache\n"),
            Err(CodecError::MissingMagic)
        );
        assert_eq!(codec.read(b""), Err(CodecError::MissingMagic));
        assert!(matches!(
            codec.read(format!("{MAGIC}\norg/apache\n").as_bytes()),
            Err(CodecError::InvalidEntry { line: 2, .. })
        ));
        assert_eq!(
            codec.read(&[0xff, 0xfe, 0x00]),
            Err(CodecError::InvalidEncoding)
        );
    }

    #[test]
    fn test_write_then_read() {
        let codec = PrefixCodec::new(&Config::default());
        let entries = PrefixSet::from_entries(["/org/sonatype", "/com/example"]);
        let written = codec.write(&entries).unwrap();
        let text = std::str::from_utf8(&written).unwrap();
        assert!(text.starts_with(MAGIC));
        assert!(!text.contains("\n\n"));
        assert_eq!(codec.read(&written).unwrap(), PrefixFile::Supported(entries));
    }

    #[test]
    fn test_write_enforces_bounds() {
        let entries = PrefixSet::from_entries(["/a", "/b", "/c"]);
        assert_eq!(
            codec(2, 250, 1024).write(&entries),
            Err(CodecError::TooManyEntries { limit: 2 })
        );
        let entries = PrefixSet::from_entries(["/a-rather-long-entry"]);
        assert!(matches!(
            codec(10, 10, 1024).write(&entries),
            Err(CodecError::LineTooLong { .. })
        ));
    }
}
