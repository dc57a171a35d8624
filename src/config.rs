//! Worker configuration: pool bounds and `type count` declarations.
//!
//! Declarations are integer pairs read with [`PairReader`], so they may be
//! split across lines or share one, and `#` comments are skipped. Exactly
//! `num_types` declarations are read; anything malformed or out of range is
//! a fatal configuration error.

use crate::error::{PoolvisorError, Result};
use crate::input::{Entry, PairReader};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Maximum number of worker types.
pub const MAX_TYPES: usize = 5;

/// Maximum number of workers in a single type.
pub const MAX_WORKERS_PER_TYPE: usize = 10;

/// Maximum job duration, in time units.
pub const MAX_JOB_DURATION: u32 = 10;

/// Maximum length of one command message or input line.
pub const MAX_MESSAGE_LEN: usize = 256;

/// Default length of one duration unit (1 second).
pub const DEFAULT_TIME_UNIT_MS: u64 = 1000;

/// Bounds for the worker pool and job validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Highest valid worker type (types are `1..=max_types`).
    pub max_types: usize,
    /// Highest valid worker count for one type.
    pub max_workers_per_type: usize,
    /// Highest valid job duration.
    pub max_job_duration: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_types: MAX_TYPES,
            max_workers_per_type: MAX_WORKERS_PER_TYPE,
            max_job_duration: MAX_JOB_DURATION,
        }
    }
}

/// One `type count` declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerDecl {
    /// Worker type, in `1..=max_types`.
    pub worker_type: usize,
    /// Number of workers to create for the type.
    pub count: usize,
}

/// Check one `type count` entry.
pub fn parse_declaration(entry: Entry, limits: &Limits) -> Result<WorkerDecl> {
    let (worker_type, count) = match entry {
        Entry::Pair(worker_type, count) => (worker_type, count),
        Entry::Malformed(text) => {
            return Err(PoolvisorError::Config(format!(
                "expected 'type count', got '{}'",
                text
            )));
        }
    };

    if worker_type < 1 || worker_type > limits.max_types as i64 {
        return Err(PoolvisorError::Config(format!(
            "Invalid worker type: {} (must be 1-{})",
            worker_type, limits.max_types
        )));
    }
    if count < 1 || count > limits.max_workers_per_type as i64 {
        return Err(PoolvisorError::Config(format!(
            "Invalid worker count: {} for type {} (must be 1-{})",
            count, worker_type, limits.max_workers_per_type
        )));
    }

    Ok(WorkerDecl {
        worker_type: worker_type as usize,
        count: count as usize,
    })
}

/// Read exactly `num_types` declarations from `reader`.
///
/// Reading stops after the last declaration, so the same reader can go on
/// to serve job input, including any pairs left on the final line.
pub fn read_declarations<R: Read>(
    reader: &mut PairReader<R>,
    num_types: usize,
    limits: &Limits,
) -> Result<Vec<WorkerDecl>> {
    if num_types == 0 || num_types > limits.max_types {
        return Err(PoolvisorError::Config(format!(
            "number of worker types must be 1-{}, got {}",
            limits.max_types, num_types
        )));
    }

    let mut decls: Vec<WorkerDecl> = Vec::with_capacity(num_types);
    while decls.len() < num_types {
        let entry = reader
            .read_entry()
            .map_err(|e| PoolvisorError::Config(format!("cannot read declarations: {}", e)))?;
        let Some(entry) = entry else {
            return Err(PoolvisorError::Config(format!(
                "expected {} declarations, got {}",
                num_types,
                decls.len()
            )));
        };

        let decl = parse_declaration(entry, limits)?;
        if decls.iter().any(|d| d.worker_type == decl.worker_type) {
            return Err(PoolvisorError::Config(format!(
                "Duplicate worker type: {}",
                decl.worker_type
            )));
        }
        decls.push(decl);
    }

    Ok(decls)
}

/// Load declarations from a configuration file.
pub fn load_declarations(path: &Path, num_types: usize, limits: &Limits) -> Result<Vec<WorkerDecl>> {
    let file = File::open(path).map_err(|e| {
        PoolvisorError::Config(format!("cannot open {}: {}", path.display(), e))
    })?;
    let mut reader = PairReader::new(file);
    read_declarations(&mut reader, num_types, limits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    fn reader(text: &str) -> PairReader<Cursor<Vec<u8>>> {
        PairReader::new(Cursor::new(text.as_bytes().to_vec()))
    }

    #[test]
    fn test_limits_default() {
        let limits = Limits::default();
        assert_eq!(limits.max_types, 5);
        assert_eq!(limits.max_workers_per_type, 10);
        assert_eq!(limits.max_job_duration, 10);
    }

    #[test]
    fn test_parse_declaration() {
        let decl = parse_declaration(Entry::Pair(3, 4), &Limits::default()).unwrap();
        assert_eq!(
            decl,
            WorkerDecl {
                worker_type: 3,
                count: 4
            }
        );
    }

    #[test]
    fn test_parse_declaration_rejects_out_of_range() {
        let limits = Limits::default();

        let err = parse_declaration(Entry::Pair(6, 1), &limits).unwrap_err();
        assert!(err.to_string().contains("Invalid worker type: 6"));

        let err = parse_declaration(Entry::Pair(0, 1), &limits).unwrap_err();
        assert!(err.to_string().contains("Invalid worker type: 0"));

        let err = parse_declaration(Entry::Pair(2, 11), &limits).unwrap_err();
        assert!(err.to_string().contains("Invalid worker count: 11 for type 2"));

        let err = parse_declaration(Entry::Pair(2, 0), &limits).unwrap_err();
        assert!(err.to_string().contains("Invalid worker count: 0"));
    }

    #[test]
    fn test_read_declarations_rejects_malformed() {
        let limits = Limits::default();
        for text in ["one 2\n", "1 two\n", "1\n"] {
            let err = read_declarations(&mut reader(text), 1, &limits).unwrap_err();
            assert!(err.to_string().contains("expected 'type count'"), "{:?}", text);
            assert_eq!(err.exit_code(), 2);
        }
    }

    #[test]
    fn test_read_declarations_skips_blank_and_comments() {
        let mut r = reader("# pool\n1 2\n\n2 3 # three of type 2\n");
        let decls = read_declarations(&mut r, 2, &Limits::default()).unwrap();
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].worker_type, 1);
        assert_eq!(decls[1].count, 3);
    }

    #[test]
    fn test_read_declarations_as_tokens() {
        let expected = vec![
            WorkerDecl {
                worker_type: 1,
                count: 2,
            },
            WorkerDecl {
                worker_type: 2,
                count: 1,
            },
        ];
        let decls = read_declarations(&mut reader("1 2 2 1\n"), 2, &Limits::default()).unwrap();
        assert_eq!(decls, expected);
        let decls = read_declarations(&mut reader("1\n2\n2\n1\n"), 2, &Limits::default()).unwrap();
        assert_eq!(decls, expected);
    }

    #[test]
    fn test_read_declarations_leaves_job_input() {
        let mut r = reader("1 2 1 5\n1 3\n");
        read_declarations(&mut r, 1, &Limits::default()).unwrap();
        assert_eq!(r.read_entry().unwrap(), Some(Entry::Pair(1, 5)));
        assert_eq!(r.read_entry().unwrap(), Some(Entry::Pair(1, 3)));
        assert_eq!(r.read_entry().unwrap(), None);
    }

    #[test]
    fn test_read_declarations_short_input() {
        let mut r = reader("1 2\n");
        let err = read_declarations(&mut r, 2, &Limits::default()).unwrap_err();
        assert!(err.to_string().contains("expected 2 declarations, got 1"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_read_declarations_duplicate_type() {
        let mut r = reader("1 2\n1 3\n");
        let err = read_declarations(&mut r, 2, &Limits::default()).unwrap_err();
        assert!(err.to_string().contains("Duplicate worker type: 1"));
    }

    #[test]
    fn test_read_declarations_num_types_bounds() {
        let mut r = reader("1 1\n");
        assert!(read_declarations(&mut r, 0, &Limits::default()).is_err());
        let mut r = reader("1 1\n");
        assert!(read_declarations(&mut r, 6, &Limits::default()).is_err());
    }

    #[test]
    fn test_load_declarations_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# two types\n1 2\n4 1").unwrap();

        let decls = load_declarations(file.path(), 2, &Limits::default()).unwrap();
        assert_eq!(
            decls,
            vec![
                WorkerDecl {
                    worker_type: 1,
                    count: 2
                },
                WorkerDecl {
                    worker_type: 4,
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn test_load_declarations_missing_file() {
        let err = load_declarations(
            Path::new("/nonexistent/poolvisor.conf"),
            1,
            &Limits::default(),
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
