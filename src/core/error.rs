use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    NotFound,
    Permission,
    Arity,
    Ceiling,
    OutOfMemory,
    Corrupt,
    Io,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    path: Option<PathBuf>,
    partition: Option<usize>,
    rows_parsed: Option<u64>,
    hint: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            path: None,
            partition: None,
            rows_parsed: None,
            hint: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }

    pub fn partition(&self) -> Option<usize> {
        self.partition
    }

    /// Rows successfully parsed before an aborting read (`Arity`/`Corrupt`
    /// under the `Fail` policy).
    pub fn rows_parsed(&self) -> Option<u64> {
        self.rows_parsed
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_partition(mut self, partition: usize) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_rows_parsed(mut self, rows_parsed: u64) -> Self {
        self.rows_parsed = Some(rows_parsed);
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(path) = &self.path {
            write!(f, " (path: {})", path.display())?;
        }
        if let Some(partition) = self.partition {
            write!(f, " (partition: {partition})")?;
        }
        if let Some(rows_parsed) = self.rows_parsed {
            write!(f, " (rows parsed: {rows_parsed})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Permission => 4,
        ErrorKind::Arity => 5,
        ErrorKind::Ceiling => 6,
        ErrorKind::OutOfMemory => 7,
        ErrorKind::Corrupt => 8,
        ErrorKind::Io => 9,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, to_exit_code};

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Internal, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::NotFound, 3),
            (ErrorKind::Permission, 4),
            (ErrorKind::Arity, 5),
            (ErrorKind::Ceiling, 6),
            (ErrorKind::OutOfMemory, 7),
            (ErrorKind::Corrupt, 8),
            (ErrorKind::Io, 9),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn display_carries_context() {
        let err = Error::new(ErrorKind::Arity)
            .with_message("expected 3 fields, found 2")
            .with_partition(4)
            .with_rows_parsed(17);
        let text = err.to_string();
        assert!(text.contains("Arity"));
        assert!(text.contains("(partition: 4)"));
        assert!(text.contains("(rows parsed: 17)"));
    }
}
