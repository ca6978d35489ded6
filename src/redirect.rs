//! File redirection for `>`, `>>` and `<`.
//!
//! Text-mode commands move data through their declared encoding; binary-mode
//! commands move raw bytes and never carry an encoding.

use crate::encoding::Encoding;
use crate::error::Result;
use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

/// How a redirection target is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileMode {
    pub(crate) append: bool,
    /// `None` exactly when the command is in binary mode.
    pub(crate) encoding: Option<Encoding>,
}

impl FileMode {
    pub(crate) fn output(text: bool, encoding: Encoding, append: bool) -> Self {
        Self {
            append,
            encoding: text.then_some(encoding),
        }
    }

    pub(crate) fn input(text: bool, encoding: Encoding) -> Self {
        Self {
            append: false,
            encoding: text.then_some(encoding),
        }
    }

    /// Write `data` to `path`. The file is only touched once `data` is known
    /// to be valid in the declared encoding.
    pub(crate) fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let encoded = match self.encoding {
            Some(encoding) => Cow::Owned(encoding.encode(&encoding.decode(data)?)?),
            None => Cow::Borrowed(data),
        };
        let mut options = OpenOptions::new();
        options.create(true);
        if self.append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        options.open(path)?.write_all(&encoded)?;
        tracing::debug!(path = %path.display(), append = self.append, bytes = data.len(), "redirected output");
        Ok(())
    }

    pub(crate) fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        match self.encoding {
            Some(encoding) => {
                let text = encoding.decode(&data)?;
                encoding.encode(&text)
            }
            None => Ok(data),
        }
    }
}
