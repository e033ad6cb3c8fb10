//! Atomic JSON read/write helpers (write-temp-then-rename), shared by the
//! config loader and the probe cache.

use std::fs;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub(crate) fn read_json_file<T: for<'de> Deserialize<'de>>(
    path: &Path,
) -> Result<T, ConfigError> {
    let file = fs::File::open(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn write_json_file<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), ConfigError> {
    let tmp_path = path.with_extension("tmp");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Read {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let file = fs::File::create(&tmp_path).map_err(|source| ConfigError::Read {
        path: tmp_path.clone(),
        source,
    })?;
    serde_json::to_writer_pretty(&file, value).map_err(|source| ConfigError::Parse {
        path: tmp_path.clone(),
        source,
    })?;
    fs::rename(&tmp_path, path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
