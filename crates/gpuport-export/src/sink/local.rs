//! Local filesystem sink with atomic writes.

use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::sink::{gzip, Payload, SinkError};
use crate::template::render_pattern;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSinkConfig {
    pub directory: PathBuf,
    #[serde(default = "default_pattern")]
    pub filename_pattern: String,
    #[serde(default = "default_true")]
    pub create_dirs: bool,
    /// An existing file is an error unless this is set.
    #[serde(default)]
    pub overwrite: bool,
    /// Gzip the body and append `.gz` to the filename.
    #[serde(default)]
    pub compress: bool,
}

fn default_pattern() -> String {
    String::from("{pipeline}_{timestamp}.{format}")
}

const fn default_true() -> bool {
    true
}

/// Write the payload to its rendered path. The body lands in a temp file in
/// the target directory first and is persisted into place, so readers never
/// observe a partial file.
pub(crate) async fn deliver(config: &LocalSinkConfig, payload: &Payload) -> Result<String, SinkError> {
    let mut filename = render_pattern(&config.filename_pattern, &payload.template_context());
    if config.compress {
        filename.push_str(".gz");
    }
    let target = config.directory.join(&filename);

    if config.create_dirs {
        std::fs::create_dir_all(&config.directory)?;
    }

    if target.exists() && !config.overwrite {
        return Err(SinkError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists and overwrite is disabled", target.display()),
        )));
    }

    let bytes = if config.compress {
        gzip(payload.body.as_bytes())?
    } else {
        payload.body.clone().into_bytes()
    };

    let mut temp = tempfile::NamedTempFile::new_in(&config.directory)?;
    temp.write_all(&bytes)?;
    temp.flush()?;

    if config.overwrite {
        temp.persist(&target).map_err(|e| SinkError::Io(e.error))?;
    } else {
        temp.persist_noclobber(&target)
            .map_err(|e| SinkError::Io(e.error))?;
    }

    tracing::info!(
        path = %target.display(),
        bytes = bytes.len(),
        compressed = config.compress,
        "wrote export file"
    );
    Ok(target.display().to_string())
}
