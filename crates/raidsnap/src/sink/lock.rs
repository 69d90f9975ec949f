//! Reserva exclusiva do destino entre execuções concorrentes

use crate::error::BackupError;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `flock` exclusivo sobre o arquivo de trava do diretório de backup.
///
/// O arquivo permanece no disco ao liberar; apagar abriria espaço para
/// outra execução travar um inode novo enquanto a anterior ainda segura o antigo.
#[derive(Debug)]
pub struct SinkLock {
    file: File,
    path: PathBuf,
}

impl SinkLock {
    /// Tenta travar sem bloquear; outra execução ativa resulta em `SinkBusy`
    pub fn acquire(path: &Path) -> Result<Self, BackupError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BackupError::Precondition(format!(
                    "não foi possível criar {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                BackupError::Precondition(format!(
                    "não foi possível abrir {}: {}",
                    path.display(),
                    e
                ))
            })?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(BackupError::SinkBusy {
                    path: path.to_path_buf(),
                });
            }
            return Err(BackupError::Precondition(format!(
                "falha ao travar {}: {}",
                path.display(),
                err
            )));
        }

        // PID só para diagnóstico; a trava é o flock
        let _ = file
            .set_len(0)
            .and_then(|_| writeln!(file, "{}", std::process::id()));

        debug!(lock = %path.display(), "destino reservado");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SinkLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}
