//! Compressão gzip em processo

use super::Compressor;
use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

/// Compressor gzip (um único membro, com CRC32 e ISIZE no trailer)
pub struct GzipCompressor {
    level: u32,
}

impl GzipCompressor {
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new(6)
    }
}

impl Compressor for GzipCompressor {
    fn compress(&self, input: &mut dyn Read, dest: &Path) -> Result<u64> {
        let file = File::create(dest)
            .with_context(|| format!("Falha ao criar {}", dest.display()))?;

        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::new(self.level));
        io::copy(input, &mut encoder).context("Falha ao comprimir o fluxo de entrada")?;

        let mut writer = encoder.finish().context("Falha ao finalizar o gzip")?;
        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| e.into_error())
            .context("Falha ao descarregar o buffer do gzip")?;
        file.sync_all().context("Falha ao sincronizar o arquivo comprimido")?;

        Ok(file.metadata()?.len())
    }
}
