//! Captura de disco inteiro via `dd`

use super::Capture;
use crate::model::SourceDevice;
use anyhow::{anyhow, Context, Result};
use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Granularidade fixa dos blocos copiados
pub const DEFAULT_BLOCK_SIZE: &str = "4M";

/// Executor de `dd` para cópia bit a bit
pub struct DdCapture {
    program: String,
    block_size: String,
}

impl DdCapture {
    pub fn new() -> Self {
        Self {
            program: "dd".to_string(),
            block_size: DEFAULT_BLOCK_SIZE.to_string(),
        }
    }

    /// Argumentos do `dd` para copiar `source` em `dest`
    pub fn build_args(&self, source: &Path, dest: &Path) -> Vec<OsString> {
        let mut input = OsString::from("if=");
        input.push(source);
        let mut output = OsString::from("of=");
        output.push(dest);

        vec![
            input,
            output,
            OsString::from(format!("bs={}", self.block_size)),
            // Sem `conv=sync`: preenchimento mudaria o tamanho da imagem
            OsString::from("iflag=fullblock"),
            OsString::from("conv=fsync"),
            OsString::from("status=progress"),
        ]
    }
}

impl Default for DdCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl Capture for DdCapture {
    fn capture(&self, source: &SourceDevice, dest: &Path) -> Result<()> {
        let args = self.build_args(&source.path, dest);
        debug!(program = %self.program, ?args, "iniciando cópia");

        // stderr herdado para o operador acompanhar o progresso
        let status = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .status()
            .with_context(|| format!("Falha ao executar '{}'", self.program))?;

        if !status.success() {
            return Err(anyhow!(
                "'{}' terminou com {} copiando {} para {}",
                self.program,
                status,
                source.path.display(),
                dest.display()
            ));
        }

        Ok(())
    }
}
