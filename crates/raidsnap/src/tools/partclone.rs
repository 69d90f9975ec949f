//! Clone por sistema de arquivos via `partclone`

use super::Capture;
use crate::model::SourceDevice;
use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::process::{Command, Stdio};

/// Assinatura no início de toda imagem gerada pelo partclone
pub const IMAGE_MAGIC: &[u8] = b"partclone-image";

/// Nome do executável do partclone para um tipo de sistema de arquivos
pub fn tool_for(fs_type: &str) -> String {
    let flavour = match fs_type {
        "vfat" | "fat" | "fat16" | "fat32" | "msdos" => "fat",
        "ext2" | "ext3" | "ext4" => "extfs",
        other => other,
    };
    format!("partclone.{}", flavour)
}

/// Executor de `partclone.<fs> -c`
pub struct PartcloneCapture;

impl PartcloneCapture {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PartcloneCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl Capture for PartcloneCapture {
    fn capture(&self, source: &SourceDevice, dest: &Path) -> Result<()> {
        let fs_type = source.fs_type.as_deref().ok_or_else(|| {
            anyhow!(
                "Tipo de sistema de arquivos de {} desconhecido; o partclone precisa dele",
                source.path.display()
            )
        })?;
        let program = tool_for(fs_type);

        let status = Command::new(&program)
            .arg("-c")
            .arg("-s")
            .arg(&source.path)
            .arg("-o")
            .arg(dest)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .status()
            .with_context(|| format!("Falha ao executar '{}'", program))?;

        if !status.success() {
            return Err(anyhow!(
                "'{}' terminou com {} clonando {}",
                program,
                status,
                source.path.display()
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_for() {
        assert_eq!(tool_for("ext4"), "partclone.extfs");
        assert_eq!(tool_for("xfs"), "partclone.xfs");
        assert_eq!(tool_for("vfat"), "partclone.fat");
        assert_eq!(tool_for("btrfs"), "partclone.btrfs");
    }

    #[test]
    fn test_unknown_fs_type_is_rejected() {
        let source = SourceDevice::new(Path::new("/dev/md0"), 10);
        let err = PartcloneCapture::new()
            .capture(&source, Path::new("/tmp/x.pcl"))
            .unwrap_err();
        assert!(err.to_string().contains("desconhecido"));
    }
}
