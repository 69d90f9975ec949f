//! Empacotamento em ISO inicializável via `xorriso -as mkisofs`

use super::{PackageRequest, Packager};
use anyhow::{anyhow, Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Maior arquivo que cabe num único extent ISO 9660 (nível 2)
pub const SIMPLE_FORMAT_LIMIT: u64 = 4 * 1024 * 1024 * 1024 - 1;

const BOOT_IMAGE: &str = "isolinux.bin";

/// Formato da imagem ISO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFormat {
    /// ISO 9660 nível 2: arquivos até 4 GiB - 1
    Iso9660,
    /// ISO 9660 nível 3: arquivos multi-extent, sem limite prático
    Iso9660Extended,
}

impl PackageFormat {
    /// Escolhe o formato pelo tamanho medido do payload
    pub fn for_payload_size(bytes: u64) -> Self {
        if bytes > SIMPLE_FORMAT_LIMIT {
            PackageFormat::Iso9660Extended
        } else {
            PackageFormat::Iso9660
        }
    }

    fn iso_level(self) -> &'static str {
        match self {
            PackageFormat::Iso9660 => "2",
            PackageFormat::Iso9660Extended => "3",
        }
    }
}

impl std::fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageFormat::Iso9660 => write!(f, "ISO 9660 nível 2"),
            PackageFormat::Iso9660Extended => write!(f, "ISO 9660 nível 3 (multi-extent)"),
        }
    }
}

/// Gerador de ISO com catálogo de boot isolinux
pub struct XorrisoPackager {
    program: String,
    boot_dir: PathBuf,
}

impl XorrisoPackager {
    pub fn new(program: &str, boot_dir: &Path) -> Self {
        Self {
            program: program.to_string(),
            boot_dir: boot_dir.to_path_buf(),
        }
    }

    /// Argumentos completos do `xorriso` para o pedido
    pub fn build_args(&self, request: &PackageRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-as",
            "mkisofs",
            "-iso-level",
            request.format.iso_level(),
            "-r",
            "-V",
        ]
        .iter()
        .map(OsString::from)
        .collect();

        args.push(OsString::from(&request.volume_label));
        args.push(OsString::from("-o"));
        args.push(request.output.clone().into_os_string());

        for flag in [
            "-b",
            "isolinux/isolinux.bin",
            "-c",
            "isolinux/boot.cat",
            "-no-emul-boot",
            "-boot-load-size",
            "4",
            "-boot-info-table",
            "-graft-points",
        ] {
            args.push(OsString::from(flag));
        }

        let mut boot = OsString::from("isolinux=");
        boot.push(&self.boot_dir);
        args.push(boot);

        for entry in &request.payload {
            let mut graft = OsString::from(format!("{}=", entry.name));
            graft.push(&entry.source);
            args.push(graft);
        }

        args
    }
}

impl Packager for XorrisoPackager {
    fn package(&self, request: &PackageRequest) -> Result<()> {
        let boot_image = self.boot_dir.join(BOOT_IMAGE);
        if !boot_image.exists() {
            return Err(anyhow!(
                "Carregador de boot não encontrado: {}\n\
                 Configure [package].boot_dir com um diretório contendo isolinux.bin e ldlinux.c32",
                boot_image.display()
            ));
        }

        let args = self.build_args(request);
        debug!(program = %self.program, ?args, "gerando imagem");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Falha ao executar '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "Falha ao gerar {}:\n\n{}",
                request.output.display(),
                stderr
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::PayloadEntry;

    fn request(format: PackageFormat) -> PackageRequest {
        PackageRequest {
            output: PathBuf::from("/mnt/b/host.iso"),
            payload: vec![PayloadEntry {
                source: PathBuf::from("/mnt/b/host.img.gz"),
                name: "host.img.gz".to_string(),
            }],
            format,
            volume_label: "RAIDSNAP".to_string(),
        }
    }

    #[test]
    fn test_format_threshold() {
        assert_eq!(
            PackageFormat::for_payload_size(SIMPLE_FORMAT_LIMIT),
            PackageFormat::Iso9660
        );
        assert_eq!(
            PackageFormat::for_payload_size(SIMPLE_FORMAT_LIMIT + 1),
            PackageFormat::Iso9660Extended
        );
        assert_eq!(PackageFormat::for_payload_size(0), PackageFormat::Iso9660);
    }

    #[test]
    fn test_build_args_contains_boot_catalog_and_payload() {
        let packager = XorrisoPackager::new("xorriso", Path::new("/usr/lib/ISOLINUX"));
        let args: Vec<String> = packager
            .build_args(&request(PackageFormat::Iso9660Extended))
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let level = args.iter().position(|a| a == "-iso-level").unwrap();
        assert_eq!(args[level + 1], "3");
        assert!(args.contains(&"isolinux/boot.cat".to_string()));
        assert!(args.contains(&"isolinux=/usr/lib/ISOLINUX".to_string()));
        assert!(args.contains(&"host.img.gz=/mnt/b/host.img.gz".to_string()));
        assert_eq!(args.last().unwrap(), "host.img.gz=/mnt/b/host.img.gz");
    }

    #[test]
    fn test_missing_boot_loader_is_an_error() {
        let packager = XorrisoPackager::new("xorriso", Path::new("/nonexistent/isolinux"));
        let err = packager
            .package(&request(PackageFormat::Iso9660))
            .unwrap_err();
        assert!(err.to_string().contains("isolinux.bin"));
    }
}
