//! Verificação de integridade dos artefatos
//!
//! Um artefato só é confiável depois de passar por aqui na execução atual.
//! Quem reprova é apagado do disco para nunca servir de base para um salto.

use crate::error::BackupError;
use crate::model::{ArtifactKind, BackupArtifact};
use crate::tools::partclone::IMAGE_MAGIC;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

/// Início do descritor de volume primário ISO 9660 (setor 16)
const ISO_PVD_OFFSET: u64 = 16 * 2048;
const ISO_SIGNATURE: &[u8] = b"CD001";
/// Tamanho do volume em blocos (LE u32) e do bloco lógico (LE u16) dentro do descritor
const ISO_VOLUME_BLOCKS: usize = 80;
const ISO_BLOCK_SIZE: usize = 128;

#[derive(Debug, Clone, Copy)]
pub struct IntegrityVerifier {
    remove_invalid: bool,
}

impl Default for IntegrityVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntegrityVerifier {
    pub fn new() -> Self {
        Self {
            remove_invalid: true,
        }
    }

    /// Só classifica; arquivos inválidos ficam no disco (usado por `--plan`)
    pub fn read_only() -> Self {
        Self {
            remove_invalid: false,
        }
    }

    /// Verifica o artefato; em caso de falha o arquivo é apagado, salvo em modo somente leitura
    pub fn verify(&self, artifact: &BackupArtifact) -> Result<BackupArtifact, BackupError> {
        let started = Instant::now();

        let size = match fs::metadata(&artifact.path) {
            Ok(meta) => meta.len(),
            Err(_) => {
                return Err(BackupError::Integrity {
                    path: artifact.path.clone(),
                    reason: "arquivo ausente".to_string(),
                })
            }
        };

        let result = match artifact.kind {
            ArtifactKind::RawImage => check_exact_size(size, artifact.expected_size_bytes),
            ArtifactKind::PartitionImage => match artifact.expected_size_bytes {
                Some(expected) => check_exact_size(size, Some(expected)),
                None => check_partclone_header(&artifact.path),
            },
            ArtifactKind::CompressedImage => check_compressed(&artifact.path),
            ArtifactKind::PackagedImage => check_iso(&artifact.path, size),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                info!(
                    artifact = %artifact.path.display(),
                    kind = %artifact.kind,
                    size,
                    elapsed_ms,
                    "artefato verificado"
                );
                let mut verified = artifact.clone();
                verified.verified = true;
                Ok(verified)
            }
            Err(reason) => {
                warn!(
                    artifact = %artifact.path.display(),
                    kind = %artifact.kind,
                    %reason,
                    elapsed_ms,
                    removing = self.remove_invalid,
                    "artefato inválido"
                );
                if self.remove_invalid {
                    if let Err(e) = fs::remove_file(&artifact.path) {
                        warn!(artifact = %artifact.path.display(), error = %e, "falha ao remover artefato inválido");
                    }
                }
                Err(BackupError::Integrity {
                    path: artifact.path.clone(),
                    reason,
                })
            }
        }
    }
}

fn check_exact_size(actual: u64, expected: Option<u64>) -> Result<(), String> {
    match expected {
        Some(expected) if expected == actual => Ok(()),
        Some(expected) => Err(format!(
            "tamanho {} difere do esperado {}",
            actual, expected
        )),
        None => Err("tamanho esperado desconhecido".to_string()),
    }
}

fn check_partclone_header(path: &Path) -> Result<(), String> {
    let mut header = vec![0u8; IMAGE_MAGIC.len()];
    File::open(path)
        .and_then(|mut file| file.read_exact(&mut header))
        .map_err(|e| format!("cabeçalho ilegível: {}", e))?;

    if header == IMAGE_MAGIC {
        Ok(())
    } else {
        Err("assinatura do partclone ausente".to_string())
    }
}

/// Decodifica o gzip inteiro (CRC32 e ISIZE conferidos no trailer)
fn check_compressed(path: &Path) -> Result<(), String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let decoder = GzDecoder::new(BufReader::new(file));

    let is_tar = path.to_string_lossy().ends_with(".tar.gz");
    if !is_tar {
        let mut decoder = decoder;
        return io::copy(&mut decoder, &mut io::sink())
            .map(|_| ())
            .map_err(|e| format!("gzip corrompido: {}", e));
    }

    let mut archive = tar::Archive::new(decoder);
    let mut entries = 0usize;
    {
        let iter = archive
            .entries()
            .map_err(|e| format!("tar ilegível: {}", e))?;
        for entry in iter {
            let mut entry = entry.map_err(|e| format!("entrada tar inválida: {}", e))?;
            io::copy(&mut entry, &mut io::sink())
                .map_err(|e| format!("conteúdo tar corrompido: {}", e))?;
            entries += 1;
        }
    }

    // O restante (preenchimento do tar) precisa ser lido para o trailer do gzip ser conferido
    let mut decoder = archive.into_inner();
    io::copy(&mut decoder, &mut io::sink()).map_err(|e| format!("gzip corrompido: {}", e))?;

    if entries == 0 {
        return Err("arquivo tar vazio".to_string());
    }
    Ok(())
}

/// Descritor primário presente e volume declarado inteiro dentro do arquivo
fn check_iso(path: &Path, size: u64) -> Result<(), String> {
    if size == 0 {
        return Err("imagem vazia".to_string());
    }

    let mut pvd = [0u8; 2048];
    File::open(path)
        .and_then(|mut file| {
            file.seek(SeekFrom::Start(ISO_PVD_OFFSET))?;
            file.read_exact(&mut pvd)
        })
        .map_err(|_| "descritor de volume ISO 9660 ausente".to_string())?;

    if pvd[0] != 1 || &pvd[1..6] != ISO_SIGNATURE {
        return Err("assinatura CD001 ausente".to_string());
    }

    let blocks = u32::from_le_bytes([
        pvd[ISO_VOLUME_BLOCKS],
        pvd[ISO_VOLUME_BLOCKS + 1],
        pvd[ISO_VOLUME_BLOCKS + 2],
        pvd[ISO_VOLUME_BLOCKS + 3],
    ]) as u64;
    let block_size = u16::from_le_bytes([pvd[ISO_BLOCK_SIZE], pvd[ISO_BLOCK_SIZE + 1]]) as u64;
    if blocks == 0 || block_size == 0 {
        return Err("tamanho do volume ISO não declarado".to_string());
    }

    let declared = blocks * block_size;
    if declared > size {
        return Err(format!(
            "imagem truncada: {} bytes, volume declara {}",
            size, declared
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_iso_stub, write_tar_gz};
    use std::io::Write;
    use crate::tools::{Compressor, GzipCompressor};
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn artifact(kind: ArtifactKind, path: PathBuf, expected: Option<u64>) -> BackupArtifact {
        BackupArtifact::unverified(kind, path, expected)
    }

    #[test]
    fn test_raw_image_exact_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("host.img");
        fs::write(&path, vec![7u8; 4096]).unwrap();

        let verifier = IntegrityVerifier::new();
        let ok = verifier
            .verify(&artifact(ArtifactKind::RawImage, path.clone(), Some(4096)))
            .unwrap();
        assert!(ok.verified);

        let err = verifier
            .verify(&artifact(ArtifactKind::RawImage, path.clone(), Some(4097)))
            .unwrap_err();
        assert!(matches!(err, BackupError::Integrity { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_file_is_invalid() {
        let dir = tempdir().unwrap();
        let err = IntegrityVerifier::new()
            .verify(&artifact(
                ArtifactKind::PackagedImage,
                dir.path().join("none.iso"),
                None,
            ))
            .unwrap_err();
        assert!(err.to_string().contains("ausente"));
    }

    #[test]
    fn test_partition_image_header() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.pcl");
        let mut content = IMAGE_MAGIC.to_vec();
        content.extend_from_slice(&[0u8; 100]);
        fs::write(&good, content).unwrap();

        let bad = dir.path().join("bad.pcl");
        fs::write(&bad, b"garbage-garbage-garbage").unwrap();

        let verifier = IntegrityVerifier::new();
        assert!(verifier
            .verify(&artifact(ArtifactKind::PartitionImage, good, None))
            .is_ok());
        assert!(verifier
            .verify(&artifact(ArtifactKind::PartitionImage, bad.clone(), None))
            .is_err());
        assert!(!bad.exists());
    }

    #[test]
    fn test_compressed_image_detects_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("host.img.gz");
        let data: Vec<u8> = (0..50_000u32).map(|i| (i * 31 % 256) as u8).collect();
        GzipCompressor::default()
            .compress(&mut data.as_slice(), &path)
            .unwrap();

        let verifier = IntegrityVerifier::new();
        assert!(verifier
            .verify(&artifact(ArtifactKind::CompressedImage, path.clone(), None))
            .is_ok());

        // Um byte alterado no trailer (CRC32)
        let mut bytes = fs::read(&path).unwrap();
        let idx = bytes.len() - 6;
        bytes[idx] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        assert!(verifier
            .verify(&artifact(ArtifactKind::CompressedImage, path.clone(), None))
            .is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_tar_gz_is_walked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("host.tar.gz");
        write_tar_gz(&path, &[("md0.pcl", b"abc".as_slice())]);

        let verifier = IntegrityVerifier::new();
        assert!(verifier
            .verify(&artifact(ArtifactKind::CompressedImage, path.clone(), None))
            .is_ok());

        let truncated = dir.path().join("cut.tar.gz");
        let bytes = fs::read(&path).unwrap();
        fs::write(&truncated, &bytes[..bytes.len() / 2]).unwrap();
        assert!(verifier
            .verify(&artifact(ArtifactKind::CompressedImage, truncated, None))
            .is_err());
    }

    #[test]
    fn test_iso_signature() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.iso");
        write_iso_stub(&good, b"payload");

        let bad = dir.path().join("bad.iso");
        fs::write(&bad, vec![0u8; 40_000]).unwrap();

        let empty = dir.path().join("empty.iso");
        fs::write(&empty, b"").unwrap();

        let verifier = IntegrityVerifier::new();
        assert!(verifier
            .verify(&artifact(ArtifactKind::PackagedImage, good, None))
            .is_ok());
        assert!(verifier
            .verify(&artifact(ArtifactKind::PackagedImage, bad, None))
            .is_err());
        assert!(verifier
            .verify(&artifact(ArtifactKind::PackagedImage, empty, None))
            .is_err());
    }

    #[test]
    fn test_truncated_iso_is_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("host.iso");
        write_iso_stub(&path, &[9u8; 64 * 1024]);
        let full = fs::metadata(&path).unwrap().len();

        let verifier = IntegrityVerifier::new();
        assert!(verifier
            .verify(&artifact(ArtifactKind::PackagedImage, path.clone(), None))
            .is_ok());

        // Descritor intacto, final da imagem cortado
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..(full as usize) - 2048]).unwrap();
        let err = verifier
            .verify(&artifact(ArtifactKind::PackagedImage, path.clone(), None))
            .unwrap_err();
        assert!(err.to_string().contains("truncada"));
        assert!(!path.exists());

        // CD001 no lugar certo, mas sem tamanho de volume
        let mut content = vec![0u8; 32768];
        content.push(1);
        content.extend_from_slice(b"CD001");
        content.resize(40_000, 0);
        fs::File::create(&path).unwrap().write_all(&content).unwrap();
        assert!(verifier
            .verify(&artifact(ArtifactKind::PackagedImage, path, None))
            .is_err());
    }

    #[test]
    fn test_read_only_keeps_invalid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("host.img");
        fs::write(&path, vec![0u8; 10]).unwrap();

        let err = IntegrityVerifier::read_only()
            .verify(&artifact(ArtifactKind::RawImage, path.clone(), Some(11)))
            .unwrap_err();
        assert!(matches!(err, BackupError::Integrity { .. }));
        assert!(path.exists());
    }
}
