//! Capacidades externas usadas pelo orquestrador
//!
//! Cada ferramenta que move bytes ou toca o sistema fica atrás de um trait
//! estreito. O binário usa as implementações reais deste módulo:
//! 1. `dd` para cópia de disco inteiro
//! 2. `partclone` para clones por sistema de arquivos
//! 3. gzip em processo para compressão
//! 4. `xorriso` para a ISO inicializável
//! 5. `mdadm` e `/proc/mdstat` para o descritor do RAID

mod clock;
mod dd;
mod gzip;
mod iso;
mod mdadm;
pub mod partclone;
mod prompt;

pub use clock::SystemClock;
pub use dd::DdCapture;
pub use gzip::GzipCompressor;
pub use iso::{PackageFormat, XorrisoPackager};
pub use mdadm::{MdadmInspector, RaidDescriptor};
pub use partclone::PartcloneCapture;
pub use prompt::{AssumeYes, TerminalConfirm};

use crate::model::SourceDevice;
use anyhow::Result;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Copia um dispositivo de origem para um artefato no destino
pub trait Capture: Send + Sync {
    fn capture(&self, source: &SourceDevice, dest: &Path) -> Result<()>;
}

/// Consome um fluxo e grava o contêiner comprimido; retorna os bytes gravados
pub trait Compressor: Send + Sync {
    fn compress(&self, input: &mut dyn Read, dest: &Path) -> Result<u64>;
}

/// Arquivo a ser embutido na mídia inicializável
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEntry {
    pub source: PathBuf,
    /// Nome do arquivo dentro da imagem
    pub name: String,
}

/// Pedido de empacotamento
#[derive(Debug, Clone)]
pub struct PackageRequest {
    pub output: PathBuf,
    pub payload: Vec<PayloadEntry>,
    pub format: PackageFormat,
    pub volume_label: String,
}

/// Gera a mídia inicializável com entrada no catálogo de boot
pub trait Packager: Send + Sync {
    fn package(&self, request: &PackageRequest) -> Result<()>;
}

/// Lê a composição dos arrays RAID do host
pub trait RaidInspector: Send + Sync {
    fn describe(&self) -> Result<RaidDescriptor>;
}

/// Decisão de continuar após um aviso
pub trait Confirm: Send + Sync {
    fn confirm(&self, reason: &str) -> bool;
}

/// Relógio injetável (as esperas de backoff passam por aqui)
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
    fn sleep(&self, duration: Duration);
}
