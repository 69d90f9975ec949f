//! Coleta de fatos do host para as pré-condições

use super::mdstat::{parse_mdstat, MdArray};
use crate::model::SourceDevice;
use crate::sink::mounts::{read_system_mounts, MountEntry};
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::ffi::CString;
use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Oráculo de fatos do sistema consultado antes da execução
pub trait HostProbe: Send + Sync {
    fn effective_uid(&self) -> u32;
    fn has_tool(&self, name: &str) -> bool;
    /// `None` quando o dispositivo não existe
    fn inspect_source(&self, path: &Path) -> Result<Option<SourceDevice>>;
    fn raid_arrays(&self) -> Result<Vec<MdArray>>;
    fn mounts(&self) -> Result<Vec<MountEntry>>;
    fn service_active(&self, name: &str) -> bool;
    fn available_bytes(&self, path: &Path) -> Result<u64>;
}

/// Implementação real sobre `/proc`, `$PATH`, `statvfs` e `systemctl`
pub struct SystemProbe;

impl SystemProbe {
    pub fn new() -> Self {
        Self
    }

    fn find_mount<'a>(mounts: &'a [MountEntry], device: &Path) -> Option<&'a MountEntry> {
        mounts
            .iter()
            .find(|entry| Path::new(&entry.device) == device)
    }

    fn blkid_type(path: &Path) -> Option<String> {
        let output = Command::new("blkid")
            .args(["-o", "value", "-s", "TYPE"])
            .arg(path)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()?;

        if !output.status.success() {
            return None;
        }

        let fs_type = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if fs_type.is_empty() {
            None
        } else {
            Some(fs_type)
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HostProbe for SystemProbe {
    fn effective_uid(&self) -> u32 {
        unsafe { libc::geteuid() }
    }

    fn has_tool(&self, name: &str) -> bool {
        if name.contains('/') {
            return is_executable(Path::new(name));
        }

        std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(name))))
            .unwrap_or(false)
    }

    fn inspect_source(&self, path: &Path) -> Result<Option<SourceDevice>> {
        if !path.exists() {
            return Ok(None);
        }

        let canonical = fs::canonicalize(path)
            .with_context(|| format!("Falha ao resolver {}", path.display()))?;

        // Dispositivos de bloco reportam tamanho 0 no metadata; o seek devolve o real
        let size_bytes = File::open(&canonical)
            .and_then(|mut file| file.seek(SeekFrom::End(0)))
            .with_context(|| format!("Falha ao medir {}", path.display()))?;

        let mut source = SourceDevice::new(path, size_bytes);

        let mounts = self.mounts()?;
        if let Some(entry) = Self::find_mount(&mounts, &canonical) {
            source.fs_type = Some(entry.fstype.clone());
            source.used_bytes = statvfs(&entry.mount_point)
                .ok()
                .map(|stat| used_bytes(&stat));
        } else {
            source.fs_type = Self::blkid_type(&canonical);
        }

        debug!(
            source = %path.display(),
            size_bytes,
            used_bytes = ?source.used_bytes,
            fs_type = ?source.fs_type,
            "dispositivo inspecionado"
        );

        Ok(Some(source))
    }

    fn raid_arrays(&self) -> Result<Vec<MdArray>> {
        match fs::read_to_string("/proc/mdstat") {
            Ok(content) => Ok(parse_mdstat(&content)),
            // Sem o módulo md carregado não há arrays
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).context("Falha ao ler /proc/mdstat"),
        }
    }

    fn mounts(&self) -> Result<Vec<MountEntry>> {
        let mut entries = read_system_mounts()?;
        for entry in &mut entries {
            if entry.device.starts_with("/dev/") {
                if let Ok(canonical) = fs::canonicalize(&entry.device) {
                    entry.device = canonical.to_string_lossy().into_owned();
                }
            }
        }
        Ok(entries)
    }

    fn service_active(&self, name: &str) -> bool {
        Command::new("systemctl")
            .args(["is-active", "--quiet", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn available_bytes(&self, path: &Path) -> Result<u64> {
        let stat = statvfs(path)?;
        Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
    }
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn statvfs(path: &Path) -> Result<libc::statvfs> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("Caminho inválido: {}", path.display()))?;

    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(io::Error::last_os_error())
            .with_context(|| format!("Falha no statvfs de {}", path.display()));
    }

    Ok(stat)
}

fn used_bytes(stat: &libc::statvfs) -> u64 {
    (stat.f_blocks as u64).saturating_sub(stat.f_bfree as u64) * stat.f_frsize as u64
}

/// Disco físico de um nome de dispositivo (`sda1` → `sda`, `nvme0n1p2` → `nvme0n1`)
pub fn base_disk(name: &str) -> String {
    let numbered = ["nvme", "mmcblk", "loop", "nbd", "md", "dm-", "zram"];
    if numbered.iter().any(|prefix| name.starts_with(prefix)) {
        if let Some(idx) = name.rfind('p') {
            let (head, tail) = name.split_at(idx);
            let digits = &tail[1..];
            if !digits.is_empty()
                && digits.chars().all(|c| c.is_ascii_digit())
                && head.ends_with(|c: char| c.is_ascii_digit())
            {
                return head.to_string();
            }
        }
        return name.to_string();
    }

    name.trim_end_matches(|c: char| c.is_ascii_digit()).to_string()
}

/// Discos físicos por trás de um dispositivo, expandindo arrays md em seus membros
pub fn physical_disks(device: &str, arrays: &[MdArray]) -> BTreeSet<String> {
    let Some(name) = device.strip_prefix("/dev/") else {
        return BTreeSet::new();
    };

    // `/dev/md/0` e `/dev/md0` apontam para o mesmo array
    let md_name = name.strip_prefix("md/").map(|n| format!("md{}", n));
    let lookup = md_name.as_deref().unwrap_or(name);

    match arrays.iter().find(|array| array.name == lookup) {
        Some(array) => array
            .members
            .iter()
            .map(|member| base_disk(&member.name))
            .collect(),
        None => std::iter::once(base_disk(name)).collect(),
    }
}

/// `true` se `device` fica em algum disco físico de `source`
pub fn shares_disk(device: &str, source: &Path, arrays: &[MdArray]) -> bool {
    let source_disks = physical_disks(&source.to_string_lossy(), arrays);
    let device_disks = physical_disks(device, arrays);
    !source_disks.is_disjoint(&device_disks)
}

/// Pontos de montagem que usam a origem.
///
/// No modo disco qualquer montagem sobre o mesmo disco físico conta; no modo
/// por sistema de arquivos só a montagem do próprio array.
pub fn busy_mount_points(
    source: &Path,
    whole_disk: bool,
    mounts: &[MountEntry],
    arrays: &[MdArray],
) -> Vec<PathBuf> {
    mounts
        .iter()
        .filter(|entry| {
            if whole_disk {
                shares_disk(&entry.device, source, arrays)
            } else {
                Path::new(&entry.device) == source
            }
        })
        .map(|entry| entry.mount_point.clone())
        .collect()
}
