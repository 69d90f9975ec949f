//! Tabela de montagens e operações sobre a montagem do destino

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Linha de `/proc/mounts`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
    pub fstype: String,
    pub options: String,
}

/// Interpreta `/proc/mounts` (`device mount_point fstype options dump pass`)
pub fn parse_proc_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 4 {
                return None;
            }
            Some(MountEntry {
                device: unescape_octal(parts[0]),
                mount_point: PathBuf::from(unescape_octal(parts[1])),
                fstype: parts[2].to_string(),
                options: parts[3].to_string(),
            })
        })
        .collect()
}

/// Lê a tabela de montagens do sistema
pub fn read_system_mounts() -> Result<Vec<MountEntry>> {
    let content =
        fs::read_to_string("/proc/mounts").context("Falha ao ler /proc/mounts")?;
    Ok(parse_proc_mounts(&content))
}

/// Montagem que contém `path` (maior prefixo)
pub fn mount_for_path<'a>(entries: &'a [MountEntry], path: &Path) -> Option<&'a MountEntry> {
    entries
        .iter()
        .filter(|entry| path.starts_with(&entry.mount_point))
        .max_by_key(|entry| entry.mount_point.as_os_str().len())
}

/// `\040` vira espaço, como o kernel escapa caminhos
fn unescape_octal(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Especificação de montagem remota do destino
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteMount {
    /// `servidor:/export` ou `//servidor/share`
    pub spec: String,
    pub fstype: String,
    pub options: Option<String>,
}

impl RemoteMount {
    /// Argumentos do `mount` para montar em `sink`
    pub fn mount_args(&self, sink: &Path) -> Vec<String> {
        let mut args = vec!["-t".to_string(), self.fstype.clone()];
        if let Some(options) = self.options.as_deref().filter(|o| !o.is_empty()) {
            args.push("-o".to_string());
            args.push(options.to_string());
        }
        args.push(self.spec.clone());
        args.push(sink.to_string_lossy().into_owned());
        args
    }
}

/// Operações de montagem usadas pelo monitor de saúde
pub trait MountOps: Send + Sync {
    fn is_mounted(&self, sink: &Path) -> Result<bool>;
    /// Cria, sincroniza e apaga um arquivo de prova no destino
    fn probe_writable(&self, sink: &Path) -> Result<()>;
    fn unmount(&self, sink: &Path) -> Result<()>;
    fn remount(&self, sink: &Path) -> Result<()>;
}

/// Grava e remove `.raidsnap-probe-<pid>` em `dir`
pub fn probe_writable(dir: &Path) -> Result<()> {
    let probe = dir.join(format!(".raidsnap-probe-{}", std::process::id()));

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&probe)
        .with_context(|| format!("Falha ao criar arquivo de prova {}", probe.display()))?;

    let written = file
        .write_all(b"raidsnap")
        .and_then(|_| file.sync_all())
        .with_context(|| format!("Falha ao gravar em {}", probe.display()));

    let removed = fs::remove_file(&probe)
        .with_context(|| format!("Falha ao remover {}", probe.display()));

    written?;
    removed
}

/// Implementação real: `/proc/mounts`, `mount` e `umount -l`
pub struct SystemMounts {
    remote: Option<RemoteMount>,
}

impl SystemMounts {
    pub fn new(remote: Option<RemoteMount>) -> Self {
        Self { remote }
    }

    fn run(program: &str, args: &[String]) -> Result<()> {
        debug!(program, ?args, "executando");
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Falha ao executar '{}'", program))?;

        if !output.status.success() {
            return Err(anyhow!(
                "'{} {}' falhou: {}",
                program,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(())
    }
}

impl MountOps for SystemMounts {
    fn is_mounted(&self, sink: &Path) -> Result<bool> {
        if self.remote.is_none() {
            return Ok(sink.is_dir());
        }

        let entries = read_system_mounts()?;
        Ok(entries.iter().any(|entry| entry.mount_point == sink))
    }

    fn probe_writable(&self, sink: &Path) -> Result<()> {
        probe_writable(sink)
    }

    fn unmount(&self, sink: &Path) -> Result<()> {
        if self.remote.is_none() || !self.is_mounted(sink)? {
            return Ok(());
        }
        Self::run("umount", &["-l".to_string(), sink.to_string_lossy().into_owned()])
    }

    fn remount(&self, sink: &Path) -> Result<()> {
        let Some(remote) = &self.remote else {
            return Ok(());
        };

        if !sink.exists() {
            if let Err(e) = fs::create_dir_all(sink) {
                warn!(sink = %sink.display(), error = %e, "não foi possível criar o ponto de montagem");
            }
        }

        Self::run("mount", &remote.mount_args(sink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MOUNTS: &str = "\
/dev/md0 / ext4 rw,relatime 0 0
/dev/md1 /srv xfs rw 0 0
nas:/backups /mnt/backup nfs4 rw,vers=4.2 0 0
/dev/sdc1 /media/usb\\040disk vfat rw 0 0
";

    #[test]
    fn test_parse_proc_mounts() {
        let entries = parse_proc_mounts(MOUNTS);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[2].device, "nas:/backups");
        assert_eq!(entries[2].fstype, "nfs4");
        assert_eq!(entries[3].mount_point, PathBuf::from("/media/usb disk"));
    }

    #[test]
    fn test_mount_for_path_uses_longest_prefix() {
        let entries = parse_proc_mounts(MOUNTS);
        let entry = mount_for_path(&entries, Path::new("/mnt/backup/raidsnap")).unwrap();
        assert_eq!(entry.device, "nas:/backups");

        let entry = mount_for_path(&entries, Path::new("/srv/data")).unwrap();
        assert_eq!(entry.device, "/dev/md1");

        let entry = mount_for_path(&entries, Path::new("/mnt/other")).unwrap();
        assert_eq!(entry.device, "/dev/md0");
    }

    #[test]
    fn test_mount_args() {
        let remote = RemoteMount {
            spec: "nas:/backups".to_string(),
            fstype: "nfs".to_string(),
            options: Some("vers=4.2,hard".to_string()),
        };
        assert_eq!(
            remote.mount_args(Path::new("/mnt/backup")),
            vec!["-t", "nfs", "-o", "vers=4.2,hard", "nas:/backups", "/mnt/backup"]
        );

        let remote = RemoteMount {
            options: None,
            ..remote
        };
        assert!(!remote.mount_args(Path::new("/mnt/backup")).contains(&"-o".to_string()));
    }

    #[test]
    fn test_probe_writable_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        probe_writable(dir.path()).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        assert!(probe_writable(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_local_sink_is_mounted_when_directory_exists() {
        let dir = tempdir().unwrap();
        let mounts = SystemMounts::new(None);
        assert!(mounts.is_mounted(dir.path()).unwrap());
        assert!(!mounts.is_mounted(&dir.path().join("x")).unwrap());
        mounts.unmount(dir.path()).unwrap();
        mounts.remount(dir.path()).unwrap();
    }
}
