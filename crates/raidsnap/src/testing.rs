//! Implementações falsas das capacidades externas para os testes

use crate::model::SourceDevice;
use crate::pipeline::Toolset;
use crate::preflight::mdstat::{parse_mdstat, MdArray};
use crate::preflight::probe::HostProbe;
use crate::sink::mounts::{parse_proc_mounts, MountEntry, MountOps};
use crate::tools::partclone::IMAGE_MAGIC;
use crate::tools::{
    Capture, Clock, Compressor, Confirm, GzipCompressor, PackageFormat, PackageRequest, Packager,
    RaidDescriptor, RaidInspector,
};
use anyhow::{anyhow, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

pub const SOURCE_SIZE: u64 = 256 * 1024;

pub const HEALTHY_MDSTAT: &str = "\
Personalities : [raid1]
md0 : active raid1 sdb1[1] sda1[0]
      1048512 blocks super 1.2 [2/2] [UU]

unused devices: <none>
";

pub const DEGRADED_MDSTAT: &str = "\
Personalities : [raid1]
md0 : active raid1 sdb1[1] sda1[0](F)
      1048512 blocks super 1.2 [2/1] [_U]

unused devices: <none>
";

/// Host simulado: root, todas as ferramentas, espaço de sobra
pub struct FakeProbe {
    euid: u32,
    sources: BTreeMap<PathBuf, SourceDevice>,
    mdstat: String,
    mounts: String,
    missing_tools: Vec<String>,
    active_services: Vec<String>,
    available: u64,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self {
            euid: 0,
            sources: BTreeMap::new(),
            mdstat: String::new(),
            mounts: String::new(),
            missing_tools: Vec::new(),
            active_services: Vec::new(),
            available: 1 << 40,
        }
    }

    /// `/dev/sda` saudável como origem única
    pub fn standard() -> Self {
        Self::new()
            .with_source("/dev/sda", SOURCE_SIZE)
            .with_mdstat(HEALTHY_MDSTAT)
    }

    pub fn with_source(mut self, path: &str, size: u64) -> Self {
        let mut source = SourceDevice::new(Path::new(path), size);
        source.fs_type = Some("ext4".to_string());
        self.sources.insert(PathBuf::from(path), source);
        self
    }

    pub fn with_mdstat(mut self, mdstat: &str) -> Self {
        self.mdstat = mdstat.to_string();
        self
    }

    pub fn with_mounts(mut self, mounts: &str) -> Self {
        self.mounts = mounts.to_string();
        self
    }

    pub fn with_active_service(mut self, name: &str) -> Self {
        self.active_services.push(name.to_string());
        self
    }

    pub fn with_available(mut self, bytes: u64) -> Self {
        self.available = bytes;
        self
    }

    pub fn with_euid(mut self, euid: u32) -> Self {
        self.euid = euid;
        self
    }

    pub fn without_tool(mut self, name: &str) -> Self {
        self.missing_tools.push(name.to_string());
        self
    }
}

impl HostProbe for FakeProbe {
    fn effective_uid(&self) -> u32 {
        self.euid
    }

    fn has_tool(&self, name: &str) -> bool {
        !self.missing_tools.iter().any(|t| t == name)
    }

    fn inspect_source(&self, path: &Path) -> Result<Option<SourceDevice>> {
        Ok(self.sources.get(path).cloned())
    }

    fn raid_arrays(&self) -> Result<Vec<MdArray>> {
        Ok(parse_mdstat(&self.mdstat))
    }

    fn mounts(&self) -> Result<Vec<MountEntry>> {
        Ok(parse_proc_mounts(&self.mounts))
    }

    fn service_active(&self, name: &str) -> bool {
        self.active_services.iter().any(|s| s == name)
    }

    fn available_bytes(&self, _path: &Path) -> Result<u64> {
        Ok(self.available)
    }
}

/// Montagem com roteiro: cada verificação consome um resultado; roteiro vazio é saudável
pub struct ScriptedMounts {
    script: Mutex<VecDeque<bool>>,
    fail_always: bool,
    probes: AtomicUsize,
    remounts: AtomicUsize,
}

impl ScriptedMounts {
    pub fn new(script: Vec<bool>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fail_always: false,
            probes: AtomicUsize::new(0),
            remounts: AtomicUsize::new(0),
        }
    }

    pub fn always_failing() -> Self {
        Self {
            fail_always: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn remounts(&self) -> usize {
        self.remounts.load(Ordering::SeqCst)
    }
}

impl MountOps for ScriptedMounts {
    fn is_mounted(&self, _sink: &Path) -> Result<bool> {
        Ok(true)
    }

    fn probe_writable(&self, sink: &Path) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let healthy = !self.fail_always
            && self
                .script
                .lock()
                .map(|mut s| s.pop_front().unwrap_or(true))
                .unwrap_or(false);
        if healthy {
            Ok(())
        } else {
            Err(anyhow!("{}: Stale file handle", sink.display()))
        }
    }

    fn unmount(&self, _sink: &Path) -> Result<()> {
        Ok(())
    }

    fn remount(&self, _sink: &Path) -> Result<()> {
        self.remounts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Relógio que registra as esperas em vez de dormir
pub struct ManualClock {
    now: Mutex<SystemTime>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        *self.now.lock().unwrap() += duration;
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Captura que grava bytes determinísticos (ou um cabeçalho de partclone para `.pcl`)
pub struct FakeCapture {
    size: Option<u64>,
    fail_after: Option<u64>,
    calls: AtomicUsize,
}

impl FakeCapture {
    pub fn new() -> Self {
        Self {
            size: None,
            fail_after: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Ignora o tamanho da origem
    pub fn with_size(size: u64) -> Self {
        Self {
            size: Some(size),
            ..Self::new()
        }
    }

    /// Grava `bytes` e falha como um `dd` interrompido
    pub fn failing_after(bytes: u64) -> Self {
        Self {
            fail_after: Some(bytes),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Capture for FakeCapture {
    fn capture(&self, source: &SourceDevice, dest: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let len = self.fail_after.or(self.size).unwrap_or(source.size_bytes) as usize;
        let mut content: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        if dest.to_string_lossy().contains(".pcl") {
            let mut header = IMAGE_MAGIC.to_vec();
            header.append(&mut content);
            content = header;
        }
        fs::write(dest, content)?;

        match self.fail_after {
            Some(_) => Err(anyhow!("dd: error reading '{}': Input/output error", source.path.display())),
            None => Ok(()),
        }
    }
}

/// Gzip real com contador de chamadas
pub struct CountingCompressor {
    inner: GzipCompressor,
    calls: AtomicUsize,
}

impl CountingCompressor {
    pub fn new() -> Self {
        Self {
            inner: GzipCompressor::new(1),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Compressor for CountingCompressor {
    fn compress(&self, input: &mut dyn Read, dest: &Path) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.compress(input, dest)
    }
}

/// Empacotador que grava uma ISO mínima com a assinatura CD001
pub struct FakePackager {
    fail: bool,
    truncate: bool,
    calls: AtomicUsize,
    last: Mutex<Option<PackageRequest>>,
}

impl FakePackager {
    pub fn new() -> Self {
        Self {
            fail: false,
            truncate: false,
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Deixa uma ISO cortada no meio (descritor intacto) e falha
    pub fn truncating() -> Self {
        Self {
            fail: true,
            truncate: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_format(&self) -> Option<PackageFormat> {
        self.last.lock().unwrap().as_ref().map(|r| r.format)
    }

    pub fn last_payload(&self) -> Vec<String> {
        self.last
            .lock()
            .unwrap()
            .as_ref()
            .map(|r| r.payload.iter().map(|e| e.name.clone()).collect())
            .unwrap_or_default()
    }
}

impl Packager for FakePackager {
    fn package(&self, request: &PackageRequest) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(request.clone());

        if self.truncate {
            write_iso_stub(&request.output, &[7u8; 64 * 1024]);
            let len = fs::metadata(&request.output)?.len();
            fs::OpenOptions::new()
                .write(true)
                .open(&request.output)?
                .set_len(len / 2 + 2048)?;
        }

        if self.fail {
            return Err(anyhow!("xorriso : FAILURE : Cannot write to output"));
        }

        let names: Vec<String> = request.payload.iter().map(|e| e.name.clone()).collect();
        write_iso_stub(&request.output, names.join("\n").as_bytes());
        Ok(())
    }
}

pub struct FakeRaid;

impl RaidInspector for FakeRaid {
    fn describe(&self) -> Result<RaidDescriptor> {
        Ok(RaidDescriptor::new(
            "test-host",
            HEALTHY_MDSTAT,
            "ARRAY /dev/md0 metadata=1.2 name=test-host:0 UUID=01234567:89abcdef:01234567:89abcdef\n",
        ))
    }
}

/// Resposta fixa a todos os avisos, registrando as perguntas
pub struct FixedConfirm {
    answer: bool,
    asked: Mutex<Vec<String>>,
}

impl FixedConfirm {
    pub fn new(answer: bool) -> Self {
        Self {
            answer,
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

impl Confirm for FixedConfirm {
    fn confirm(&self, reason: &str) -> bool {
        self.asked.lock().unwrap().push(reason.to_string());
        self.answer
    }
}

/// Conjunto de falsos com acesso aos contadores
pub struct TestTools {
    pub set: Toolset,
    pub capture: Arc<FakeCapture>,
    pub compressor: Arc<CountingCompressor>,
    pub packager: Arc<FakePackager>,
    pub mounts: Arc<ScriptedMounts>,
    pub clock: Arc<ManualClock>,
}

pub fn toolset() -> TestTools {
    let capture = Arc::new(FakeCapture::new());
    let compressor = Arc::new(CountingCompressor::new());
    let packager = Arc::new(FakePackager::new());
    let mounts = Arc::new(ScriptedMounts::new(Vec::new()));
    let clock = Arc::new(ManualClock::new());

    let set = Toolset {
        capture: capture.clone(),
        compressor: compressor.clone(),
        packager: packager.clone(),
        raid: Arc::new(FakeRaid),
        mounts: mounts.clone(),
        probe: Arc::new(FakeProbe::standard()),
        confirm: Arc::new(FixedConfirm::new(true)),
        clock: clock.clone(),
    };

    TestTools {
        set,
        capture,
        compressor,
        packager,
        mounts,
        clock,
    }
}

/// Arquivo com descritor de volume ISO 9660 no lugar certo seguido de `payload`,
/// com o tamanho do volume declarado igual ao do arquivo
pub fn write_iso_stub(path: &Path, payload: &[u8]) {
    const PVD: usize = 32768;

    let mut content = vec![0u8; PVD];
    content.push(1);
    content.extend_from_slice(b"CD001");
    content.push(1);
    content.resize(PVD + 2048, 0);
    content.extend_from_slice(payload);
    let padded = content.len().div_ceil(2048) * 2048;
    content.resize(padded, 0);

    let blocks = (padded / 2048) as u32;
    content[PVD + 80..PVD + 84].copy_from_slice(&blocks.to_le_bytes());
    content[PVD + 128..PVD + 130].copy_from_slice(&2048u16.to_le_bytes());
    fs::write(path, content).unwrap();
}

/// `.tar.gz` com as entradas informadas
pub fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).unwrap();
    let encoder = GzEncoder::new(file, Compression::fast());
    let mut builder = tar::Builder::new(encoder);

    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }

    let mut encoder = builder.into_inner().unwrap();
    encoder.flush().unwrap();
    encoder.finish().unwrap();
}
