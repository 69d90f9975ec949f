//! Monitor de saúde da montagem do destino

use super::mounts::MountOps;
use crate::error::BackupError;
use crate::model::{MountHandle, MountHealth, RetryPolicy};
use crate::tools::Clock;
use anyhow::{anyhow, Result};
use std::path::Path;
use tracing::{debug, info, warn};

/// Garante que o destino está montado e gravável antes de cada escrita
pub struct HealthMonitor<'a> {
    ops: &'a dyn MountOps,
    clock: &'a dyn Clock,
}

impl<'a> HealthMonitor<'a> {
    pub fn new(ops: &'a dyn MountOps, clock: &'a dyn Clock) -> Self {
        Self { ops, clock }
    }

    /// Verifica a montagem, remontando entre tentativas até esgotar a política
    pub fn ensure_healthy(
        &self,
        handle: &mut MountHandle,
        policy: &RetryPolicy,
    ) -> Result<(), BackupError> {
        let max_attempts = policy.max_attempts();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            handle.last_checked_at = Some(self.clock.now());

            match self.check(&handle.sink_path) {
                Ok(()) => {
                    if attempt > 1 {
                        info!(sink = %handle.sink_path.display(), attempt, "destino recuperado");
                    } else {
                        debug!(sink = %handle.sink_path.display(), "destino saudável");
                    }
                    handle.health = MountHealth::Healthy;
                    return Ok(());
                }
                Err(e) => {
                    handle.health = MountHealth::Degraded;
                    let transient = BackupError::TransientMount {
                        sink: handle.sink_path.clone(),
                        reason: format!("{:#}", e),
                    };
                    warn!(attempt, max_attempts, "{}", transient);
                    last_error = format!("{:#}", e);

                    // Sem espera depois da última tentativa
                    if attempt < max_attempts {
                        self.recover(&handle.sink_path);
                        self.clock.sleep(policy.backoff_delay());
                    }
                }
            }
        }

        handle.health = MountHealth::Failed;
        Err(BackupError::MountExhausted {
            sink: handle.sink_path.clone(),
            attempts: max_attempts,
            last_error,
        })
    }

    fn check(&self, sink: &Path) -> Result<()> {
        if !self.ops.is_mounted(sink)? {
            return Err(anyhow!("{} não está montado", sink.display()));
        }
        self.ops.probe_writable(sink)
    }

    fn recover(&self, sink: &Path) {
        if let Err(e) = self.ops.unmount(sink) {
            warn!(sink = %sink.display(), error = %format!("{:#}", e), "falha ao desmontar");
        }
        match self.ops.remount(sink) {
            Ok(()) => debug!(sink = %sink.display(), "remontado"),
            Err(e) => warn!(sink = %sink.display(), error = %format!("{:#}", e), "falha ao remontar"),
        }
    }
}
