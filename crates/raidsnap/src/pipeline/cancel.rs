//! Sinalização de cancelamento (SIGINT/SIGTERM)

use anyhow::{Context, Result};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Código de saída quando um segundo sinal encerra o processo à força
const FORCED_EXIT_CODE: i32 = 3;

/// Flag consultada nas fronteiras de estágio
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Primeiro sinal marca o cancelamento; o segundo encerra o processo imediatamente
    pub fn register_signals(&self) -> Result<()> {
        for signal in [SIGINT, SIGTERM] {
            signal_hook::flag::register_conditional_shutdown(
                signal,
                FORCED_EXIT_CODE,
                Arc::clone(&self.0),
            )
            .context("Falha ao registrar encerramento forçado")?;
            signal_hook::flag::register(signal, Arc::clone(&self.0))
                .context("Falha ao registrar tratador de sinal")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        assert!(other.is_cancelled());
    }
}
