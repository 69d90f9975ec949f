//! Confirmação do operador para avisos não fatais

use super::Confirm;
use std::io::{self, BufRead, Write};
use tracing::warn;

/// Pergunta no terminal; qualquer resposta diferente de sim recusa
pub struct TerminalConfirm;

impl TerminalConfirm {
    /// Interpreta a resposta digitada
    pub fn accepts(answer: &str) -> bool {
        matches!(
            answer.trim().to_lowercase().as_str(),
            "s" | "sim" | "y" | "yes"
        )
    }
}

impl Confirm for TerminalConfirm {
    fn confirm(&self, reason: &str) -> bool {
        println!("⚠️  {}", reason);
        print!("   Continuar mesmo assim? [s/N] ");
        if io::stdout().flush().is_err() {
            return false;
        }

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(0) | Err(_) => false,
            Ok(_) => Self::accepts(&answer),
        }
    }
}

/// Aceita todos os avisos (modo `--yes`)
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&self, reason: &str) -> bool {
        warn!(reason, "aviso aceito automaticamente (--yes)");
        true
    }
}
