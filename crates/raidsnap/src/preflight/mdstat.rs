//! Leitura do estado dos arrays md a partir de `/proc/mdstat`

use serde::{Deserialize, Serialize};

/// Membro de um array md
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdMember {
    /// Nome do dispositivo sem `/dev/` (`sda1`)
    pub name: String,
    pub role: Option<u32>,
    pub failed: bool,
    pub spare: bool,
}

/// Array md como reportado pelo kernel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdArray {
    /// Nome sem `/dev/` (`md0`)
    pub name: String,
    /// `active`, `inactive`...
    pub state: String,
    pub level: Option<String>,
    pub members: Vec<MdMember>,
    /// Mapa de membros ativos, por exemplo `[UU]` ou `[U_]`
    pub status: Option<String>,
    /// Operação em andamento (`recovery`, `resync`, `reshape`, `check`)
    pub sync_action: Option<String>,
}

impl MdArray {
    pub fn device_path(&self) -> String {
        format!("/dev/{}", self.name)
    }

    /// Array ativo, com todos os espelhos presentes e sem sincronização em curso
    pub fn is_healthy(&self) -> bool {
        self.state == "active"
            && !self.members.iter().any(|m| m.failed)
            && self
                .status
                .as_deref()
                .map(|s| !s.contains('_'))
                .unwrap_or(false)
            && self.sync_action.is_none()
    }

    /// Motivo legível quando o array não está saudável
    pub fn problem(&self) -> Option<String> {
        if self.is_healthy() {
            return None;
        }

        let mut parts = Vec::new();
        if self.state != "active" {
            parts.push(format!("estado {}", self.state));
        }
        if let Some(status) = &self.status {
            if status.contains('_') {
                parts.push(format!("espelhos {}", status));
            }
        } else {
            parts.push("mapa de espelhos ausente".to_string());
        }
        let failed: Vec<&str> = self
            .members
            .iter()
            .filter(|m| m.failed)
            .map(|m| m.name.as_str())
            .collect();
        if !failed.is_empty() {
            parts.push(format!("membros com falha: {}", failed.join(", ")));
        }
        if let Some(action) = &self.sync_action {
            parts.push(format!("{} em andamento", action));
        }

        Some(format!("{}: {}", self.device_path(), parts.join("; ")))
    }
}

/// Interpreta o conteúdo de `/proc/mdstat`
pub fn parse_mdstat(content: &str) -> Vec<MdArray> {
    let mut arrays: Vec<MdArray> = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with("Personalities")
            || trimmed.starts_with("unused devices")
        {
            continue;
        }

        if !line.starts_with(char::is_whitespace) {
            if let Some((name, rest)) = line.split_once(" : ") {
                arrays.push(parse_array_line(name.trim(), rest));
            }
            continue;
        }

        let Some(array) = arrays.last_mut() else {
            continue;
        };

        if array.status.is_none() {
            if let Some(status) = trimmed
                .split_whitespace()
                .rev()
                .find(|token| is_status_map(token))
            {
                array.status = Some(status.to_string());
            }
        }

        for action in ["recovery", "resync", "reshape", "check"] {
            if trimmed.contains(&format!("{} =", action)) {
                array.sync_action = Some(action.to_string());
            }
        }
    }

    arrays
}

fn parse_array_line(name: &str, rest: &str) -> MdArray {
    let mut tokens = rest.split_whitespace();
    let state = tokens.next().unwrap_or("unknown").to_string();

    let mut level = None;
    let mut members = Vec::new();

    for token in tokens {
        if token.starts_with('(') {
            // "(auto-read-only)" e similares
            continue;
        }
        if token.starts_with("raid") || token == "linear" || token == "multipath" {
            level = Some(token.to_string());
            continue;
        }
        if let Some(member) = parse_member(token) {
            members.push(member);
        }
    }

    MdArray {
        name: name.to_string(),
        state,
        level,
        members,
        status: None,
        sync_action: None,
    }
}

/// `sdb1[1]`, `sda1[0](F)`, `sdc1[2](S)`
fn parse_member(token: &str) -> Option<MdMember> {
    let open = token.find('[')?;
    let close = token[open..].find(']')? + open;
    let name = token[..open].to_string();
    let role = token[open + 1..close].parse().ok();
    let flags = &token[close + 1..];

    Some(MdMember {
        name,
        role,
        failed: flags.contains("(F)"),
        spare: flags.contains("(S)"),
    })
}

fn is_status_map(token: &str) -> bool {
    token.len() > 2
        && token.starts_with('[')
        && token.ends_with(']')
        && token[1..token.len() - 1]
            .chars()
            .all(|c| c == 'U' || c == '_')
}
