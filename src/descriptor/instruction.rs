use serde::{Deserialize, Serialize};
use std::fmt;

/// Arguments of `CMD` / `ENTRYPOINT`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    pub args: Vec<String>,
    /// Shell form keeps the whole command as the single argument
    #[serde(default)]
    pub shell: bool,
}

impl CommandLine {
    pub fn exec<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            shell: false,
        }
    }

    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            args: vec![command.into()],
            shell: true,
        }
    }

    /// The argv a container process actually receives
    pub fn argv(&self) -> Vec<String> {
        if self.shell {
            let mut argv = vec!["/bin/sh".to_string(), "-c".to_string()];
            argv.extend(self.args.iter().cloned());
            argv
        } else {
            self.args.clone()
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.shell {
            return write!(f, "{}", self.args.join(" "));
        }
        let quoted: Vec<String> = self
            .args
            .iter()
            .map(|a| serde_json::to_string(a).unwrap_or_else(|_| format!("\"{}\"", a)))
            .collect();
        write!(f, "[{}]", quoted.join(", "))
    }
}

/// Dockerfile instructions botbox reads and writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "instruction", rename_all = "lowercase")]
pub enum Instruction {
    From {
        image: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        alias: Option<String>,
    },
    Run {
        command: String,
    },
    Workdir {
        path: String,
    },
    Copy {
        sources: Vec<String>,
        dest: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        flags: Vec<String>,
    },
    Cmd(CommandLine),
    Entrypoint(CommandLine),
    Env {
        vars: Vec<(String, String)>,
    },
    Label {
        labels: Vec<(String, String)>,
    },
}

impl Instruction {
    pub fn keyword(&self) -> &'static str {
        match self {
            Instruction::From { .. } => "FROM",
            Instruction::Run { .. } => "RUN",
            Instruction::Workdir { .. } => "WORKDIR",
            Instruction::Copy { .. } => "COPY",
            Instruction::Cmd(_) => "CMD",
            Instruction::Entrypoint(_) => "ENTRYPOINT",
            Instruction::Env { .. } => "ENV",
            Instruction::Label { .. } => "LABEL",
        }
    }

    /// Rendering without line continuations, as recorded in image history
    pub fn single_line(&self) -> String {
        match self {
            Instruction::Run { command } => format!("RUN {}", command),
            other => other.to_string(),
        }
    }
}

fn quote_value(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._-/:@+,".contains(c))
    {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

fn pairs(items: &[(String, String)]) -> String {
    items
        .iter()
        .map(|(k, v)| format!("{}={}", k, quote_value(v)))
        .collect::<Vec<_>>()
        .join(" ")
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::From { image, alias } => match alias {
                Some(alias) => write!(f, "FROM {} AS {}", image, alias),
                None => write!(f, "FROM {}", image),
            },
            Instruction::Run { command } => {
                // Long chains are wrapped one command per line
                let parts: Vec<&str> = command.split(" && ").collect();
                if parts.len() > 1 {
                    write!(f, "RUN {}", parts.join(" \\\n    && "))
                } else {
                    write!(f, "RUN {}", command)
                }
            }
            Instruction::Workdir { path } => write!(f, "WORKDIR {}", path),
            Instruction::Copy {
                sources,
                dest,
                flags,
            } => {
                write!(f, "COPY ")?;
                for flag in flags {
                    write!(f, "{} ", flag)?;
                }
                write!(f, "{} {}", sources.join(" "), dest)
            }
            Instruction::Cmd(cmd) => write!(f, "CMD {}", cmd),
            Instruction::Entrypoint(cmd) => write!(f, "ENTRYPOINT {}", cmd),
            Instruction::Env { vars } => write!(f, "ENV {}", pairs(vars)),
            Instruction::Label { labels } => write!(f, "LABEL {}", pairs(labels)),
        }
    }
}

/// Split shell-like words, honoring single and double quotes
pub(crate) fn split_words(input: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => current.push(escaped),
                            None => return Err("unterminated escape".to_string()),
                        },
                        Some(other) => current.push(other),
                        None => return Err("unterminated double quote".to_string()),
                    }
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(other) => current.push(other),
                        None => return Err("unterminated single quote".to_string()),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}
