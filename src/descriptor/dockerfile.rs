//! Dockerfile rendering and parsing

use regex::Regex;
use std::sync::OnceLock;

use super::instruction::split_words;
use super::{BuildDescriptor, CommandLine, DescriptorError, Instruction};

pub const HEADER: &str = "# Generated by botbox. Regenerate with `botbox plan --format dockerfile`.";

fn keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z]+)(?:\s+(.*))?$").expect("valid regex"))
}

/// Render the descriptor as Dockerfile text
///
/// Output depends only on the descriptor, so the same descriptor always
/// yields the same bytes.
pub fn render(descriptor: &BuildDescriptor) -> String {
    let mut out = String::new();
    out.push_str(HEADER);
    out.push('\n');
    for (_, instruction) in descriptor.instructions() {
        out.push_str(&instruction.to_string());
        out.push('\n');
    }
    out
}

/// An instruction together with the line it starts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub line: usize,
    pub instruction: Instruction,
}

/// Join continuation lines and drop comments, keeping each logical line's
/// starting line number
fn logical_lines(content: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending = String::new();
    let mut start = 0;

    for (idx, raw) in content.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.starts_with('#') {
            continue;
        }
        if pending.is_empty() {
            if trimmed.is_empty() {
                continue;
            }
            start = idx + 1;
        }

        if let Some(head) = trimmed.strip_suffix('\\') {
            let head = head.trim_end();
            if !head.is_empty() {
                if !pending.is_empty() {
                    pending.push(' ');
                }
                pending.push_str(head);
            }
            continue;
        }

        if !trimmed.is_empty() {
            if !pending.is_empty() {
                pending.push(' ');
            }
            pending.push_str(trimmed);
        }
        lines.push((start, std::mem::take(&mut pending)));
    }

    if !pending.is_empty() {
        lines.push((start, pending));
    }
    lines
}

fn parse_command_line(
    line: usize,
    keyword: &str,
    args: &str,
) -> Result<CommandLine, DescriptorError> {
    if args.starts_with('[') {
        let parsed: Vec<String> =
            serde_json::from_str(args).map_err(|e| DescriptorError::Malformed {
                line,
                reason: format!("{} has an invalid JSON array: {}", keyword, e),
            })?;
        Ok(CommandLine::exec(parsed))
    } else {
        Ok(CommandLine::shell(args))
    }
}

fn parse_pairs(line: usize, keyword: &str, args: &str) -> Result<Vec<(String, String)>, DescriptorError> {
    let malformed = |reason: String| DescriptorError::Malformed { line, reason };
    let words = split_words(args).map_err(|e| malformed(format!("{}: {}", keyword, e)))?;

    // Legacy `ENV KEY value with spaces` form
    if let Some(first) = words.first() {
        if !first.contains('=') {
            if words.len() < 2 {
                return Err(malformed(format!("{} {} has no value", keyword, first)));
            }
            return Ok(vec![(first.clone(), words[1..].join(" "))]);
        }
    }

    words
        .into_iter()
        .map(|word| match word.split_once('=') {
            Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
            _ => Err(malformed(format!("{} expects key=value, got '{}'", keyword, word))),
        })
        .collect()
}

fn parse_instruction(line: usize, text: &str) -> Result<Instruction, DescriptorError> {
    let caps = keyword_re()
        .captures(text)
        .ok_or_else(|| DescriptorError::Malformed {
            line,
            reason: format!("cannot read instruction '{}'", text),
        })?;
    let keyword = caps[1].to_ascii_uppercase();
    let args = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");

    if args.is_empty() {
        return Err(DescriptorError::Malformed {
            line,
            reason: format!("{} has no arguments", keyword),
        });
    }

    let instruction = match keyword.as_str() {
        "FROM" => {
            let words: Vec<&str> = args.split_whitespace().collect();
            match words.as_slice() {
                [image] => Instruction::From {
                    image: image.to_string(),
                    alias: None,
                },
                [image, as_kw, alias] if as_kw.eq_ignore_ascii_case("as") => Instruction::From {
                    image: image.to_string(),
                    alias: Some(alias.to_string()),
                },
                _ => {
                    return Err(DescriptorError::Malformed {
                        line,
                        reason: format!("unsupported FROM arguments '{}'", args),
                    })
                }
            }
        }
        "RUN" => {
            let command = if args.starts_with('[') {
                parse_command_line(line, "RUN", args)?.args.join(" ")
            } else {
                args.to_string()
            };
            Instruction::Run { command }
        }
        "WORKDIR" => Instruction::Workdir {
            path: args.to_string(),
        },
        "COPY" | "ADD" => {
            let words = if args.starts_with('[') {
                parse_command_line(line, &keyword, args)?.args
            } else {
                split_words(args).map_err(|reason| DescriptorError::Malformed { line, reason })?
            };
            let (flags, paths): (Vec<String>, Vec<String>) =
                words.into_iter().partition(|w| w.starts_with("--"));
            if paths.len() < 2 {
                return Err(DescriptorError::Malformed {
                    line,
                    reason: format!("{} needs a source and a destination", keyword),
                });
            }
            let mut sources = paths;
            let dest = sources.pop().unwrap_or_default();
            Instruction::Copy {
                sources,
                dest,
                flags,
            }
        }
        "CMD" => Instruction::Cmd(parse_command_line(line, "CMD", args)?),
        "ENTRYPOINT" => Instruction::Entrypoint(parse_command_line(line, "ENTRYPOINT", args)?),
        "ENV" => Instruction::Env {
            vars: parse_pairs(line, "ENV", args)?,
        },
        "LABEL" => Instruction::Label {
            labels: parse_pairs(line, "LABEL", args)?,
        },
        _ => return Err(DescriptorError::UnknownInstruction { line, keyword }),
    };

    Ok(instruction)
}

/// Parse Dockerfile text, keeping line numbers
pub fn parse_located(content: &str) -> Result<Vec<Located>, DescriptorError> {
    logical_lines(content)
        .into_iter()
        .map(|(line, text)| {
            parse_instruction(line, &text).map(|instruction| Located { line, instruction })
        })
        .collect()
}

/// Parse Dockerfile text into instructions
pub fn parse(content: &str) -> Result<Vec<Instruction>, DescriptorError> {
    Ok(parse_located(content)?
        .into_iter()
        .map(|l| l.instruction)
        .collect())
}
