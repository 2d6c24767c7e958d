//! Tolerant parser for the one-line command form.
//!
//! Accepts a single `page.<method>(...)` expression, optionally prefixed
//! with `await `, and produces the same [`Command`] enum as the
//! structured form. The grammar is deliberately small: string literals
//! (single or double quoted), integers, floats, and the one
//! `{position:{x:N, y:N}}` object shape. A recognized method with
//! malformed arguments fails fast with `UnparsableLine`; an unrecognized
//! line is offered to the caller as a JavaScript fallback instead.

use super::Command;
use crate::driver::ScreenshotFormat;
use crate::error::ServerError;
use regex::Regex;
use std::sync::OnceLock;

/// Result of parsing one line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Command(Command),
    /// Not a supported `page.<method>(...)` form; the text may be handed
    /// to the backend as a JavaScript expression.
    JsFallback(String),
}

/// Coordinate extraction for `{position:{x:…, y:…}}`, tolerant of
/// spacing, nesting, and capitalization.
fn position_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)x:\s*([\d.]+).*?y:\s*([\d.]+)").expect("static regex"))
}

/// One scanned argument.
#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Str(String),
    Num(f64),
    /// Raw text of a brace-balanced object literal.
    Object(String),
}

pub fn parse_line(line: &str) -> Result<ParsedLine, ServerError> {
    let trimmed = line.trim();
    let rest = match trimmed.strip_prefix("await ") {
        Some(r) => r.trim_start(),
        None => trimmed,
    };

    if !rest.starts_with("page.") {
        return Ok(ParsedLine::JsFallback(rest.to_string()));
    }
    let (Some(open), true) = (rest.find('('), rest.ends_with(')')) else {
        return Ok(ParsedLine::JsFallback(rest.to_string()));
    };

    let method = &rest["page.".len()..open];
    let args_src = &rest[open + 1..rest.len() - 1];
    let base = open + 1;

    let command = match method {
        "click" => {
            let args = scan_args(args_src, base)?;
            match args.as_slice() {
                [Arg::Str(selector)] => Command::ClickSelector {
                    selector: selector.clone(),
                },
                [Arg::Object(raw)] if raw.contains("position") => {
                    let caps = position_regex().captures(raw).ok_or_else(|| {
                        ServerError::UnparsableLine {
                            reason: "position object requires numeric x and y".into(),
                            offset: base,
                        }
                    })?;
                    let x = parse_coord(&caps[1], base)?;
                    let y = parse_coord(&caps[2], base)?;
                    Command::ClickAt { x, y }
                }
                [Arg::Object(_)] => {
                    return Err(ServerError::UnparsableLine {
                        reason: "only {position:{x, y}} objects are supported".into(),
                        offset: base,
                    });
                }
                _ => {
                    return Err(ServerError::UnparsableLine {
                        reason: "click takes a selector string or a position object".into(),
                        offset: base,
                    });
                }
            }
        }
        "type" => match scan_args(args_src, base)?.as_slice() {
            [Arg::Str(text)] => Command::Type {
                selector: None,
                text: text.clone(),
            },
            [Arg::Str(selector), Arg::Str(text)] => Command::Type {
                selector: Some(selector.clone()),
                text: text.clone(),
            },
            _ => {
                return Err(ServerError::UnparsableLine {
                    reason: "type takes text, or a selector and text".into(),
                    offset: base,
                });
            }
        },
        "fill" => match scan_args(args_src, base)?.as_slice() {
            [Arg::Str(selector), Arg::Str(value)] => Command::Fill {
                selector: selector.clone(),
                value: value.clone(),
            },
            _ => {
                return Err(ServerError::UnparsableLine {
                    reason: "fill takes a selector and a value".into(),
                    offset: base,
                });
            }
        },
        "goto" => match scan_args(args_src, base)?.as_slice() {
            [Arg::Str(url)] => Command::Goto {
                url: url.clone(),
                wait_until: None,
            },
            _ => {
                return Err(ServerError::UnparsableLine {
                    reason: "goto takes a URL string".into(),
                    offset: base,
                });
            }
        },
        "screenshot" => match scan_args(args_src, base)?.as_slice() {
            [] => Command::Screenshot {
                path: None,
                full_page: false,
                format: ScreenshotFormat::Png,
            },
            _ => {
                return Err(ServerError::UnparsableLine {
                    reason: "screenshot takes no arguments in line form".into(),
                    offset: base,
                });
            }
        },
        "press" => match scan_args(args_src, base)?.as_slice() {
            [Arg::Str(key)] => Command::Press {
                selector: None,
                key: key.clone(),
            },
            [Arg::Str(selector), Arg::Str(key)] => Command::Press {
                selector: Some(selector.clone()),
                key: key.clone(),
            },
            _ => {
                return Err(ServerError::UnparsableLine {
                    reason: "press takes a key, or a selector and a key".into(),
                    offset: base,
                });
            }
        },
        "select_option" => match scan_args(args_src, base)?.as_slice() {
            [Arg::Str(selector), Arg::Str(value)] => Command::SelectOption {
                selector: selector.clone(),
                value: value.clone(),
            },
            _ => {
                return Err(ServerError::UnparsableLine {
                    reason: "select_option takes a selector and a value".into(),
                    offset: base,
                });
            }
        },
        "wait_for_selector" => match scan_args(args_src, base)?.as_slice() {
            [Arg::Str(selector)] => Command::WaitForSelector {
                selector: selector.clone(),
                state: None,
            },
            _ => {
                return Err(ServerError::UnparsableLine {
                    reason: "wait_for_selector takes a selector string".into(),
                    offset: base,
                });
            }
        },
        "wait_for_timeout" => match scan_args(args_src, base)?.as_slice() {
            [Arg::Num(ms)] if *ms >= 0.0 => Command::Wait { ms: *ms as u64 },
            _ => {
                return Err(ServerError::UnparsableLine {
                    reason: "wait_for_timeout takes a millisecond count".into(),
                    offset: base,
                });
            }
        },
        "mouse.click" => match scan_args(args_src, base)?.as_slice() {
            [Arg::Num(x), Arg::Num(y)] => Command::MouseClickXy { x: *x, y: *y },
            _ => {
                return Err(ServerError::UnparsableLine {
                    reason: "mouse.click takes numeric x and y".into(),
                    offset: base,
                });
            }
        },
        "reload" => empty_args(args_src, base, Command::Reload)?,
        "go_back" => empty_args(args_src, base, Command::Back)?,
        "go_forward" => empty_args(args_src, base, Command::Forward)?,
        _ => return Ok(ParsedLine::JsFallback(rest.to_string())),
    };

    Ok(ParsedLine::Command(command))
}

fn empty_args(args_src: &str, base: usize, command: Command) -> Result<Command, ServerError> {
    if args_src.trim().is_empty() {
        Ok(command)
    } else {
        Err(ServerError::UnparsableLine {
            reason: "this method takes no arguments".into(),
            offset: base,
        })
    }
}

fn parse_coord(text: &str, offset: usize) -> Result<f64, ServerError> {
    text.parse().map_err(|_| ServerError::UnparsableLine {
        reason: format!("cannot parse coordinate {text:?}"),
        offset,
    })
}

/// Scan a comma-separated argument list into tokens. Offsets in errors
/// are character positions relative to the whole (await-stripped) line.
fn scan_args(src: &str, base: usize) -> Result<Vec<Arg>, ServerError> {
    let chars: Vec<char> = src.chars().collect();
    let mut args = Vec::new();
    let mut i = 0;

    loop {
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }

        let start = i;
        let arg = match chars[i] {
            quote @ ('"' | '\'') => {
                i += 1;
                let mut value = String::new();
                let mut closed = false;
                while i < chars.len() {
                    let c = chars[i];
                    if c == '\\' && i + 1 < chars.len() {
                        value.push(chars[i + 1]);
                        i += 2;
                        continue;
                    }
                    if c == quote {
                        closed = true;
                        i += 1;
                        break;
                    }
                    value.push(c);
                    i += 1;
                }
                if !closed {
                    return Err(ServerError::UnparsableLine {
                        reason: "unterminated string literal".into(),
                        offset: base + start,
                    });
                }
                Arg::Str(value)
            }
            '{' => {
                let mut depth = 0usize;
                let mut raw = String::new();
                let mut closed = false;
                while i < chars.len() {
                    let c = chars[i];
                    raw.push(c);
                    i += 1;
                    match c {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                closed = true;
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                if !closed {
                    return Err(ServerError::UnparsableLine {
                        reason: "unbalanced braces".into(),
                        offset: base + start,
                    });
                }
                Arg::Object(raw)
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || chars[i] == '.' || chars[i] == '-')
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text.parse().map_err(|_| ServerError::UnparsableLine {
                    reason: format!("cannot parse number {text:?}"),
                    offset: base + start,
                })?;
                Arg::Num(value)
            }
            c => {
                return Err(ServerError::UnparsableLine {
                    reason: format!("unexpected character {c:?}"),
                    offset: base + start,
                });
            }
        };
        args.push(arg);

        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if i < chars.len() {
            if chars[i] != ',' {
                return Err(ServerError::UnparsableLine {
                    reason: format!("expected `,` but found {:?}", chars[i]),
                    offset: base + i,
                });
            }
            i += 1;
        }
    }

    Ok(args)
}
