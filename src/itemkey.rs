//! Metric key parsing.
//!
//! Keys have the form `name` or `name[param,param,...]`. Parameters may be
//! quoted with `"` (a quote inside is escaped as `\"`) or may be an unquoted
//! bracketed array such as `[a,b]`, which is kept verbatim.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KeyError {
    #[error("Invalid item key format: empty key")]
    Empty,
    #[error("Invalid item key format: invalid character '{1}' in key name at position {0}")]
    InvalidName(usize, char),
    #[error("Invalid item key format: unterminated parameter list")]
    Unterminated,
    #[error("Invalid item key format: unexpected character '{1}' at position {0}")]
    Unexpected(usize, char),
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-'
}

/// Splits a key into its name and parameters.
pub fn parse_key(key: &str) -> Result<(String, Vec<String>), KeyError> {
    if key.is_empty() {
        return Err(KeyError::Empty);
    }

    let (name_end, c) = match key.char_indices().find(|(_, c)| !is_key_char(*c)) {
        None => return Ok((key.to_string(), Vec::new())),
        Some(found) => found,
    };
    if c != '[' {
        return Err(KeyError::InvalidName(name_end, c));
    }
    if name_end == 0 {
        return Err(KeyError::InvalidName(0, c));
    }

    let name = key[..name_end].to_string();
    let (params, end) = parse_params(key, name_end + 1)?;
    if end != key.len() {
        let c = key[end..].chars().next().unwrap_or(' ');
        return Err(KeyError::Unexpected(end, c));
    }
    Ok((name, params))
}

/// Parses the parameter list starting right after the opening bracket.
/// Returns the parameters and the byte offset following the closing bracket.
fn parse_params(key: &str, start: usize) -> Result<(Vec<String>, usize), KeyError> {
    let bytes = key.as_bytes();
    let mut params = Vec::new();
    let mut pos = start;

    loop {
        // skip leading spaces
        while pos < bytes.len() && bytes[pos] == b' ' {
            pos += 1;
        }
        if pos >= bytes.len() {
            return Err(KeyError::Unterminated);
        }

        let param;
        match bytes[pos] {
            b'"' => {
                let (value, next) = parse_quoted(key, pos + 1)?;
                param = value;
                pos = next;
                while pos < bytes.len() && bytes[pos] == b' ' {
                    pos += 1;
                }
            }
            b'[' => {
                let close = find_array_end(key, pos + 1)?;
                param = key[pos..=close].to_string();
                pos = close + 1;
            }
            _ => {
                let end = key[pos..]
                    .find([',', ']'])
                    .map(|i| pos + i)
                    .ok_or(KeyError::Unterminated)?;
                param = key[pos..end].trim_end().to_string();
                pos = end;
            }
        }
        params.push(param);

        match bytes.get(pos) {
            Some(b',') => pos += 1,
            Some(b']') => return Ok((params, pos + 1)),
            Some(_) => {
                let c = key[pos..].chars().next().unwrap_or(' ');
                return Err(KeyError::Unexpected(pos, c));
            }
            None => return Err(KeyError::Unterminated),
        }
    }
}

fn parse_quoted(key: &str, start: usize) -> Result<(String, usize), KeyError> {
    let mut value = String::new();
    let mut chars = key[start..].char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' if matches!(chars.peek(), Some((_, '"'))) => {
                chars.next();
                value.push('"');
            }
            '"' => return Ok((value, start + i + 1)),
            _ => value.push(c),
        }
    }
    Err(KeyError::Unterminated)
}

fn find_array_end(key: &str, start: usize) -> Result<usize, KeyError> {
    let mut quoted = false;
    let mut prev = '\0';
    for (i, c) in key[start..].char_indices() {
        match c {
            '"' if prev != '\\' => quoted = !quoted,
            '[' if !quoted => return Err(KeyError::Unexpected(start + i, c)),
            ']' if !quoted => return Ok(start + i),
            _ => {}
        }
        prev = c;
    }
    Err(KeyError::Unterminated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_key() {
        assert_eq!(parse_key("agent.ping").unwrap(), ("agent.ping".to_string(), vec![]));
    }

    #[test]
    fn test_key_with_params() {
        let (name, params) = parse_key("vfs.fs.size[/,free]").unwrap();
        assert_eq!(name, "vfs.fs.size");
        assert_eq!(params, vec!["/", "free"]);
    }

    #[test]
    fn test_empty_params_are_kept() {
        let (_, params) = parse_key("system.cpu.util[,user,]").unwrap();
        assert_eq!(params, vec!["", "user", ""]);
    }

    #[test]
    fn test_quoted_params() {
        let (_, params) = parse_key(r#"system.run["echo a,b", "say \"hi\""]"#).unwrap();
        assert_eq!(params, vec!["echo a,b", r#"say "hi""#]);
    }

    #[test]
    fn test_array_param() {
        let (_, params) = parse_key("net.if.in[[eth0,eth1],bytes]").unwrap();
        assert_eq!(params, vec!["[eth0,eth1]", "bytes"]);
    }

    #[test]
    fn test_invalid_keys() {
        assert_eq!(parse_key(""), Err(KeyError::Empty));
        assert!(matches!(parse_key("bad key"), Err(KeyError::InvalidName(3, ' '))));
        assert_eq!(parse_key("a[1,2"), Err(KeyError::Unterminated));
        assert!(matches!(parse_key("a[1]x"), Err(KeyError::Unexpected(4, 'x'))));
        assert!(matches!(parse_key("[1]"), Err(KeyError::InvalidName(0, '['))));
    }
}
