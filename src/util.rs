//! Small text helpers shared across the engine.

use serde_json::Value;

/// Cap a string at `max_chars`, appending a marker that names the original
/// length. Strings at or under the cap pass through untouched.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let prefix: String = s.chars().take(max_chars).collect();
    format!("{prefix}\n…(truncated, total {} chars)…", s.chars().count())
}

/// Read an integer override from the process environment, falling back when
/// the variable is absent or unparseable.
pub fn parse_env_usize(name: &str, fallback: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

pub fn parse_env_u64(name: &str, fallback: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

/// Substitute `{key}` placeholders; unknown keys are left in place.
pub fn apply_template(s: &str, vars: &[(&str, &str)]) -> String {
    let mut out = s.to_string();
    for (k, v) in vars {
        out = out.replace(&format!("{{{k}}}"), v);
    }
    out
}

/// Split a command-line string into arguments, honoring single quotes,
/// double quotes, and backslash escapes (inside double quotes and bare text).
pub fn parse_shell_args(input: &str) -> Vec<String> {
    #[derive(PartialEq)]
    enum Mode {
        None,
        Single,
        Double,
    }

    let s = input.trim();
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut mode = Mode::None;
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        match mode {
            Mode::Single => {
                if ch == '\'' {
                    mode = Mode::None;
                } else {
                    cur.push(ch);
                }
            }
            Mode::Double => {
                if ch == '"' {
                    mode = Mode::None;
                } else if ch == '\\' {
                    if let Some(next) = chars.next() {
                        cur.push(next);
                    }
                } else {
                    cur.push(ch);
                }
            }
            Mode::None => {
                if ch.is_whitespace() {
                    if !cur.is_empty() {
                        out.push(std::mem::take(&mut cur));
                    }
                } else if ch == '\'' {
                    mode = Mode::Single;
                } else if ch == '"' {
                    mode = Mode::Double;
                } else if ch == '\\' {
                    if let Some(next) = chars.next() {
                        cur.push(next);
                    }
                } else {
                    cur.push(ch);
                }
            }
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

/// Blank out secret-bearing arguments before a command line is logged.
pub fn redact_cmd_for_log(cmd: &[String]) -> Vec<String> {
    let secret_flag = regex::Regex::new(r"(?i)^--?(api[-_]?key|key|token|secret|password|bearer)$")
        .expect("static regex");
    let secret_inline = regex::Regex::new(r"(?i)(api[-_]?key|token|secret|password)=").expect("static regex");

    let mut out: Vec<String> = cmd.to_vec();
    let mut i = 0;
    while i < out.len() {
        if secret_flag.is_match(&out[i]) && i + 1 < out.len() {
            out[i + 1] = "***REDACTED***".into();
            i += 2;
            continue;
        }
        if secret_inline.is_match(&out[i]) {
            if let Some(idx) = out[i].find('=') {
                out[i] = format!("{}***REDACTED***", &out[i][..idx + 1]);
            }
        }
        i += 1;
    }
    out
}

/// Best-effort extraction of the first balanced JSON object or array embedded
/// in free text. Returns `None` when nothing parses.
pub fn extract_json_from_text(text: &str) -> Option<Value> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }

    let start = match (t.find('{'), t.find('[')) {
        (Some(o), Some(a)) => o.min(a),
        (Some(o), None) => o,
        (None, Some(a)) => a,
        (None, None) => return None,
    };

    let bytes = t.as_bytes();
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => stack.push(b),
            b'}' | b']' => {
                let Some(top) = stack.pop() else { continue };
                if (top == b'{' && b != b'}') || (top == b'[' && b != b']') {
                    continue;
                }
                if stack.is_empty() {
                    return serde_json::from_str(&t[start..=i]).ok();
                }
            }
            _ => {}
        }
    }
    None
}
