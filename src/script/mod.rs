//! The REPL script language.
//!
//! Model responses carry ```repl``` blocks of line-oriented commands over the
//! environment's primitive vocabulary. There is no general-purpose evaluation:
//! the command set below is the whole language.
//!
//! ```text
//! LET hits = SEARCH "needle" 20
//! LET text = READ 0 2000
//! LET part = SLICE text 100 400
//! LET size = LEN context
//! LET parts = CHUNK context BY_LINES 100
//! LET parts = CHUNK context BY_CHARS 50000
//! LET body = JOIN answers "\n"
//! LET both = CONCAT a b
//! LET one = INDEX parts 0
//! LET copy = GET original
//! LET docs = LIST_DOCS 50 0
//! LET hits = SEARCH_DOCS "query" 10
//! LET text = READ_DOC doc_id 0 4096
//! LET ans = QUERY "question" WITH part
//! LET h = QUERY_ASYNC "question" WITH part
//! LET res = AWAIT h1 h2
//! LET res = QUERY_EACH "question" WITH parts 4
//! LET res = QUERY_BATCHED "question" WITH parts
//! PRINT ans
//! STATE
//! SHOW_VARS
//! ```

use std::fmt;

/// Chunking strategy for `CHUNK`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkBy {
    Lines,
    Chars,
}

/// A parsed script command
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptCommand {
    /// LET var = SEARCH "query" [max_matches]
    Search {
        target: String,
        query: String,
        max_matches: Option<usize>,
    },
    /// LET var = READ start end — substring of the context
    Read {
        target: String,
        start: usize,
        end: usize,
    },
    /// LET var = SLICE source start end
    Slice {
        target: String,
        source: String,
        start: usize,
        end: usize,
    },
    /// LET var = LEN source
    Len { target: String, source: String },
    /// LET var = JOIN source "separator"
    Join {
        target: String,
        source: String,
        separator: String,
    },
    /// LET var = CONCAT a b
    Concat {
        target: String,
        left: String,
        right: String,
    },
    /// LET var = INDEX source idx
    Index {
        target: String,
        source: String,
        index: usize,
    },
    /// LET var = GET source (copy)
    Get { target: String, source: String },
    /// LET var = CHUNK source BY_LINES|BY_CHARS n
    Chunk {
        target: String,
        source: String,
        by: ChunkBy,
        size: usize,
    },
    /// LET var = LIST_DOCS [limit [offset]]
    ListDocs {
        target: String,
        limit: usize,
        offset: usize,
    },
    /// LET var = SEARCH_DOCS "query" [limit]
    SearchDocs {
        target: String,
        query: String,
        limit: usize,
    },
    /// LET var = READ_DOC id start_byte end_byte
    ReadDoc {
        target: String,
        id: String,
        start_byte: usize,
        end_byte: usize,
    },
    /// LET var = QUERY "question" WITH source
    Query {
        target: String,
        question: String,
        source: String,
    },
    /// LET var = QUERY_ASYNC "question" WITH source — yields a handle
    QueryAsync {
        target: String,
        question: String,
        source: String,
    },
    /// LET var = AWAIT [handles...] — empty means all registered
    Await {
        target: String,
        handles: Vec<String>,
    },
    /// LET var = QUERY_EACH "question" WITH source [concurrency]
    QueryEach {
        target: String,
        question: String,
        source: String,
        concurrency: Option<usize>,
    },
    /// LET var = QUERY_BATCHED "question" WITH source
    QueryBatched {
        target: String,
        question: String,
        source: String,
    },
    /// PRINT var
    Print { var_name: String },
    /// STATE — environment configuration
    State,
    /// SHOW_VARS
    ShowVars,
}

/// Parse failure with the offending line attached
#[derive(Debug, Clone)]
pub struct ScriptError {
    pub line: usize,
    pub message: String,
    pub source_line: String,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}: {} ({})", self.line, self.message, self.source_line)
    }
}

impl std::error::Error for ScriptError {}

pub struct ScriptParser;

impl ScriptParser {
    /// Parse one block of script code into commands. `#` and `//` comment
    /// lines and blank lines are skipped.
    pub fn parse(input: &str) -> Result<Vec<ScriptCommand>, ScriptError> {
        let mut commands = Vec::new();
        for (line_num, line) in input.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
                continue;
            }
            match Self::parse_line(trimmed) {
                Ok(cmd) => commands.push(cmd),
                Err(msg) => {
                    return Err(ScriptError {
                        line: line_num + 1,
                        message: msg,
                        source_line: trimmed.to_string(),
                    });
                }
            }
        }
        Ok(commands)
    }

    fn parse_line(line: &str) -> Result<ScriptCommand, String> {
        let tokens = Self::tokenize(line);
        if tokens.is_empty() {
            return Err("Empty line".into());
        }

        match tokens[0].to_uppercase().as_str() {
            "LET" => Self::parse_let(&tokens),
            "PRINT" => {
                if tokens.len() < 2 {
                    return Err("PRINT requires a variable name".into());
                }
                Ok(ScriptCommand::Print {
                    var_name: tokens[1].to_string(),
                })
            }
            "STATE" => Ok(ScriptCommand::State),
            "SHOW_VARS" => Ok(ScriptCommand::ShowVars),
            _ => Err(format!("Unknown command: {}", tokens[0])),
        }
    }

    fn parse_let(tokens: &[&str]) -> Result<ScriptCommand, String> {
        // LET target = OPERATION ...
        if tokens.len() < 4 || tokens[2] != "=" {
            return Err("LET syntax: LET <var> = <operation> ...".into());
        }
        let target = tokens[1].to_string();
        let operation = tokens[3].to_uppercase();

        match operation.as_str() {
            "SEARCH" => {
                let query = Self::unquote_at(tokens, 4)?;
                let max_matches = match tokens.get(5) {
                    Some(t) => Some(Self::parse_usize(t, "SEARCH max_matches")?),
                    None => None,
                };
                Ok(ScriptCommand::Search {
                    target,
                    query,
                    max_matches,
                })
            }
            "READ" => {
                if tokens.len() < 6 {
                    return Err("READ syntax: READ <start> <end>".into());
                }
                Ok(ScriptCommand::Read {
                    target,
                    start: Self::parse_usize(tokens[4], "READ start")?,
                    end: Self::parse_usize(tokens[5], "READ end")?,
                })
            }
            "SLICE" => {
                if tokens.len() < 7 {
                    return Err("SLICE syntax: SLICE <source> <start> <end>".into());
                }
                Ok(ScriptCommand::Slice {
                    target,
                    source: tokens[4].to_string(),
                    start: Self::parse_usize(tokens[5], "SLICE start")?,
                    end: Self::parse_usize(tokens[6], "SLICE end")?,
                })
            }
            "LEN" => {
                if tokens.len() < 5 {
                    return Err("LEN syntax: LEN <source>".into());
                }
                Ok(ScriptCommand::Len {
                    target,
                    source: tokens[4].to_string(),
                })
            }
            "JOIN" => {
                if tokens.len() < 6 {
                    return Err("JOIN syntax: JOIN <source> \"separator\"".into());
                }
                Ok(ScriptCommand::Join {
                    target,
                    source: tokens[4].to_string(),
                    separator: Self::unquote_at(tokens, 5)?,
                })
            }
            "CONCAT" => {
                if tokens.len() < 6 {
                    return Err("CONCAT syntax: CONCAT <left> <right>".into());
                }
                Ok(ScriptCommand::Concat {
                    target,
                    left: tokens[4].to_string(),
                    right: tokens[5].to_string(),
                })
            }
            "INDEX" => {
                if tokens.len() < 6 {
                    return Err("INDEX syntax: INDEX <source> <index>".into());
                }
                Ok(ScriptCommand::Index {
                    target,
                    source: tokens[4].to_string(),
                    index: Self::parse_usize(tokens[5], "INDEX index")?,
                })
            }
            "GET" => {
                if tokens.len() < 5 {
                    return Err("GET syntax: GET <source>".into());
                }
                Ok(ScriptCommand::Get {
                    target,
                    source: tokens[4].to_string(),
                })
            }
            "CHUNK" => {
                if tokens.len() < 7 {
                    return Err("CHUNK syntax: CHUNK <source> BY_LINES|BY_CHARS <n>".into());
                }
                let by = match tokens[5].to_uppercase().as_str() {
                    "BY_LINES" => ChunkBy::Lines,
                    "BY_CHARS" => ChunkBy::Chars,
                    other => return Err(format!("Unknown chunk strategy: {other}")),
                };
                Ok(ScriptCommand::Chunk {
                    target,
                    source: tokens[4].to_string(),
                    by,
                    size: Self::parse_usize(tokens[6], "CHUNK size")?,
                })
            }
            "LIST_DOCS" => {
                let limit = match tokens.get(4) {
                    Some(t) => Self::parse_usize(t, "LIST_DOCS limit")?,
                    None => 50,
                };
                let offset = match tokens.get(5) {
                    Some(t) => Self::parse_usize(t, "LIST_DOCS offset")?,
                    None => 0,
                };
                Ok(ScriptCommand::ListDocs {
                    target,
                    limit,
                    offset,
                })
            }
            "SEARCH_DOCS" => {
                let query = Self::unquote_at(tokens, 4)?;
                let limit = match tokens.get(5) {
                    Some(t) => Self::parse_usize(t, "SEARCH_DOCS limit")?,
                    None => 10,
                };
                Ok(ScriptCommand::SearchDocs {
                    target,
                    query,
                    limit,
                })
            }
            "READ_DOC" => {
                if tokens.len() < 7 {
                    return Err("READ_DOC syntax: READ_DOC <id> <start_byte> <end_byte>".into());
                }
                Ok(ScriptCommand::ReadDoc {
                    target,
                    id: Self::strip_quotes(tokens[4]),
                    start_byte: Self::parse_usize(tokens[5], "READ_DOC start_byte")?,
                    end_byte: Self::parse_usize(tokens[6], "READ_DOC end_byte")?,
                })
            }
            "QUERY" => {
                let (question, source, _) = Self::parse_question_with(tokens, "QUERY")?;
                Ok(ScriptCommand::Query {
                    target,
                    question,
                    source,
                })
            }
            "QUERY_ASYNC" => {
                let (question, source, _) = Self::parse_question_with(tokens, "QUERY_ASYNC")?;
                Ok(ScriptCommand::QueryAsync {
                    target,
                    question,
                    source,
                })
            }
            "AWAIT" => Ok(ScriptCommand::Await {
                target,
                handles: tokens[4..].iter().map(|t| t.to_string()).collect(),
            }),
            "QUERY_EACH" => {
                let (question, source, rest) = Self::parse_question_with(tokens, "QUERY_EACH")?;
                let concurrency = match rest {
                    Some(t) => Some(Self::parse_usize(t, "QUERY_EACH concurrency")?),
                    None => None,
                };
                Ok(ScriptCommand::QueryEach {
                    target,
                    question,
                    source,
                    concurrency,
                })
            }
            "QUERY_BATCHED" => {
                let (question, source, _) = Self::parse_question_with(tokens, "QUERY_BATCHED")?;
                Ok(ScriptCommand::QueryBatched {
                    target,
                    question,
                    source,
                })
            }
            _ => Err(format!("Unknown operation: {operation}")),
        }
    }

    /// `<OP> "question" WITH <source> [extra]` — returns (question, source, extra token)
    fn parse_question_with<'a>(
        tokens: &[&'a str],
        op: &str,
    ) -> Result<(String, String, Option<&'a str>), String> {
        let question = Self::unquote_at(tokens, 4)
            .map_err(|_| format!("{op} syntax: {op} \"question\" WITH <source>"))?;
        if tokens.get(5).map(|t| t.to_uppercase()) != Some("WITH".into()) {
            return Err(format!("{op} syntax: {op} \"question\" WITH <source>"));
        }
        let source = tokens
            .get(6)
            .ok_or(format!("{op} missing source variable"))?
            .to_string();
        Ok((question, source, tokens.get(7).copied()))
    }

    /// Tokenize respecting double-quoted strings
    fn tokenize(line: &str) -> Vec<&str> {
        let mut tokens = Vec::new();
        let mut chars = line.char_indices().peekable();
        let mut token_start: Option<usize> = None;

        while let Some(&(i, c)) = chars.peek() {
            if c == '"' {
                let start = i;
                chars.next();
                while let Some(&(_, ch)) = chars.peek() {
                    chars.next();
                    if ch == '"' {
                        break;
                    }
                }
                let end = chars.peek().map(|&(i, _)| i).unwrap_or(line.len());
                tokens.push(&line[start..end]);
                token_start = None;
            } else if c.is_whitespace() {
                if let Some(start) = token_start {
                    tokens.push(&line[start..i]);
                    token_start = None;
                }
                chars.next();
            } else {
                if token_start.is_none() {
                    token_start = Some(i);
                }
                chars.next();
            }
        }
        if let Some(start) = token_start {
            tokens.push(&line[start..]);
        }
        tokens
    }

    fn unquote_at(tokens: &[&str], index: usize) -> Result<String, String> {
        let token = tokens.get(index).ok_or("Missing quoted string")?;
        if token.starts_with('"') && token.ends_with('"') && token.len() >= 2 {
            Ok(token[1..token.len() - 1].to_string())
        } else {
            Err(format!("Expected quoted string at position {index}, got: {token}"))
        }
    }

    fn strip_quotes(token: &str) -> String {
        if token.starts_with('"') && token.ends_with('"') && token.len() >= 2 {
            token[1..token.len() - 1].to_string()
        } else {
            token.to_string()
        }
    }

    fn parse_usize(token: &str, what: &str) -> Result<usize, String> {
        token.parse().map_err(|_| format!("{what} must be a number"))
    }
}
