//! Terminal-marker and REPL-block extraction from raw model output.

use regex::Regex;

use crate::types::FinalAnswer;

/// Extract a terminal marker from model output.
///
/// `FINAL_VAR(name)` wins over `FINAL(...)` when both are present; both must
/// sit at the end of a line with nothing but whitespace after them. `FINAL`
/// content may span lines and is trimmed.
pub fn extract_final(output: &str) -> Option<FinalAnswer> {
    let var_re = Regex::new(r"(?m)FINAL_VAR\(\s*([A-Za-z_][A-Za-z0-9_]*)\s*\)\s*$").expect("static regex");
    if let Some(caps) = var_re.captures(output) {
        return Some(FinalAnswer::Var(caps[1].to_string()));
    }

    let text_re = Regex::new(r"(?ms)FINAL\((.*?)\)\s*$").expect("static regex");
    if let Some(caps) = text_re.captures(output) {
        return Some(FinalAnswer::Text(caps[1].trim().to_string()));
    }

    None
}

/// Extract every fenced ```repl block body, in order of appearance.
pub fn extract_repl_blocks(output: &str) -> Vec<String> {
    let re = Regex::new(r"(?s)```repl\s*(.*?)```").expect("static regex");
    re.captures_iter(output)
        .map(|caps| caps[1].to_string())
        .collect()
}
