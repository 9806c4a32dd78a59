//! Class-token rewriting for label files.

use std::collections::HashMap;

use thiserror::Error;

/// Source class token -> destination class token. Must be total over the
/// tokens it is applied to.
pub type ClassMapping = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemapError {
    #[error("line {line}: class token '{token}' has no entry in the mapping")]
    MissingClass { line: usize, token: String },

    #[error("line {line}: expected a class token followed by four box values")]
    Malformed { line: usize },
}

/// `"0" -> names[0]`, `"1" -> names[1]`, ...
pub fn index_to_name(names: &[String]) -> ClassMapping {
    names
        .iter()
        .enumerate()
        .map(|(i, n)| (i.to_string(), n.clone()))
        .collect()
}

/// `names[0] -> "0"`, ... The first occurrence wins if a name repeats.
pub fn name_to_index(names: &[String]) -> ClassMapping {
    let mut m = ClassMapping::with_capacity(names.len());
    for (i, n) in names.iter().enumerate() {
        m.entry(n.clone()).or_insert_with(|| i.to_string());
    }
    m
}

/// Rewrites the class token of every line through `mapping`.
///
/// Box values are copied verbatim. Blank lines are dropped; every other line
/// keeps its position.
pub fn remap<'a, I>(lines: I, mapping: &ClassMapping) -> Result<Vec<String>, RemapError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = Vec::new();
    for (i, line) in lines.into_iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let (class, geometry) = split_class_token(line).ok_or(RemapError::Malformed { line: i + 1 })?;
        let dest = mapping.get(class).ok_or_else(|| RemapError::MissingClass {
            line: i + 1,
            token: class.to_string(),
        })?;
        out.push(format!("{dest} {geometry}"));
    }
    Ok(out)
}

/// Splits `line` into (class token, box values).
///
/// The box values are the last four whitespace separated fields; everything
/// before them is the class token, which may itself contain spaces once it
/// holds a class name such as `traffic light`.
fn split_class_token(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    let mut geometry_start = line.len();
    for _ in 0..4 {
        let head = line[..geometry_start].trim_end();
        let (idx, ch) = head.char_indices().rev().find(|(_, c)| c.is_whitespace())?;
        geometry_start = idx + ch.len_utf8();
    }
    let class = line[..geometry_start].trim_end();
    if class.is_empty() {
        return None;
    }
    Some((class, &line[geometry_start..]))
}
