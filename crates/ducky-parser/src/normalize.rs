use ducky_core::Language;
use sha2::{Digest, Sha256};

/// How entity text is normalized before hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeMode {
    /// Comments are insignificant; cosmetic edits never register as changes.
    StripComments,
    /// Comments count as content, for documentation-quality feedback.
    CommentsMatter,
}

pub fn hash_str(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Normalize source so that formatting-only (and, unless comments matter,
/// comment-only) edits produce an unchanged digest.
pub fn normalize_source(src: &str, language: &Language, mode: NormalizeMode) -> String {
    match mode {
        NormalizeMode::CommentsMatter => strip_whitespace(src),
        NormalizeMode::StripComments => match language {
            Language::Python => strip_comments_python(src),
            Language::Rust | Language::JavaScript | Language::TypeScript | Language::Go => {
                strip_comments_c_like(src)
            }
            Language::Other(_) => strip_whitespace(src),
        },
    }
}

/// Trim every line and drop blank ones.
pub fn strip_whitespace(s: &str) -> String {
    s.lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_comments_c_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut it = s.chars().peekable();
    let mut in_block = false;
    while let Some(c) = it.next() {
        if in_block {
            if c == '*' && it.peek() == Some(&'/') {
                in_block = false;
                it.next();
            }
            continue;
        }
        if c == '/' {
            if let Some('/') = it.peek() {
                for ch in it.by_ref() {
                    if ch == '\n' {
                        out.push('\n');
                        break;
                    }
                }
                continue;
            }
            if let Some('*') = it.peek() {
                in_block = true;
                it.next();
                continue;
            }
        }
        out.push(c);
    }
    strip_whitespace(&out)
}

fn strip_comments_python(s: &str) -> String {
    let mut out_lines = Vec::new();
    for line in s.lines() {
        let mut escaped = false;
        let mut in_str: Option<char> = None;
        let mut acc = String::new();
        let chars = line.chars();
        for c in chars {
            if let Some(q) = in_str {
                acc.push(c);
                if c == q && !escaped {
                    in_str = None;
                }
                escaped = c == '\\' && !escaped;
                continue;
            }
            match c {
                '\'' | '"' => {
                    in_str = Some(c);
                    acc.push(c);
                }
                '#' => break,
                _ => acc.push(c),
            }
        }
        let trimmed = acc.trim();
        if !trimmed.is_empty() {
            out_lines.push(trimmed.to_string());
        }
    }
    out_lines.join("\n")
}
