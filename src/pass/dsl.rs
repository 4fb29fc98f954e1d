//! Pipeline DSL (§6 "Pipeline DSL"): a small comma-separated, paren-nesting
//! grammar for naming a sequence of passes, e.g.
//! `"canonicalize, sroa(inline_sub)"`.

use crate::pass::{PassEntry, PassRegistry, Pipeline, Step};

/// Failure to parse or resolve a pipeline DSL string (§7.1
/// "pass::dsl::DslError").
#[derive(Debug, Clone, thiserror::Error)]
pub enum DslError {
    #[error("expected a pass name")]
    ExpectedPassName,
    #[error("unbalanced parens in pipeline spec")]
    UnbalancedParens,
    #[error("unknown pass: {0}")]
    UnknownPass(String),
    #[error("pass {0} does not take arguments")]
    UnexpectedArguments(String),
    #[error("unexpected trailing tokens in pipeline spec: {0:?}")]
    TrailingTokens(String),
}

#[derive(Debug, Clone)]
enum Token {
    Ident(String),
    Comma,
    LParen,
    RParen,
}

fn tokenize(s: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = s.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ',' => {
                tokens.push(Token::Comma);
                chars.next();
            }
            '(' => {
                tokens.push(Token::LParen);
                chars.next();
            }
            ')' => {
                tokens.push(Token::RParen);
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            _ => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '-' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
        }
    }
    tokens
}

/// Parses a comma-separated, paren-nesting pass list into an executable
/// [`Pipeline`]. Unknown pass names are a parse error.
pub fn parse_pipeline(s: &str) -> Result<Pipeline, DslError> {
    let tokens = tokenize(s);
    let mut pos = 0;
    let steps = parse_list(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(DslError::TrailingTokens(s.to_string()));
    }
    Ok(Pipeline::from_steps(steps))
}

fn parse_list(tokens: &[Token], pos: &mut usize) -> Result<Vec<Step>, DslError> {
    let mut steps = Vec::new();
    loop {
        if *pos >= tokens.len() {
            break;
        }
        if matches!(tokens[*pos], Token::RParen) {
            break;
        }
        let name = match &tokens[*pos] {
            Token::Ident(n) => n.clone(),
            _ => return Err(DslError::ExpectedPassName),
        };
        *pos += 1;
        let mut sub: Option<Pipeline> = None;
        if *pos < tokens.len() && matches!(tokens[*pos], Token::LParen) {
            *pos += 1;
            let inner = parse_list(tokens, pos)?;
            if *pos >= tokens.len() || !matches!(tokens[*pos], Token::RParen) {
                return Err(DslError::UnbalancedParens);
            }
            *pos += 1;
            sub = Some(Pipeline::from_steps(inner));
        }
        let registry = PassRegistry::global();
        let entry = registry.entry(name.as_str()).ok_or_else(|| DslError::UnknownPass(name.clone()))?;
        steps.push(match entry {
            PassEntry::Function(make) => {
                if sub.is_some() {
                    return Err(DslError::UnexpectedArguments(name));
                }
                Step::Function(make())
            }
            PassEntry::Module(make) => Step::Module(make(sub)),
        });
        if *pos < tokens.len() && matches!(tokens[*pos], Token::Comma) {
            *pos += 1;
        } else {
            break;
        }
    }
    Ok(steps)
}

/// Builds the canonical pipeline for an optimization level, mirroring §6
/// "Compiler invocation CLI ... optimization level, pass-pipeline string
/// (alternative to opt level)".
pub fn pipeline_for_opt_level(level: u32) -> Pipeline {
    let spec = match level {
        0 => "canonicalize, memtoreg",
        1 => "canonicalize, memtoreg, instcombine, dce",
        2 => "canonicalize, sroa, memtoreg, instcombine, gvn, dce, looprotate",
        _ => "canonicalize, sroa, memtoreg, instcombine, gvn, dce, looprotate, inline(sroa, memtoreg, instcombine, dce), tailcall",
    };
    parse_pipeline(spec).expect("built-in opt-level pipelines must parse")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_pipeline() {
        let p = parse_pipeline("canonicalize, dce").unwrap();
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn parses_nested_pipeline() {
        let p = parse_pipeline("inline(sroa, memtoreg)").unwrap();
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn rejects_unknown_pass() {
        let err = parse_pipeline("bogus").unwrap_err();
        assert!(matches!(err, DslError::UnknownPass(_)));
    }

    #[test]
    fn rejects_unbalanced_parens() {
        let err = parse_pipeline("inline(sroa").unwrap_err();
        assert!(matches!(err, DslError::UnbalancedParens));
    }

    #[test]
    fn every_opt_level_parses() {
        for level in 0..=3 {
            pipeline_for_opt_level(level);
        }
    }
}
