//! Flat route file grammar.
//!
//! ```text
//! # comment
//! domain proxy {
//!    prefix 49 {
//!       max_targets = 2
//!
//!       target gw1.example.net {
//!          prob = 0.7
//!          hash_index = 1
//!          status = 1
//!          strip = 0
//!          rewrite_prefix = ""
//!          rewrite_suffix = ""
//!          comment = "primary"
//!          backed_up = {2}
//!       }
//!    }
//! }
//! ```
//!
//! `prefix NULL` (any case) is the empty prefix. Quoted strings support
//! `\"` and `\\`. Unknown keys are errors.

use std::fmt::Write as _;

use crate::error::LoadError;

/// One `target` block.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetBlock {
    /// Rewrite host.
    pub host: String,
    /// Weight, `prob` key.
    pub prob: f64,
    /// Hash index, 0 for unassigned.
    pub hash_index: u32,
    /// Active.
    pub status: bool,
    /// Strip count.
    pub strip: u32,
    /// Local prefix.
    pub rewrite_prefix: String,
    /// Local suffix.
    pub rewrite_suffix: String,
    /// Comment.
    pub comment: String,
    /// Backup hash index.
    pub backup: Option<u32>,
    /// Backed up hash indices.
    pub backed_up: Vec<u32>,
}

impl TargetBlock {
    /// Target with default settings.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            prob: 0.0,
            hash_index: 0,
            status: true,
            strip: 0,
            rewrite_prefix: String::new(),
            rewrite_suffix: String::new(),
            comment: String::new(),
            backup: None,
            backed_up: Vec::new(),
        }
    }
}

/// One `prefix` block.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefixBlock {
    /// Prefix, empty for `NULL`.
    pub prefix: String,
    /// Declared target count.
    pub max_targets: Option<usize>,
    /// Targets in file order.
    pub targets: Vec<TargetBlock>,
}

/// One `domain` block.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainBlock {
    /// Domain name.
    pub name: String,
    /// Prefixes in file order.
    pub prefixes: Vec<PrefixBlock>,
}

/// Parsed route file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteFile {
    /// Domains in file order.
    pub domains: Vec<DomainBlock>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Open,
    Close,
    Equals,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Word(w) => format!("'{w}'"),
            Self::Quoted(s) => format!("\"{s}\""),
            Self::Open => "'{'".to_string(),
            Self::Close => "'}'".to_string(),
            Self::Equals => "'='".to_string(),
            Self::Comma => "','".to_string(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, LoadError> {
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\n' => line += 1,
            c if c.is_whitespace() => {}
            '#' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '{' => tokens.push((Token::Open, line)),
            '}' => tokens.push((Token::Close, line)),
            '=' => tokens.push((Token::Equals, line)),
            ',' => tokens.push((Token::Comma, line)),
            '"' => {
                let start = line;
                let mut value = String::new();
                loop {
                    match chars.next() {
                        None => return Err(LoadError::parse(start, "unterminated string")),
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\')) => value.push(escaped),
                            Some(other) => {
                                value.push('\\');
                                value.push(other);
                            }
                            None => return Err(LoadError::parse(start, "unterminated string")),
                        },
                        Some(c) => {
                            if c == '\n' {
                                line += 1;
                            }
                            value.push(c);
                        }
                    }
                }
                tokens.push((Token::Quoted(value), start));
            }
            c => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || matches!(next, '{' | '}' | '=' | ',' | '"' | '#') {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push((Token::Word(word), line));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |(_, line)| *line)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self) -> Result<Token, LoadError> {
        let token = self
            .tokens
            .get(self.pos)
            .map(|(t, _)| t.clone())
            .ok_or_else(|| LoadError::parse(self.line(), "unexpected end of file"))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: &Token) -> Result<(), LoadError> {
        let line = self.line();
        let token = self.next()?;
        if &token == expected {
            Ok(())
        } else {
            Err(LoadError::parse(
                line,
                format!("expected {}, found {}", expected.describe(), token.describe()),
            ))
        }
    }

    /// A name: bare word or quoted string.
    fn name(&mut self, what: &str) -> Result<String, LoadError> {
        let line = self.line();
        match self.next()? {
            Token::Word(w) | Token::Quoted(w) => Ok(w),
            other => Err(LoadError::parse(
                line,
                format!("expected {what}, found {}", other.describe()),
            )),
        }
    }

    fn keyword(&mut self, keyword: &str) -> Result<(), LoadError> {
        let line = self.line();
        match self.next()? {
            Token::Word(w) if w == keyword => Ok(()),
            other => Err(LoadError::parse(
                line,
                format!("expected '{keyword}', found {}", other.describe()),
            )),
        }
    }

    fn number<T: std::str::FromStr>(&mut self, key: &str) -> Result<T, LoadError> {
        let line = self.line();
        let raw = self.name(key)?;
        raw.parse()
            .map_err(|_| LoadError::parse(line, format!("invalid value '{raw}' for {key}")))
    }

    fn index_list(&mut self) -> Result<Vec<u32>, LoadError> {
        self.expect(&Token::Open)?;
        let mut indices = Vec::new();
        loop {
            if self.peek() == Some(&Token::Close) {
                self.pos += 1;
                return Ok(indices);
            }
            indices.push(self.number("backed_up")?);
            if self.peek() == Some(&Token::Comma) {
                self.pos += 1;
            }
        }
    }

    fn route_file(&mut self) -> Result<RouteFile, LoadError> {
        let mut file = RouteFile::default();
        while self.peek().is_some() {
            self.keyword("domain")?;
            let name = self.name("domain name")?;
            self.expect(&Token::Open)?;
            let mut domain = DomainBlock {
                name,
                prefixes: Vec::new(),
            };
            while self.peek() != Some(&Token::Close) {
                domain.prefixes.push(self.prefix_block()?);
            }
            self.expect(&Token::Close)?;
            file.domains.push(domain);
        }
        Ok(file)
    }

    fn prefix_block(&mut self) -> Result<PrefixBlock, LoadError> {
        self.keyword("prefix")?;
        let raw = self.name("prefix")?;
        let prefix = if raw.eq_ignore_ascii_case("NULL") {
            String::new()
        } else {
            raw
        };
        self.expect(&Token::Open)?;

        let mut block = PrefixBlock {
            prefix,
            max_targets: None,
            targets: Vec::new(),
        };
        while self.peek() != Some(&Token::Close) {
            let line = self.line();
            match self.name("'max_targets' or 'target'")?.as_str() {
                "max_targets" => {
                    self.expect(&Token::Equals)?;
                    block.max_targets = Some(self.number("max_targets")?);
                }
                "target" => block.targets.push(self.target_block()?),
                other => {
                    return Err(LoadError::parse(line, format!("unknown key '{other}' in prefix block")))
                }
            }
        }
        self.expect(&Token::Close)?;
        Ok(block)
    }

    fn target_block(&mut self) -> Result<TargetBlock, LoadError> {
        let host = self.name("target host")?;
        self.expect(&Token::Open)?;
        let mut target = TargetBlock::new(host);

        while self.peek() != Some(&Token::Close) {
            let line = self.line();
            let key = self.name("target key")?;
            self.expect(&Token::Equals)?;
            match key.as_str() {
                "prob" => target.prob = self.number("prob")?,
                "hash_index" => target.hash_index = self.number("hash_index")?,
                "status" => target.status = self.number::<u32>("status")? != 0,
                "strip" => target.strip = self.number("strip")?,
                "rewrite_prefix" => target.rewrite_prefix = self.name("rewrite_prefix")?,
                "rewrite_suffix" => target.rewrite_suffix = self.name("rewrite_suffix")?,
                "comment" => target.comment = self.name("comment")?,
                "backup" => {
                    let backup: i64 = self.number("backup")?;
                    target.backup = u32::try_from(backup).ok().filter(|b| *b > 0);
                }
                "backed_up" => target.backed_up = self.index_list()?,
                other => {
                    return Err(LoadError::parse(line, format!("unknown key '{other}' in target block")))
                }
            }
        }
        self.expect(&Token::Close)?;
        Ok(target)
    }
}

/// Parse a route file.
///
/// # Errors
///
/// `LoadError::Parse` with the offending line.
pub fn parse_route_file(input: &str) -> Result<RouteFile, LoadError> {
    let tokens = tokenize(input)?;
    Parser { tokens, pos: 0 }.route_file()
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn name(value: &str) -> String {
    let bare = !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '{' | '}' | '=' | ',' | '"' | '#'));
    if bare {
        value.to_string()
    } else {
        quote(value)
    }
}

/// Render a route file in the grammar accepted by [`parse_route_file`].
#[must_use]
pub fn render_route_file(file: &RouteFile) -> String {
    let mut out = String::new();
    for domain in &file.domains {
        let _ = writeln!(out, "domain {} {{", name(&domain.name));
        for prefix in &domain.prefixes {
            let label = if prefix.prefix.is_empty() {
                "NULL"
            } else {
                prefix.prefix.as_str()
            };
            let _ = writeln!(out, "   prefix {} {{", name(label));
            let max_targets = prefix.max_targets.unwrap_or(prefix.targets.len());
            let _ = writeln!(out, "      max_targets = {max_targets}");
            for target in &prefix.targets {
                let _ = writeln!(out);
                let _ = writeln!(out, "      target {} {{", name(&target.host));
                let _ = writeln!(out, "         prob = {}", target.prob);
                let _ = writeln!(out, "         hash_index = {}", target.hash_index);
                let _ = writeln!(out, "         status = {}", u8::from(target.status));
                let _ = writeln!(out, "         strip = {}", target.strip);
                let _ = writeln!(out, "         rewrite_prefix = {}", quote(&target.rewrite_prefix));
                let _ = writeln!(out, "         rewrite_suffix = {}", quote(&target.rewrite_suffix));
                let _ = writeln!(out, "         comment = {}", quote(&target.comment));
                if let Some(backup) = target.backup {
                    let _ = writeln!(out, "         backup = {backup}");
                }
                if !target.backed_up.is_empty() {
                    let list: Vec<String> = target.backed_up.iter().map(ToString::to_string).collect();
                    let _ = writeln!(out, "         backed_up = {{{}}}", list.join(", "));
                }
                let _ = writeln!(out, "      }}");
            }
            let _ = writeln!(out, "   }}");
        }
        let _ = writeln!(out, "}}");
        let _ = writeln!(out);
    }
    out
}
