use std::{
    fs, io,
    iter::Peekable,
    path::{Path, PathBuf},
    str::CharIndices,
};

use save_schema::Node;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyntaxError {
    #[error("line {line}: unterminated quoted string")]
    UnterminatedString { line: usize },
    #[error("line {line}: unexpected '}}'")]
    UnexpectedClose { line: usize },
    #[error("line {line}: block opened here is never closed")]
    UnclosedBlock { line: usize },
    #[error("line {line}: missing value after '{key} ='")]
    MissingValue { key: String, line: usize },
    #[error("line {line}: '=' without a key")]
    UnexpectedEquals { line: usize },
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed {path:?}: {source}")]
    Syntax {
        path: PathBuf,
        #[source]
        source: SyntaxError,
    },
}

/// Read and parse a whole file into a root [`Node`].
///
/// Files that are not valid UTF-8 are decoded as Latin-1, which is what the
/// games write.
pub fn parse_file(path: &Path) -> Result<Node, ParseError> {
    let bytes = fs::read(path).map_err(|source| ParseError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let contents = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => err.into_bytes().iter().map(|&b| b as char).collect(),
    };
    parse_str(&contents).map_err(|source| ParseError::Syntax {
        path: path.to_path_buf(),
        source,
    })
}

pub fn parse_str(input: &str) -> Result<Node, SyntaxError> {
    let mut tokens = Tokenizer::new(input).tokenize()?.into_iter().peekable();
    let header = matches!(
        tokens.peek(),
        Some(Token { kind: TokenKind::Atom(text), .. }) if text.ends_with("txt")
    );
    let children = parse_block(&mut tokens, None, header)?;
    Ok(Node::root(children))
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Equals,
    Open,
    Close,
    Atom(String),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    line: usize,
}

struct Tokenizer<'a> {
    chars: Peekable<CharIndices<'a>>,
    input: &'a str,
    line: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.char_indices().peekable(),
            input,
            line: 1,
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Option<Token>, SyntaxError> {
        loop {
            let Some(&(start, ch)) = self.chars.peek() else {
                return Ok(None);
            };
            match ch {
                '\n' => {
                    self.line += 1;
                    self.chars.next();
                }
                c if c.is_whitespace() => {
                    self.chars.next();
                }
                '#' => {
                    while let Some(&(_, c)) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                '=' => {
                    self.chars.next();
                    return Ok(Some(self.token(TokenKind::Equals)));
                }
                '{' => {
                    self.chars.next();
                    return Ok(Some(self.token(TokenKind::Open)));
                }
                '}' => {
                    self.chars.next();
                    return Ok(Some(self.token(TokenKind::Close)));
                }
                '"' => {
                    self.chars.next();
                    return self.quoted().map(Some);
                }
                _ => return Ok(Some(self.bare(start))),
            }
        }
    }

    fn token(&self, kind: TokenKind) -> Token {
        Token {
            kind,
            line: self.line,
        }
    }

    fn quoted(&mut self) -> Result<Token, SyntaxError> {
        let opened_on = self.line;
        let mut text = String::new();
        while let Some((_, c)) = self.chars.next() {
            match c {
                '"' => {
                    return Ok(Token {
                        kind: TokenKind::Atom(text),
                        line: opened_on,
                    })
                }
                '\\' if matches!(self.chars.peek(), Some(&(_, '"' | '\\'))) => {
                    if let Some((_, escaped)) = self.chars.next() {
                        text.push(escaped);
                    }
                }
                '\n' => {
                    self.line += 1;
                    text.push('\n');
                }
                other => text.push(other),
            }
        }
        Err(SyntaxError::UnterminatedString { line: opened_on })
    }

    fn bare(&mut self, start: usize) -> Token {
        let mut end = start;
        while let Some(&(idx, c)) = self.chars.peek() {
            if c.is_whitespace() || matches!(c, '=' | '{' | '}' | '"' | '#') {
                break;
            }
            end = idx + c.len_utf8();
            self.chars.next();
        }
        self.token(TokenKind::Atom(self.input[start..end].to_string()))
    }
}

type Tokens = Peekable<std::vec::IntoIter<Token>>;

/// Parse items until the matching close brace (`opened_on` is `Some`) or the
/// end of input (`None`). A save whose first token is a `...txt` header may end
/// with one unmatched `}`.
fn parse_block(
    tokens: &mut Tokens,
    opened_on: Option<usize>,
    header: bool,
) -> Result<Vec<Node>, SyntaxError> {
    let mut children = Vec::new();
    loop {
        let Some(token) = tokens.next() else {
            return match opened_on {
                Some(line) => Err(SyntaxError::UnclosedBlock { line }),
                None => Ok(children),
            };
        };
        match token.kind {
            TokenKind::Close => {
                if opened_on.is_some() {
                    return Ok(children);
                }
                if header && tokens.peek().is_none() {
                    return Ok(children);
                }
                return Err(SyntaxError::UnexpectedClose { line: token.line });
            }
            TokenKind::Equals => return Err(SyntaxError::UnexpectedEquals { line: token.line }),
            TokenKind::Open => {
                let nested = parse_block(tokens, Some(token.line), false)?;
                children.push(Node::block(String::new(), nested));
            }
            TokenKind::Atom(key) => {
                let assigned = matches!(
                    tokens.peek(),
                    Some(Token {
                        kind: TokenKind::Equals,
                        ..
                    })
                );
                if !assigned {
                    children.push(Node::leaf(key));
                    continue;
                }
                tokens.next();
                match tokens.next() {
                    Some(Token {
                        kind: TokenKind::Atom(value),
                        ..
                    }) => children.push(Node::scalar(key, value)),
                    Some(Token {
                        kind: TokenKind::Open,
                        line,
                    }) => {
                        let nested = parse_block(tokens, Some(line), false)?;
                        children.push(Node::block(key, nested));
                    }
                    _ => {
                        return Err(SyntaxError::MissingValue {
                            key,
                            line: token.line,
                        })
                    }
                }
            }
        }
    }
}
