use std::fmt::{self, Display};

use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[inline(always)]
fn is_word_byte(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// End of the run of word bytes starting at `start`.
#[inline]
fn word_run(bytes: &[u8], start: usize) -> usize {
    let mut end = start;
    while end < bytes.len() && is_word_byte(bytes[end]) {
        end += 1;
    }
    end
}

/// Which of the three equivalent token spellings was used.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenSyntax {
    /// `$name`
    Dollar,
    /// `${name}`, `${name.path}`, `${name:format}`
    Braced,
    /// `[[name]]`, `[[name:format]]`
    Bracketed,
}

/// The type of a token.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    Literal,
    Variable,
}

impl Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// What a variable token refers to.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableRef {
    pub name: String,
    /// `${name.path}` suffix; accepted and carried, never interpreted here.
    pub field_path: Option<String>,
    /// `:format` suffix of the braced and bracketed spellings.
    pub format: Option<String>,
    pub syntax: TokenSyntax,
}

/// A slice of the scanned input.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    /// The raw source text of the token.
    pub value: String,
    pub token_type: TokenType,
    pub start: usize,
    pub end: usize,
    pub variable: Option<VariableRef>,
}

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variable {
            Some(var) => write!(f, "<{} name: {} value: {}>", self.token_type, var.name, self.value),
            None => write!(f, "<{} value: {}>", self.token_type, self.value),
        }
    }
}

impl Token {
    fn literal(source: &str, start: usize, end: usize) -> Self {
        Token {
            value: source[start..end].to_string(),
            token_type: TokenType::Literal,
            start,
            end,
            variable: None,
        }
    }

    fn variable(source: &str, start: usize, end: usize, var: VariableRef) -> Self {
        Token {
            value: source[start..end].to_string(),
            token_type: TokenType::Variable,
            start,
            end,
            variable: Some(var),
        }
    }

    pub fn is_variable(&self) -> bool {
        self.token_type == TokenType::Variable
    }
}

/// Splits a string into literal runs and variable tokens.
///
/// Scanning never fails: anything that does not form a complete token is
/// kept as literal text, so concatenating the token values always yields the
/// input back.
pub struct Tokenizer {
    source: String,
    pub items: Vec<Token>,
    offset: usize,
    literal_start: usize,
}

impl Tokenizer {
    /// Create a new tokenizer and immediately scan the input.
    pub fn new(source: &str) -> Self {
        let mut tokenizer = Tokenizer {
            source: source.to_string(),
            items: Vec::new(),
            offset: 0,
            literal_start: 0,
        };
        tokenizer.parse();
        tokenizer
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Iterate over the variable references in source order.
    pub fn variables(&self) -> impl Iterator<Item = &VariableRef> {
        self.items.iter().filter_map(|t| t.variable.as_ref())
    }

    pub fn has_variables(&self) -> bool {
        self.items.iter().any(Token::is_variable)
    }

    /// Concatenate the tokens back into a string.
    pub fn render(&self) -> String {
        self.items.iter().map(|t| t.value.as_str()).collect()
    }

    /// Rebuild the string, letting `f` substitute each variable token.
    ///
    /// Returning `None` keeps the token text unchanged.
    pub fn render_with<F>(&self, mut f: F) -> String
    where
        F: FnMut(&Token, &VariableRef) -> Option<String>,
    {
        let mut out = String::with_capacity(self.source.len());
        for token in &self.items {
            match &token.variable {
                Some(var) => match f(token, var) {
                    Some(replacement) => out.push_str(&replacement),
                    None => out.push_str(&token.value),
                },
                None => out.push_str(&token.value),
            }
        }
        out
    }

    fn parse(&mut self) {
        let len = self.source.len();
        while self.offset < len {
            let byte = self.source.as_bytes()[self.offset];
            let found = match byte {
                b'$' => self.scan_dollar(self.offset),
                b'[' => self.scan_brackets(self.offset),
                _ => None,
            };

            match found {
                Some((end, var)) => {
                    self.flush_literal(self.offset);
                    let token = Token::variable(&self.source, self.offset, end, var);
                    self.items.push(token);
                    self.offset = end;
                    self.literal_start = end;
                }
                None => self.offset += 1,
            }
        }
        self.flush_literal(len);
    }

    fn flush_literal(&mut self, end: usize) {
        if end > self.literal_start {
            let token = Token::literal(&self.source, self.literal_start, end);
            self.items.push(token);
        }
        self.literal_start = end;
    }

    /// `$name` or `${name(.path)?(:format)?}` starting at `pos`.
    fn scan_dollar(&self, pos: usize) -> Option<(usize, VariableRef)> {
        let bytes = self.source.as_bytes();
        let next = *bytes.get(pos + 1)?;

        if is_word_byte(next) {
            let end = word_run(bytes, pos + 1);
            return Some((
                end,
                VariableRef {
                    name: self.source[pos + 1..end].to_string(),
                    field_path: None,
                    format: None,
                    syntax: TokenSyntax::Dollar,
                },
            ));
        }

        if next != b'{' {
            return None;
        }

        let name_start = pos + 2;
        let mut i = word_run(bytes, name_start);
        if i == name_start {
            return None;
        }
        let name = self.source[name_start..i].to_string();

        let mut field_path = None;
        if bytes.get(i) == Some(&b'.') {
            let path_start = i + 1;
            let mut j = path_start;
            while j < bytes.len() && !matches!(bytes[j], b':' | b'^' | b'}') {
                j += 1;
            }
            if j == path_start {
                return None;
            }
            field_path = Some(self.source[path_start..j].to_string());
            i = j;
        }

        let mut format = None;
        if bytes.get(i) == Some(&b':') {
            let fmt_start = i + 1;
            let mut j = fmt_start;
            while j < bytes.len() && bytes[j] != b'}' {
                j += 1;
            }
            if j == fmt_start {
                return None;
            }
            format = Some(self.source[fmt_start..j].to_string());
            i = j;
        }

        if bytes.get(i) != Some(&b'}') {
            return None;
        }

        Some((
            i + 1,
            VariableRef {
                name,
                field_path,
                format,
                syntax: TokenSyntax::Braced,
            },
        ))
    }

    /// `[[name]]` or `[[name:format]]` starting at `pos`; the name is the
    /// shortest run that is followed by either closing form.
    fn scan_brackets(&self, pos: usize) -> Option<(usize, VariableRef)> {
        let bytes = self.source.as_bytes();
        if bytes.get(pos + 1) != Some(&b'[') {
            return None;
        }
        let name_start = pos + 2;

        let mut end = name_start + 1;
        while end <= bytes.len() {
            if !self.source.is_char_boundary(end) {
                end += 1;
                continue;
            }
            let rest = &bytes[end..];

            if rest.first() == Some(&b':') {
                let fmt_end = word_run(bytes, end + 1);
                if fmt_end > end + 1 && bytes[fmt_end..].starts_with(b"]]") {
                    return Some((
                        fmt_end + 2,
                        VariableRef {
                            name: self.source[name_start..end].to_string(),
                            field_path: None,
                            format: Some(self.source[end + 1..fmt_end].to_string()),
                            syntax: TokenSyntax::Bracketed,
                        },
                    ));
                }
            }

            if rest.starts_with(b"]]") {
                return Some((
                    end + 2,
                    VariableRef {
                        name: self.source[name_start..end].to_string(),
                        field_path: None,
                        format: None,
                        syntax: TokenSyntax::Bracketed,
                    },
                ));
            }
            end += 1;
        }
        None
    }
}

/// Unique variable names referenced by `input`, in order of first use.
pub fn variable_names(input: &str) -> SmallVec<[String; 4]> {
    let mut names: SmallVec<[String; 4]> = SmallVec::new();
    for var in Tokenizer::new(input).variables() {
        if !names.iter().any(|n| n == &var.name) {
            names.push(var.name.clone());
        }
    }
    names
}

/// True when `input` references the variable `name` in any spelling.
pub fn contains_variable(input: &str, name: &str) -> bool {
    Tokenizer::new(input).variables().any(|v| v.name == name)
}

/// Name of the first variable token in `expression`.
pub fn get_variable_name(expression: &str) -> Option<String> {
    Tokenizer::new(expression).variables().next().map(|v| v.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(input: &str) -> Vec<VariableRef> {
        Tokenizer::new(input).variables().cloned().collect()
    }

    #[test]
    fn test_dollar_token() {
        let t = Tokenizer::new("this.$test.filters");
        assert_eq!(t.items.len(), 3);
        assert_eq!(t.items[0].value, "this.");
        assert_eq!(t.items[1].value, "$test");
        assert_eq!(t.items[1].variable.as_ref().unwrap().name, "test");
        assert_eq!(t.items[2].value, ".filters");
    }

    #[test]
    fn test_braced_token_with_path_and_format() {
        let v = vars("${host.labels:csv}");
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].name, "host");
        assert_eq!(v[0].field_path.as_deref(), Some("labels"));
        assert_eq!(v[0].format.as_deref(), Some("csv"));
        assert_eq!(v[0].syntax, TokenSyntax::Braced);
    }

    #[test]
    fn test_bracketed_token_with_format() {
        let v = vars("[[ds:raw]] and [[plain]]");
        assert_eq!(v.len(), 2);
        assert_eq!(v[0].name, "ds");
        assert_eq!(v[0].format.as_deref(), Some("raw"));
        assert_eq!(v[1].name, "plain");
        assert_eq!(v[1].format, None);
    }

    #[test]
    fn test_bracketed_name_may_contain_spaces() {
        let v = vars("[[my var]]");
        assert_eq!(v[0].name, "my var");
    }

    #[test]
    fn test_incomplete_tokens_stay_literal() {
        for input in ["$", "${", "${}", "${a", "${a.}", "${a:}", "[[", "[[]]", "[[a]", "$-x"] {
            let t = Tokenizer::new(input);
            assert!(!t.has_variables(), "unexpected variable in {input:?}");
            assert_eq!(t.render(), input);
        }
    }

    #[test]
    fn test_adjacent_tokens() {
        let v = vars("$a$b${c}[[d]]");
        let names: Vec<_> = v.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_multibyte_literals() {
        let t = Tokenizer::new("größe=$größe [[ü]]");
        let names: Vec<_> = t.variables().map(|v| v.name.clone()).collect();
        // `\w` is ASCII-only, so `$größe` captures just `gr`.
        assert_eq!(names, ["gr", "ü"]);
        assert_eq!(t.render(), "größe=$größe [[ü]]");
    }

    #[test]
    fn test_helpers() {
        assert!(contains_variable("sum($app.*)", "app"));
        assert!(!contains_variable("sum($apps.*)", "app"));
        assert_eq!(get_variable_name("[[server:glob]]").as_deref(), Some("server"));
        assert_eq!(get_variable_name("no tokens"), None);
        assert_eq!(variable_names("$a.$b.$a").as_slice(), ["a", "b"]);
    }

    #[test]
    fn test_render_with_keeps_unmatched() {
        let t = Tokenizer::new("$known/$unknown");
        let out = t.render_with(|_, var| (var.name == "known").then(|| "X".to_string()));
        assert_eq!(out, "X/$unknown");
    }
}
