// SPDX-FileCopyrightText: 2026 Bagpipe Contributors
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Minimal `.proto` source parser.
//!
//! Parses the subset of proto2/proto3 that telemetry schemas actually
//! use (packages, imports, messages with scalar/message/enum fields,
//! `repeated`/`optional` labels, nested messages and enums) directly
//! into a [`prost_types::FileDescriptorProto`]. Maps, oneofs, groups,
//! extensions and services are rejected with a positioned error.
//!
//! Cross-file type references are resolved against a [`TypeIndex`] of
//! everything imported so far, which is why the registry imports a
//! file's dependencies before the file itself.

use std::collections::HashSet;

use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto,
};

/// A positioned parse failure.
#[derive(Debug, Clone)]
pub struct ParseError {
    /// 1-based line
    pub line: usize,
    /// 1-based column
    pub column: usize,
    /// What went wrong
    pub message: String,
}

impl ParseError {
    fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

type ParseResult<T> = std::result::Result<T, ParseError>;

/// Fully qualified type names known from previously imported files,
/// split by kind so field descriptors get the right wire type.
#[derive(Debug, Default, Clone)]
pub struct TypeIndex {
    /// Message type names, no leading dot
    pub messages: HashSet<String>,
    /// Enum type names, no leading dot
    pub enums: HashSet<String>,
}

impl TypeIndex {
    /// Record every type declared by a parsed file.
    pub fn absorb(&mut self, file: &FileDescriptorProto) {
        let package = file.package.clone().unwrap_or_default();
        for message in &file.message_type {
            absorb_message(self, &package, message);
        }
        for enumeration in &file.enum_type {
            self.enums.insert(qualify(&package, enumeration.name()));
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.messages.contains(name) || self.enums.contains(name)
    }
}

fn absorb_message(index: &mut TypeIndex, scope: &str, message: &DescriptorProto) {
    let fq = qualify(scope, message.name());
    index.messages.insert(fq.clone());
    for nested in &message.nested_type {
        absorb_message(index, &fq, nested);
    }
    for enumeration in &message.enum_type {
        index.enums.insert(qualify(&fq, enumeration.name()));
    }
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}.{name}")
    }
}

/// Parse one `.proto` source into a file descriptor.
///
/// `file_name` becomes the descriptor's `name` and must match the path
/// the file is imported under.
pub fn parse_proto(
    file_name: &str,
    source: &str,
    index: &TypeIndex,
) -> ParseResult<FileDescriptorProto> {
    let tokens = lex(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        index,
    };
    parser.parse_file(file_name)
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    IntLit(i64),
    StrLit(String),
    Symbol(char),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    line: usize,
    column: usize,
}

fn lex(source: &str) -> ParseResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    let mut line = 1;
    let mut column = 1;

    macro_rules! advance {
        () => {{
            if chars[i] == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
            i += 1;
        }};
    }

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            advance!();
            continue;
        }

        // line comment
        if c == '/' && i + 1 < chars.len() && chars[i + 1] == '/' {
            while i < chars.len() && chars[i] != '\n' {
                advance!();
            }
            continue;
        }

        // block comment
        if c == '/' && i + 1 < chars.len() && chars[i + 1] == '*' {
            let (start_line, start_col) = (line, column);
            advance!();
            advance!();
            loop {
                if i + 1 >= chars.len() {
                    return Err(ParseError::new(start_line, start_col, "unterminated comment"));
                }
                if chars[i] == '*' && chars[i + 1] == '/' {
                    advance!();
                    advance!();
                    break;
                }
                advance!();
            }
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let (start_line, start_col) = (line, column);
            advance!();
            let mut value = String::new();
            loop {
                if i >= chars.len() || chars[i] == '\n' {
                    return Err(ParseError::new(
                        start_line,
                        start_col,
                        "unterminated string literal",
                    ));
                }
                if chars[i] == quote {
                    advance!();
                    break;
                }
                value.push(chars[i]);
                advance!();
            }
            tokens.push(Token {
                kind: TokenKind::StrLit(value),
                line: start_line,
                column: start_col,
            });
            continue;
        }

        if c.is_ascii_digit() || (c == '-' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit())
        {
            let (start_line, start_col) = (line, column);
            let mut text = String::new();
            if c == '-' {
                text.push('-');
                advance!();
            }
            while i < chars.len() && chars[i].is_ascii_digit() {
                text.push(chars[i]);
                advance!();
            }
            let value = text.parse::<i64>().map_err(|_| {
                ParseError::new(start_line, start_col, format!("bad integer literal '{text}'"))
            })?;
            tokens.push(Token {
                kind: TokenKind::IntLit(value),
                line: start_line,
                column: start_col,
            });
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' || c == '.' {
            let (start_line, start_col) = (line, column);
            let mut text = String::new();
            while i < chars.len()
                && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
            {
                text.push(chars[i]);
                advance!();
            }
            tokens.push(Token {
                kind: TokenKind::Ident(text),
                line: start_line,
                column: start_col,
            });
            continue;
        }

        if "{}=;[],<>()".contains(c) {
            tokens.push(Token {
                kind: TokenKind::Symbol(c),
                line,
                column,
            });
            advance!();
            continue;
        }

        return Err(ParseError::new(line, column, format!("unexpected character '{c}'")));
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    index: &'a TypeIndex,
}

/// Intermediate message form; fields resolve after all local types are known.
struct RawMessage {
    name: String,
    fields: Vec<RawField>,
    nested: Vec<RawMessage>,
    enums: Vec<EnumDescriptorProto>,
}

struct RawField {
    name: String,
    number: i32,
    label: Label,
    type_ref: TypeRef,
    line: usize,
    column: usize,
}

enum TypeRef {
    Scalar(Type),
    Named(String),
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> ParseResult<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| self.eof_error())?;
        self.pos += 1;
        Ok(token)
    }

    fn eof_error(&self) -> ParseError {
        let (line, column) = self
            .tokens
            .last()
            .map(|t| (t.line, t.column))
            .unwrap_or((1, 1));
        ParseError::new(line, column, "unexpected end of file")
    }

    fn expect_symbol(&mut self, symbol: char) -> ParseResult<()> {
        let token = self.next()?;
        match token.kind {
            TokenKind::Symbol(c) if c == symbol => Ok(()),
            _ => Err(ParseError::new(
                token.line,
                token.column,
                format!("expected '{symbol}'"),
            )),
        }
    }

    fn expect_ident(&mut self) -> ParseResult<(String, usize, usize)> {
        let token = self.next()?;
        match token.kind {
            TokenKind::Ident(name) => Ok((name, token.line, token.column)),
            _ => Err(ParseError::new(token.line, token.column, "expected identifier")),
        }
    }

    /// Skip tokens through the terminating `;`, balancing braces so
    /// aggregate option values do not derail the parse.
    fn skip_statement(&mut self) -> ParseResult<()> {
        let mut depth = 0usize;
        loop {
            let token = self.next()?;
            match token.kind {
                TokenKind::Symbol('{') => depth += 1,
                TokenKind::Symbol('}') => depth = depth.saturating_sub(1),
                TokenKind::Symbol(';') if depth == 0 => return Ok(()),
                _ => {}
            }
        }
    }

    fn parse_file(&mut self, file_name: &str) -> ParseResult<FileDescriptorProto> {
        let mut syntax = "proto2".to_string();
        let mut package = String::new();
        let mut dependencies = Vec::new();
        let mut messages = Vec::new();
        let mut enums = Vec::new();

        while let Some(token) = self.peek().cloned() {
            let keyword = match &token.kind {
                TokenKind::Ident(word) => word.clone(),
                _ => {
                    return Err(ParseError::new(
                        token.line,
                        token.column,
                        "expected a top-level declaration",
                    ))
                }
            };

            match keyword.as_str() {
                "syntax" => {
                    self.next()?;
                    self.expect_symbol('=')?;
                    let value = self.next()?;
                    match value.kind {
                        TokenKind::StrLit(s) if s == "proto2" || s == "proto3" => syntax = s,
                        _ => {
                            return Err(ParseError::new(
                                value.line,
                                value.column,
                                "expected \"proto2\" or \"proto3\"",
                            ))
                        }
                    }
                    self.expect_symbol(';')?;
                }
                "package" => {
                    self.next()?;
                    let (name, _, _) = self.expect_ident()?;
                    package = name;
                    self.expect_symbol(';')?;
                }
                "import" => {
                    self.next()?;
                    // optional "public" / "weak" modifier
                    if let Some(Token {
                        kind: TokenKind::Ident(word),
                        ..
                    }) = self.peek()
                    {
                        if word == "public" || word == "weak" {
                            self.next()?;
                        }
                    }
                    let value = self.next()?;
                    match value.kind {
                        TokenKind::StrLit(path) => dependencies.push(path),
                        _ => {
                            return Err(ParseError::new(
                                value.line,
                                value.column,
                                "expected import path string",
                            ))
                        }
                    }
                    self.expect_symbol(';')?;
                }
                "option" => {
                    self.next()?;
                    self.skip_statement()?;
                }
                "message" => {
                    self.next()?;
                    messages.push(self.parse_message()?);
                }
                "enum" => {
                    self.next()?;
                    enums.push(self.parse_enum()?);
                }
                "service" | "extend" => {
                    return Err(ParseError::new(
                        token.line,
                        token.column,
                        format!("'{keyword}' declarations are not supported"),
                    ))
                }
                other => {
                    return Err(ParseError::new(
                        token.line,
                        token.column,
                        format!("unexpected top-level keyword '{other}'"),
                    ))
                }
            }
        }

        // Local declarations participate in reference resolution alongside
        // the already-imported index.
        let mut local = TypeIndex::default();
        for message in &messages {
            collect_raw(&mut local, &package, message);
        }
        for enumeration in &enums {
            local.enums.insert(qualify(&package, enumeration.name()));
        }

        let message_type = messages
            .into_iter()
            .map(|raw| self.build_message(raw, &package, &local))
            .collect::<ParseResult<Vec<_>>>()?;

        Ok(FileDescriptorProto {
            name: Some(file_name.to_string()),
            package: if package.is_empty() {
                None
            } else {
                Some(package)
            },
            dependency: dependencies,
            message_type,
            enum_type: enums,
            syntax: Some(syntax),
            ..Default::default()
        })
    }

    fn parse_message(&mut self) -> ParseResult<RawMessage> {
        let (name, _, _) = self.expect_ident()?;
        self.expect_symbol('{')?;

        let mut message = RawMessage {
            name,
            fields: Vec::new(),
            nested: Vec::new(),
            enums: Vec::new(),
        };

        loop {
            let token = self.peek().cloned().ok_or_else(|| self.eof_error())?;
            match &token.kind {
                TokenKind::Symbol('}') => {
                    self.next()?;
                    break;
                }
                TokenKind::Symbol(';') => {
                    self.next()?;
                }
                TokenKind::Ident(word) => match word.as_str() {
                    "message" => {
                        self.next()?;
                        let nested = self.parse_message()?;
                        message.nested.push(nested);
                    }
                    "enum" => {
                        self.next()?;
                        let nested = self.parse_enum()?;
                        message.enums.push(nested);
                    }
                    "option" | "reserved" => {
                        self.next()?;
                        self.skip_statement()?;
                    }
                    "oneof" | "map" | "group" | "extensions" | "extend" => {
                        return Err(ParseError::new(
                            token.line,
                            token.column,
                            format!("'{word}' is not supported"),
                        ))
                    }
                    _ => {
                        let field = self.parse_field()?;
                        message.fields.push(field);
                    }
                },
                _ => {
                    return Err(ParseError::new(
                        token.line,
                        token.column,
                        "expected a field or nested declaration",
                    ))
                }
            }
        }

        Ok(message)
    }

    fn parse_field(&mut self) -> ParseResult<RawField> {
        let (mut word, mut line, mut column) = self.expect_ident()?;

        let label = match word.as_str() {
            "repeated" => {
                let (next, l, c) = self.expect_ident()?;
                word = next;
                line = l;
                column = c;
                Label::Repeated
            }
            "optional" => {
                let (next, l, c) = self.expect_ident()?;
                word = next;
                line = l;
                column = c;
                Label::Optional
            }
            "required" => {
                let (next, l, c) = self.expect_ident()?;
                word = next;
                line = l;
                column = c;
                Label::Required
            }
            _ => Label::Optional,
        };

        let type_ref = match scalar_type(&word) {
            Some(scalar) => TypeRef::Scalar(scalar),
            None => TypeRef::Named(word),
        };

        let (name, _, _) = self.expect_ident()?;
        self.expect_symbol('=')?;

        let number_token = self.next()?;
        let number = match number_token.kind {
            TokenKind::IntLit(n) if n > 0 && n < i64::from(i32::MAX) => n as i32,
            _ => {
                return Err(ParseError::new(
                    number_token.line,
                    number_token.column,
                    "expected a positive field number",
                ))
            }
        };

        // field options like [deprecated = true] are skipped
        if let Some(Token {
            kind: TokenKind::Symbol('['),
            ..
        }) = self.peek()
        {
            loop {
                let token = self.next()?;
                if token.kind == TokenKind::Symbol(']') {
                    break;
                }
            }
        }
        self.expect_symbol(';')?;

        Ok(RawField {
            name,
            number,
            label,
            type_ref,
            line,
            column,
        })
    }

    fn parse_enum(&mut self) -> ParseResult<EnumDescriptorProto> {
        let (name, _, _) = self.expect_ident()?;
        self.expect_symbol('{')?;

        let mut values = Vec::new();
        loop {
            let token = self.peek().cloned().ok_or_else(|| self.eof_error())?;
            match &token.kind {
                TokenKind::Symbol('}') => {
                    self.next()?;
                    break;
                }
                TokenKind::Symbol(';') => {
                    self.next()?;
                }
                TokenKind::Ident(word) if word == "option" || word == "reserved" => {
                    self.next()?;
                    self.skip_statement()?;
                }
                TokenKind::Ident(_) => {
                    let (value_name, _, _) = self.expect_ident()?;
                    self.expect_symbol('=')?;
                    let number_token = self.next()?;
                    let number = match number_token.kind {
                        TokenKind::IntLit(n) => n as i32,
                        _ => {
                            return Err(ParseError::new(
                                number_token.line,
                                number_token.column,
                                "expected an enum value number",
                            ))
                        }
                    };
                    if let Some(Token {
                        kind: TokenKind::Symbol('['),
                        ..
                    }) = self.peek()
                    {
                        loop {
                            let token = self.next()?;
                            if token.kind == TokenKind::Symbol(']') {
                                break;
                            }
                        }
                    }
                    self.expect_symbol(';')?;
                    values.push(EnumValueDescriptorProto {
                        name: Some(value_name),
                        number: Some(number),
                        options: None,
                    });
                }
                _ => {
                    return Err(ParseError::new(
                        token.line,
                        token.column,
                        "expected an enum value",
                    ))
                }
            }
        }

        Ok(EnumDescriptorProto {
            name: Some(name),
            value: values,
            ..Default::default()
        })
    }

    fn build_message(
        &self,
        raw: RawMessage,
        scope: &str,
        local: &TypeIndex,
    ) -> ParseResult<DescriptorProto> {
        let fq = qualify(scope, &raw.name);

        let fields = raw
            .fields
            .into_iter()
            .map(|field| self.build_field(field, &fq, local))
            .collect::<ParseResult<Vec<_>>>()?;

        let nested = raw
            .nested
            .into_iter()
            .map(|nested| self.build_message(nested, &fq, local))
            .collect::<ParseResult<Vec<_>>>()?;

        Ok(DescriptorProto {
            name: Some(raw.name),
            field: fields,
            nested_type: nested,
            enum_type: raw.enums,
            ..Default::default()
        })
    }

    fn build_field(
        &self,
        field: RawField,
        scope: &str,
        local: &TypeIndex,
    ) -> ParseResult<FieldDescriptorProto> {
        let (field_type, type_name) = match field.type_ref {
            TypeRef::Scalar(scalar) => (scalar, None),
            TypeRef::Named(name) => {
                let fq = self.resolve_type(&name, scope, local).ok_or_else(|| {
                    ParseError::new(
                        field.line,
                        field.column,
                        format!("unresolved type '{name}'"),
                    )
                })?;
                let kind = if local.enums.contains(&fq) || self.index.enums.contains(&fq) {
                    Type::Enum
                } else {
                    Type::Message
                };
                (kind, Some(format!(".{fq}")))
            }
        };

        Ok(FieldDescriptorProto {
            name: Some(field.name),
            number: Some(field.number),
            label: Some(field.label as i32),
            r#type: Some(field_type as i32),
            type_name,
            ..Default::default()
        })
    }

    /// Resolve a type reference the way protoc scoping does: innermost
    /// enclosing scope first, then each parent scope, then the root.
    fn resolve_type(&self, name: &str, scope: &str, local: &TypeIndex) -> Option<String> {
        if let Some(stripped) = name.strip_prefix('.') {
            let fq = stripped.to_string();
            return (local.contains(&fq) || self.index.contains(&fq)).then_some(fq);
        }

        let mut segments: Vec<&str> = if scope.is_empty() {
            Vec::new()
        } else {
            scope.split('.').collect()
        };

        loop {
            let candidate = if segments.is_empty() {
                name.to_string()
            } else {
                format!("{}.{}", segments.join("."), name)
            };
            if local.contains(&candidate) || self.index.contains(&candidate) {
                return Some(candidate);
            }
            if segments.pop().is_none() {
                return None;
            }
            if segments.is_empty() {
                let candidate = name.to_string();
                if local.contains(&candidate) || self.index.contains(&candidate) {
                    return Some(candidate);
                }
                return None;
            }
        }
    }
}

fn collect_raw(index: &mut TypeIndex, scope: &str, message: &RawMessage) {
    let fq = qualify(scope, &message.name);
    index.messages.insert(fq.clone());
    for nested in &message.nested {
        collect_raw(index, &fq, nested);
    }
    for enumeration in &message.enums {
        index.enums.insert(qualify(&fq, enumeration.name()));
    }
}

fn scalar_type(word: &str) -> Option<Type> {
    Some(match word {
        "double" => Type::Double,
        "float" => Type::Float,
        "int32" => Type::Int32,
        "int64" => Type::Int64,
        "uint32" => Type::Uint32,
        "uint64" => Type::Uint64,
        "sint32" => Type::Sint32,
        "sint64" => Type::Sint64,
        "fixed32" => Type::Fixed32,
        "fixed64" => Type::Fixed64,
        "sfixed32" => Type::Sfixed32,
        "sfixed64" => Type::Sfixed64,
        "bool" => Type::Bool,
        "string" => Type::String,
        "bytes" => Type::Bytes,
        _ => return None,
    })
}
