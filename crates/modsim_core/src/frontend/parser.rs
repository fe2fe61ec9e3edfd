//! Tokenizer and recursive-descent parser for the supported Modelica subset.

use super::ast::{
    BinaryOp, ClassDecl, ClassKind, ComponentDecl, ComponentRef, Element, Equation, Expr,
    ExtendsClause, Modifier, ParsedProgram, Variability,
};
use crate::collaborators::SyntaxError;
use std::path::{Path, PathBuf};

/// Parses one source file into a syntax tree.
pub fn parse_source(path: &Path, source: &str) -> Result<ParsedProgram, SyntaxError> {
    let tokens = tokenize(path, source)?;
    let mut parser = Parser {
        path: path.to_path_buf(),
        tokens,
        pos: 0,
    };
    let classes = parser.parse_program()?;
    Ok(ParsedProgram {
        path: path.to_path_buf(),
        classes,
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Str(String),
    Symbol(char),
    Eof,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    line: usize,
    column: usize,
}

fn tokenize(path: &Path, input: &str) -> Result<Vec<Spanned>, SyntaxError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    let mut line = 1;
    let mut column = 1;

    let error = |line, column, message: &str| SyntaxError {
        path: path.to_path_buf(),
        line,
        column,
        message: message.to_string(),
    };

    while i < chars.len() {
        let c = chars[i];
        let (start_line, start_column) = (line, column);
        let mut advance = |i: &mut usize, line: &mut usize, column: &mut usize| {
            if chars[*i] == '\n' {
                *line += 1;
                *column = 1;
            } else {
                *column += 1;
            }
            *i += 1;
        };

        if c.is_whitespace() {
            advance(&mut i, &mut line, &mut column);
        } else if c == '/' && chars.get(i + 1) == Some(&'/') {
            while i < chars.len() && chars[i] != '\n' {
                advance(&mut i, &mut line, &mut column);
            }
        } else if c == '/' && chars.get(i + 1) == Some(&'*') {
            advance(&mut i, &mut line, &mut column);
            advance(&mut i, &mut line, &mut column);
            loop {
                if i >= chars.len() {
                    return Err(error(start_line, start_column, "unterminated comment"));
                }
                if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                    advance(&mut i, &mut line, &mut column);
                    advance(&mut i, &mut line, &mut column);
                    break;
                }
                advance(&mut i, &mut line, &mut column);
            }
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let mut text = String::new();
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                text.push(chars[i]);
                advance(&mut i, &mut line, &mut column);
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                text.push('e');
                advance(&mut i, &mut line, &mut column);
                if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                    text.push(chars[i]);
                    advance(&mut i, &mut line, &mut column);
                }
                while i < chars.len() && chars[i].is_ascii_digit() {
                    text.push(chars[i]);
                    advance(&mut i, &mut line, &mut column);
                }
            }
            let value = text
                .parse::<f64>()
                .map_err(|_| error(start_line, start_column, &format!("invalid number `{}`", text)))?;
            tokens.push(Spanned {
                token: Token::Number(value),
                line: start_line,
                column: start_column,
            });
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                ident.push(chars[i]);
                advance(&mut i, &mut line, &mut column);
            }
            tokens.push(Spanned {
                token: Token::Ident(ident),
                line: start_line,
                column: start_column,
            });
        } else if c == '"' {
            advance(&mut i, &mut line, &mut column);
            let mut text = String::new();
            loop {
                if i >= chars.len() {
                    return Err(error(start_line, start_column, "unterminated string"));
                }
                if chars[i] == '"' {
                    advance(&mut i, &mut line, &mut column);
                    break;
                }
                text.push(chars[i]);
                advance(&mut i, &mut line, &mut column);
            }
            tokens.push(Spanned {
                token: Token::Str(text),
                line: start_line,
                column: start_column,
            });
        } else if "()[];,=+-*/^.:".contains(c) {
            advance(&mut i, &mut line, &mut column);
            tokens.push(Spanned {
                token: Token::Symbol(c),
                line: start_line,
                column: start_column,
            });
        } else {
            return Err(error(
                start_line,
                start_column,
                &format!("unexpected character `{}`", c),
            ));
        }
    }

    tokens.push(Spanned {
        token: Token::Eof,
        line,
        column,
    });
    Ok(tokens)
}

const BUILTIN_FUNCTIONS: &[&str] = &["sin", "cos", "tan", "exp", "log", "sqrt", "abs"];

pub fn is_builtin_function(name: &str) -> bool {
    BUILTIN_FUNCTIONS.contains(&name)
}

struct Parser {
    path: PathBuf,
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].token
    }

    fn consume(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        let spanned = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        SyntaxError {
            path: self.path.clone(),
            line: spanned.line,
            column: spanned.column,
            message: message.into(),
        }
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Ident(ident) if ident == word)
    }

    fn is_symbol(&self, symbol: char) -> bool {
        matches!(self.peek(), Token::Symbol(c) if *c == symbol)
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.is_keyword(word) {
            self.consume();
            true
        } else {
            false
        }
    }

    fn eat_symbol(&mut self, symbol: char) -> bool {
        if self.is_symbol(symbol) {
            self.consume();
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: char) -> Result<(), SyntaxError> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{}`", symbol)))
        }
    }

    fn expect_ident(&mut self) -> Result<String, SyntaxError> {
        match self.peek() {
            Token::Ident(ident) => {
                let ident = ident.clone();
                self.consume();
                Ok(ident)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    /// `a.b.c`
    fn parse_path(&mut self) -> Result<String, SyntaxError> {
        let mut path = self.expect_ident()?;
        while self.is_symbol('.') && matches!(self.peek_at(1), Token::Ident(_)) {
            self.consume();
            path.push('.');
            path.push_str(&self.expect_ident()?);
        }
        Ok(path)
    }

    fn parse_description(&mut self) -> Option<String> {
        if let Token::Str(text) = self.peek() {
            let text = text.clone();
            self.consume();
            Some(text)
        } else {
            None
        }
    }

    fn parse_program(&mut self) -> Result<Vec<ClassDecl>, SyntaxError> {
        if self.eat_keyword("within") {
            if !self.is_symbol(';') {
                self.parse_path()?;
            }
            self.expect_symbol(';')?;
        }

        let mut classes = Vec::new();
        while *self.peek() != Token::Eof {
            classes.push(self.parse_class()?);
        }
        Ok(classes)
    }

    fn parse_class(&mut self) -> Result<ClassDecl, SyntaxError> {
        let partial = self.eat_keyword("partial");
        let kind = match self.peek() {
            Token::Ident(word) => ClassKind::from_keyword(word),
            _ => None,
        }
        .ok_or_else(|| self.error("expected class definition"))?;
        self.consume();

        let name = self.expect_ident()?;
        let description = self.parse_description();
        let mut elements = Vec::new();
        let mut equations = Vec::new();

        loop {
            if self.is_keyword("end") {
                break;
            }
            if *self.peek() == Token::Eof {
                return Err(self.error(format!("missing `end {};`", name)));
            }
            if self.eat_keyword("public") || self.eat_keyword("protected") {
                continue;
            }
            if self.eat_keyword("equation") {
                while !self.is_section_boundary() {
                    equations.push(self.parse_equation()?);
                }
                continue;
            }
            elements.push(self.parse_element()?);
        }

        self.consume();
        let closing = self.expect_ident()?;
        if closing != name {
            return Err(self.error(format!(
                "`end {}` does not match class `{}`",
                closing, name
            )));
        }
        self.expect_symbol(';')?;

        Ok(ClassDecl {
            name,
            kind,
            partial,
            description,
            elements,
            equations,
        })
    }

    fn is_section_boundary(&self) -> bool {
        ["end", "equation", "public", "protected"]
            .iter()
            .any(|word| self.is_keyword(word))
            || *self.peek() == Token::Eof
    }

    fn parse_element(&mut self) -> Result<Element, SyntaxError> {
        if self.eat_keyword("extends") {
            let base = self.parse_path()?;
            let modifiers = if self.is_symbol('(') {
                self.parse_modification()?
            } else {
                Vec::new()
            };
            self.expect_symbol(';')?;
            return Ok(Element::Extends(ExtendsClause { base, modifiers }));
        }

        let starts_class = match self.peek() {
            Token::Ident(word) => word == "partial" || ClassKind::from_keyword(word).is_some(),
            _ => false,
        };
        if starts_class {
            return Ok(Element::Class(self.parse_class()?));
        }

        self.parse_component().map(Element::Component)
    }

    fn parse_component(&mut self) -> Result<ComponentDecl, SyntaxError> {
        let variability = if self.eat_keyword("parameter") {
            Variability::Parameter
        } else if self.eat_keyword("constant") {
            Variability::Constant
        } else {
            Variability::Continuous
        };
        // Causality prefixes carry no meaning for explicit ODE models.
        let _ = self.eat_keyword("input") || self.eat_keyword("output");

        let type_name = self.parse_path()?;
        let name = self.expect_ident()?;
        let size = if self.eat_symbol('[') {
            let size = match self.consume() {
                Token::Number(n) if n.fract() == 0.0 && n >= 1.0 => n as usize,
                _ => return Err(self.error("array size must be a positive integer literal")),
            };
            self.expect_symbol(']')?;
            Some(size)
        } else {
            None
        };
        let modifiers = if self.is_symbol('(') {
            self.parse_modification()?
        } else {
            Vec::new()
        };
        let binding = if self.eat_symbol('=') {
            Some(self.parse_expression()?)
        } else {
            None
        };
        let description = self.parse_description();
        self.expect_symbol(';')?;

        Ok(ComponentDecl {
            name,
            type_name,
            variability,
            size,
            modifiers,
            binding,
            description,
        })
    }

    /// `( modifier { , modifier } )`
    fn parse_modification(&mut self) -> Result<Vec<Modifier>, SyntaxError> {
        self.expect_symbol('(')?;
        let mut modifiers = Vec::new();
        if self.eat_symbol(')') {
            return Ok(modifiers);
        }
        loop {
            if let Some(modifier) = self.parse_modifier()? {
                modifiers.push(modifier);
            }
            if self.eat_symbol(')') {
                break;
            }
            self.expect_symbol(',')?;
        }
        Ok(modifiers)
    }

    /// String-valued attributes such as `unit = "m"` are dropped.
    fn parse_modifier(&mut self) -> Result<Option<Modifier>, SyntaxError> {
        let each = self.eat_keyword("each");
        let _ = self.eat_keyword("final");
        let name = self.expect_ident()?;
        let children = if self.is_symbol('(') {
            self.parse_modification()?
        } else {
            Vec::new()
        };
        let value = if self.eat_symbol('=') {
            if let Token::Str(_) = self.peek() {
                self.consume();
                return Ok(None);
            }
            Some(self.parse_expression()?)
        } else {
            None
        };
        if value.is_none() && children.is_empty() {
            return Err(self.error(format!("modifier `{}` has no value", name)));
        }
        Ok(Some(Modifier {
            name,
            each,
            value,
            children,
        }))
    }

    fn parse_equation(&mut self) -> Result<Equation, SyntaxError> {
        let lhs = self.parse_expression()?;
        self.expect_symbol('=')?;
        let rhs = self.parse_expression()?;
        self.expect_symbol(';')?;
        Ok(Equation { lhs, rhs })
    }

    fn parse_expression(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_term()
    }

    fn parse_term(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = if self.is_symbol('+') {
                BinaryOp::Add
            } else if self.is_symbol('-') {
                BinaryOp::Sub
            } else {
                break;
            };
            self.consume();
            let right = self.parse_factor()?;
            left = Expr::binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.is_symbol('*') {
                BinaryOp::Mul
            } else if self.is_symbol('/') {
                BinaryOp::Div
            } else {
                break;
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_symbol('-') {
            let operand = self.parse_unary()?;
            return Ok(match operand {
                Expr::Number(n) => Expr::Number(-n),
                other => Expr::Neg(Box::new(other)),
            });
        }
        if self.eat_symbol('+') {
            return self.parse_unary();
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, SyntaxError> {
        let base = self.parse_primary()?;
        if self.eat_symbol('^') {
            let exponent = self.parse_unary()?;
            return Ok(Expr::binary(base, BinaryOp::Pow, exponent));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.consume();
                Ok(Expr::Number(n))
            }
            Token::Symbol('(') => {
                self.consume();
                let expr = self.parse_expression()?;
                self.expect_symbol(')')?;
                Ok(expr)
            }
            Token::Ident(word) => match word.as_str() {
                "time" => {
                    self.consume();
                    Ok(Expr::Time)
                }
                "true" => {
                    self.consume();
                    Ok(Expr::Number(1.0))
                }
                "false" => {
                    self.consume();
                    Ok(Expr::Number(0.0))
                }
                "der" => {
                    self.consume();
                    self.expect_symbol('(')?;
                    let cref = self.parse_component_ref()?;
                    self.expect_symbol(')')?;
                    Ok(Expr::Der(cref))
                }
                _ => {
                    let cref = self.parse_component_ref()?;
                    if cref.index.is_none() && self.eat_symbol('(') {
                        let mut args = Vec::new();
                        if !self.eat_symbol(')') {
                            loop {
                                args.push(self.parse_expression()?);
                                if self.eat_symbol(')') {
                                    break;
                                }
                                self.expect_symbol(',')?;
                            }
                        }
                        return Ok(Expr::Call(cref.name, args));
                    }
                    Ok(Expr::Ref(cref))
                }
            },
            _ => Err(self.error("unexpected token in expression")),
        }
    }

    fn parse_component_ref(&mut self) -> Result<ComponentRef, SyntaxError> {
        let name = self.parse_path()?;
        if self.eat_symbol('[') {
            let index = match self.consume() {
                Token::Number(n) if n.fract() == 0.0 && n >= 1.0 => n as usize,
                _ => return Err(self.error("subscript must be a positive integer literal")),
            };
            self.expect_symbol(']')?;
            return Ok(ComponentRef::indexed(name, index));
        }
        Ok(ComponentRef::new(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Result<ParsedProgram, SyntaxError> {
        parse_source(Path::new("test.mo"), source)
    }

    #[test]
    fn parses_model_with_parameters_states_and_equations() {
        let program = parse(
            r#"
            model Pendulum "simple pendulum"
              parameter Real g = 9.81;
              parameter Real L = 1.0 "length";
              Real theta(start = 0.5, fixed = true, unit = "rad");
              Real omega;
            equation
              der(theta) = omega;
              der(omega) = -g / L * sin(theta);
            end Pendulum;
            "#,
        )
        .expect("parse");

        assert_eq!(program.classes.len(), 1);
        let class = &program.classes[0];
        assert_eq!(class.name, "Pendulum");
        assert_eq!(class.kind, ClassKind::Model);
        assert_eq!(class.description.as_deref(), Some("simple pendulum"));
        assert_eq!(class.elements.len(), 4);
        assert_eq!(class.equations.len(), 2);

        let theta = class.component("theta").expect("theta");
        assert_eq!(theta.variability, Variability::Continuous);
        assert_eq!(theta.modifiers.len(), 2);
        assert_eq!(theta.modifiers[0].name, "start");
        assert_eq!(theta.modifiers[0].value, Some(Expr::Number(0.5)));

        assert_eq!(
            class.equations[1].rhs.to_string(),
            "-g / L * sin(theta)"
        );
    }

    #[test]
    fn parses_packages_extends_and_nested_modifiers() {
        let program = parse(
            r#"
            within;
            package Lib
              constant Real k = 2.5e-1;
              partial model Base
                Real x[3](each start = 1);
              end Base;
            end Lib;
            model M
              extends Lib.Base(x(each start = 2));
              Lib.Base b;
            end M;
            "#,
        )
        .expect("parse");

        assert_eq!(program.classes.len(), 2);
        let lib = &program.classes[0];
        assert_eq!(lib.kind, ClassKind::Package);
        let base = lib.nested("Base").expect("nested class");
        assert!(base.partial);
        assert_eq!(base.component("x").and_then(|c| c.size), Some(3));
        assert_eq!(
            lib.component("k").and_then(|c| c.binding.clone()),
            Some(Expr::Number(0.25))
        );

        match &program.classes[1].elements[0] {
            Element::Extends(clause) => {
                assert_eq!(clause.base, "Lib.Base");
                assert_eq!(clause.modifiers[0].children[0].name, "start");
                assert!(clause.modifiers[0].children[0].each);
            }
            other => panic!("expected extends, got {:?}", other),
        }
    }

    #[test]
    fn unary_minus_binds_looser_than_power() {
        let program = parse("model M Real x; equation der(x) = -x^2; end M;").expect("parse");
        let rhs = &program.classes[0].equations[0].rhs;
        assert!(matches!(rhs, Expr::Neg(inner) if matches!(**inner, Expr::Binary(_, BinaryOp::Pow, _))));
    }

    #[test]
    fn reports_position_of_syntax_errors() {
        let err = parse("model M\n  Real x\nequation\nend M;").expect_err("missing semicolon");
        assert_eq!(err.line, 3);
        assert!(err.message.contains("`;`"), "{}", err.message);
    }

    #[test]
    fn rejects_mismatched_end() {
        let err = parse("model M end N;").expect_err("mismatched end");
        assert!(err.message.contains("does not match"));
    }

    #[test]
    fn skips_comments() {
        let program = parse(
            "// leading\nmodel M /* block\ncomment */ Real x; // trailing\nend M;",
        )
        .expect("parse");
        assert_eq!(program.classes[0].elements.len(), 1);
    }

    #[test]
    fn unterminated_comment_is_an_error() {
        let err = parse("model M /* never closed").expect_err("unterminated");
        assert_eq!(err.message, "unterminated comment");
    }
}
