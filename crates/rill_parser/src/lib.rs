pub mod ast;
pub mod error;
pub mod parser;

pub use ast::*;
pub use error::{ParseError, ParseResult};
pub use parser::Parser;

use rill_lexer::tokenize as lex;

pub fn parse(source: &str) -> (Program, Vec<rill_lexer::LexError>, Vec<ParseError>) {
    let (tokens, lex_errors) = lex(source);
    let mut parser = Parser::new(tokens);
    let program = parser.parse();
    (program, lex_errors, parser.errors)
}
