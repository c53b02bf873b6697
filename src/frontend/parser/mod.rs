// The parser is split into focused modules:
//   - parser.rs: the Parser struct, token helpers, translation unit loop
//   - declarations.rs: specifiers, records, enums, declarators, globals
//   - statements.rs: statements and compound statements
//   - expressions.rs: precedence climbing and the conversion rules
//   - const_eval.rs: parse-time constant expression evaluation
//
// Each module adds methods to the Parser struct via `impl Parser` blocks.

pub mod const_eval;
mod declarations;
mod expressions;
mod parser;
mod statements;

pub use parser::Parser;
