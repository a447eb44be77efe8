pub mod tokenizer;

pub use tokenizer::{
    Token, TokenSyntax, TokenType, Tokenizer, VariableRef, contains_variable, get_variable_name,
    variable_names,
};
