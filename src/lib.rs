//! Synthesis of arithmetic operators defined in terms of one another, and
//! generation of evaluated expression datasets over them.

pub mod ast;
pub mod base;
pub mod batch;
pub mod codegen;
pub mod condition;
pub mod config;
pub mod driver;
pub mod error;
pub mod evaluator;
pub mod expr;
pub mod exprgen;
pub mod grammar;
pub mod initial;
pub mod interp;
pub mod ir;
pub mod irgen;
pub mod lexer;
pub mod logging;
pub mod number;
pub mod operator;
pub mod opgen;
pub mod parser;
pub mod priority;
pub mod procedure;
pub mod recursive;
pub mod registry;
pub mod store;
pub mod validate;

pub use error::{Error, Result};
