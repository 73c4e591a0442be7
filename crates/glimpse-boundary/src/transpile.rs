//! JSX to plain JavaScript.
//!
//! Uses the classic runtime so every element becomes a
//! `React.createElement(...)` call against the shim installed by
//! [`crate::runtime`]. Nothing is imported.

use std::path::Path;

use oxc_allocator::Allocator;
use oxc_codegen::Codegen;
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::SourceType;
use oxc_transformer::{JsxOptions, JsxRuntime, TransformOptions, Transformer};

use crate::error::BoundaryError;

/// Lower JSX in `source` to `React.createElement` calls.
pub fn transpile(source: &str) -> Result<String, BoundaryError> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, SourceType::jsx()).parse();
    if parsed.panicked || !parsed.errors.is_empty() {
        let message = join_errors(parsed.errors.iter());
        return Err(BoundaryError::Parse(if message.is_empty() {
            "parser gave up".into()
        } else {
            message
        }));
    }

    let mut program = parsed.program;
    let scoping = SemanticBuilder::new()
        .build(&program)
        .semantic
        .into_scoping();

    let options = TransformOptions {
        jsx: JsxOptions {
            runtime: JsxRuntime::Classic,
            ..JsxOptions::default()
        },
        ..TransformOptions::default()
    };
    let transformed = Transformer::new(&allocator, Path::new("component.jsx"), &options)
        .build_with_scoping(scoping, &mut program);
    if !transformed.errors.is_empty() {
        return Err(BoundaryError::Transform(join_errors(
            transformed.errors.iter(),
        )));
    }

    Ok(Codegen::new().build(&program).code)
}

fn join_errors<E: std::fmt::Display>(errors: impl Iterator<Item = E>) -> String {
    errors
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
